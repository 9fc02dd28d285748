//! Payload sealing — AES-128-CTR keyed by the frame header.
//!
//! Every frame body on the wire is sealed: with the compiled-in handshake
//! key before authentication, with the session key after. The CTR IV is a
//! pure function of the frame header (`cmd`, `seq`) and the key id, so
//! sealing and opening need no state beyond the key itself.

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};

use crate::sha1;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// The well-known key protecting pre-authentication frames.
///
/// Both sides use it until the credential exchange succeeds and a
/// session-specific key is installed.
const HANDSHAKE_KEY: [u8; 16] = [
    0x74, 0x65, 0x72, 0x6e, 0x2d, 0x68, 0x61, 0x6e,
    0x64, 0x73, 0x68, 0x61, 0x6b, 0x65, 0x2d, 0x31,
];

/// A 16-byte payload sealing key plus its precomputed 8-byte identifier.
#[derive(Clone)]
pub struct SealKey {
    data: [u8; 16],
    key_id: [u8; 8],
}

impl SealKey {
    /// Construct from raw key bytes.
    pub fn from_bytes(data: [u8; 16]) -> Self {
        let sha = sha1!(&data);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&sha[12..20]);
        Self { data, key_id }
    }

    /// The fixed key used for frames sent before a session key exists.
    pub fn handshake() -> Self {
        Self::from_bytes(HANDSHAKE_KEY)
    }

    /// Return the raw 16-byte representation.
    pub fn to_bytes(&self) -> [u8; 16] {
        self.data
    }

    /// The 8-byte key identifier (SHA-1(key)[12..20]).
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    fn iv(&self, cmd: u16, seq: u16) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..2].copy_from_slice(&cmd.to_le_bytes());
        iv[2..4].copy_from_slice(&seq.to_le_bytes());
        iv[4..12].copy_from_slice(&self.key_id);
        iv[12..].copy_from_slice(b"tern");
        iv
    }
}

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SealKey(id={})", u64::from_le_bytes(self.key_id))
    }
}

impl PartialEq for SealKey {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

/// Seal `body` in place for the frame identified by `cmd`/`seq`.
pub fn seal_payload(cmd: u16, seq: u16, body: &mut [u8], key: &SealKey) {
    let mut cipher = Aes128Ctr::new(&key.data.into(), &key.iv(cmd, seq).into());
    cipher.apply_keystream(body);
}

/// Open a sealed `body` in place. CTR mode is its own inverse.
pub fn open_payload(cmd: u16, seq: u16, body: &mut [u8], key: &SealKey) {
    seal_payload(cmd, seq, body, key);
}
