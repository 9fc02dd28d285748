//! Sans-IO login handshake steps.
//!
//! # Flow
//!
//! ```text
//! let (payload, state) = handshake::start();
//! // send KEY_EXCHANGE, receive reply
//! let agreed = handshake::agree(state, &reply)?;
//! // send LOGIN with handshake::credentials(...), receive reply
//! match handshake::read_login_status(&reply)? { ... }
//! ```
//!
//! The key exchange is a plain Diffie-Hellman over the 2048-bit MODP group
//! (RFC 3526 group 14, g = 2). The shared secret is hashed down to the
//! 16-byte candidate session key; the caller promotes it to THE session key
//! only when the server confirms the credentials.

use std::fmt;

use num_bigint::BigUint;
use num_traits::One;
use tern_crypto::{SealKey, fill_random, sha256};

use crate::wire::{self, Reader, Writer};

/// Key exchange / verify protocol version carried in the first byte.
const VERSION: u8 = 1;

// ─── Group parameters ────────────────────────────────────────────────────────

/// The 2048-bit MODP prime (RFC 3526 group 14).
pub fn dh_prime() -> BigUint {
    const HEX: &[u8] =
        b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
          020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
          4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
          EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
          98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
          9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
          E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
          3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";
    BigUint::parse_bytes(HEX, 16).expect("well-formed prime constant")
}

/// The group generator.
pub const DH_GENERATOR: u32 = 2;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors that can occur while driving the handshake.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The server refused the key exchange outright.
    Refused { code: u8 },
    /// A reply payload could not be read.
    Payload(wire::Error),
    /// The server's public value failed the group range checks.
    KeyOutOfRange,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused { code } => write!(f, "server refused key exchange (code {code:#04x})"),
            Self::Payload(e) => write!(f, "malformed handshake payload: {e}"),
            Self::KeyOutOfRange => write!(f, "server public key out of group range"),
        }
    }
}

impl std::error::Error for Error {}

impl From<wire::Error> for Error {
    fn from(e: wire::Error) -> Self {
        Self::Payload(e)
    }
}

// ─── Key exchange ────────────────────────────────────────────────────────────

/// Opaque state between sending the key exchange and reading the reply.
pub struct KeyExchange {
    a: BigUint,
    client_nonce: [u8; 16],
}

/// Output of a completed key exchange.
#[derive(Debug, PartialEq)]
pub struct Agreed {
    /// The DH-derived key. Becomes the session key on login success.
    pub candidate_key: SealKey,
    /// Server nonce, salted into the credential digest.
    pub server_nonce: [u8; 16],
}

/// Build the key exchange request payload. Returns it with the opaque state
/// needed by [`agree`].
pub fn start() -> (Vec<u8>, KeyExchange) {
    let mut random = [0u8; 272];
    fill_random(&mut random);
    do_start(&random)
}

fn do_start(random: &[u8; 272]) -> (Vec<u8>, KeyExchange) {
    let mut client_nonce = [0u8; 16];
    client_nonce.copy_from_slice(&random[..16]);

    let a = BigUint::from_bytes_be(&random[16..]);
    let g_a = BigUint::from(DH_GENERATOR).modpow(&a, &dh_prime());

    let payload = Writer::new()
        .u8(VERSION)
        .raw(&client_nonce)
        .bytes(&g_a.to_bytes_be())
        .finish();

    (payload, KeyExchange { a, client_nonce })
}

/// Process the server's key exchange reply and derive the candidate key.
pub fn agree(state: KeyExchange, payload: &[u8]) -> Result<Agreed, Error> {
    let KeyExchange { a, client_nonce } = state;

    let mut r = Reader::new(payload);
    let code = r.u8()?;
    if code != 0 {
        return Err(Error::Refused { code });
    }
    let echoed_nonce: [u8; 16] = r.array()?;
    let server_nonce: [u8; 16] = r.array()?;
    let g_b = BigUint::from_bytes_be(&r.bytes()?);

    if echoed_nonce != client_nonce {
        // A mismatched echo means the reply belongs to someone else's
        // exchange; treat it like a refusal rather than deriving a key.
        return Err(Error::Refused { code: 0xff });
    }

    let prime = dh_prime();
    let one = BigUint::one();
    check_in_range(&g_b, &one, &(&prime - &one))?;
    let safety = BigUint::one() << (2048 - 64);
    check_in_range(&g_b, &safety, &(&prime - &safety))?;

    let shared = g_b.modpow(&a, &prime);
    let digest = sha256!(&shared.to_bytes_be());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);

    let candidate_key = SealKey::from_bytes(key);
    log::debug!("key exchange complete ({candidate_key:?})");
    Ok(Agreed { candidate_key, server_nonce })
}

fn check_in_range(val: &BigUint, lo: &BigUint, hi: &BigUint) -> Result<(), Error> {
    if lo < val && val < hi { Ok(()) } else { Err(Error::KeyOutOfRange) }
}

// ─── Credential submission ───────────────────────────────────────────────────

/// Build the LOGIN payload.
///
/// The password itself never crosses the wire: the payload carries
/// `SHA-256(SHA-256(password) || server_nonce)`.
pub fn credentials(bot_id: u64, password: &str, device_model: &str, server_nonce: &[u8; 16]) -> Vec<u8> {
    let inner = sha256!(password.as_bytes());
    let digest = sha256!(&inner, server_nonce);

    Writer::new()
        .u8(VERSION)
        .u64(bot_id)
        .raw(&digest)
        .string(device_model)
        .finish()
}

/// Build the VERIFY payload carrying an external answer (captcha text or
/// device verification code) back to the server.
pub fn verify(token: &[u8], answer: &str) -> Vec<u8> {
    Writer::new()
        .u8(VERSION)
        .bytes(token)
        .string(answer)
        .finish()
}

// ─── Login status ────────────────────────────────────────────────────────────

/// Decoded LOGIN / VERIFY reply.
#[derive(Clone, Debug, PartialEq)]
pub enum LoginStatus {
    /// Credentials accepted; the candidate key may be promoted.
    Success { session_id: u32 },
    /// Credentials rejected.
    WrongPassword,
    /// The server wants a captcha solved before continuing.
    CaptchaRequired { token: Vec<u8>, image: Vec<u8> },
    /// The account has device lock enabled; out-of-band verification needed.
    DeviceLockRequired { token: Vec<u8>, url: String },
    /// A status byte this client does not know.
    Other(u8),
}

/// Status bytes used on the wire.
mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const WRONG_PASSWORD: u8 = 0x01;
    pub const CAPTCHA: u8 = 0x02;
    pub const DEVICE_LOCK: u8 = 0x03;
}

/// Parse a LOGIN or VERIFY reply payload.
pub fn read_login_status(payload: &[u8]) -> Result<LoginStatus, Error> {
    let mut r = Reader::new(payload);
    Ok(match r.u8()? {
        status::SUCCESS => LoginStatus::Success { session_id: r.u32()? },
        status::WRONG_PASSWORD => LoginStatus::WrongPassword,
        status::CAPTCHA => LoginStatus::CaptchaRequired { token: r.bytes()?, image: r.bytes()? },
        status::DEVICE_LOCK => LoginStatus::DeviceLockRequired { token: r.bytes()?, url: r.string()? },
        code => LoginStatus::Other(code),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Plays the server's half of the exchange against a client state.
    fn server_reply(client_payload: &[u8], b_seed: u8) -> (Vec<u8>, SealKey, [u8; 16]) {
        let mut r = Reader::new(client_payload);
        assert_eq!(r.u8().unwrap(), VERSION);
        let client_nonce: [u8; 16] = r.array().unwrap();
        let g_a = BigUint::from_bytes_be(&r.bytes().unwrap());

        let prime = dh_prime();
        let b = BigUint::from_bytes_be(&[b_seed; 64]);
        let g_b = BigUint::from(DH_GENERATOR).modpow(&b, &prime);
        let shared = g_a.modpow(&b, &prime);
        let digest = sha256!(&shared.to_bytes_be());
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest[..16]);

        let server_nonce = [0xabu8; 16];
        let payload = Writer::new()
            .u8(0)
            .raw(&client_nonce)
            .raw(&server_nonce)
            .bytes(&g_b.to_bytes_be())
            .finish();
        (payload, SealKey::from_bytes(key), server_nonce)
    }

    #[test]
    fn both_sides_agree_on_the_key() {
        let (payload, state) = start();
        let (reply, server_key, server_nonce) = server_reply(&payload, 0x5c);

        let agreed = agree(state, &reply).unwrap();
        assert_eq!(agreed.candidate_key, server_key);
        assert_eq!(agreed.server_nonce, server_nonce);
    }

    #[test]
    fn refusal_code_is_surfaced() {
        let (_, state) = start();
        let reply = Writer::new().u8(7).finish();
        assert_eq!(agree(state, &reply), Err(Error::Refused { code: 7 }));
    }

    #[test]
    fn nonce_echo_mismatch_is_rejected() {
        let (payload, state) = start();
        let (mut reply, _, _) = server_reply(&payload, 0x11);
        reply[1] ^= 0xff; // first byte of the echoed nonce
        assert_eq!(agree(state, &reply), Err(Error::Refused { code: 0xff }));
    }

    #[test]
    fn trivial_server_key_is_rejected() {
        let (payload, state) = start();
        let mut r = Reader::new(&payload);
        r.u8().unwrap();
        let client_nonce: [u8; 16] = r.array().unwrap();

        // g_b = 1 is outside the allowed range whatever the exponent was.
        let reply = Writer::new()
            .u8(0)
            .raw(&client_nonce)
            .raw(&[0u8; 16])
            .bytes(&BigUint::one().to_bytes_be())
            .finish();
        assert_eq!(agree(state, &reply), Err(Error::KeyOutOfRange));
    }

    #[test]
    fn truncated_reply_is_a_payload_error() {
        let (_, state) = start();
        assert!(matches!(agree(state, &[0u8]), Err(Error::Payload(_))));
    }

    #[test]
    fn credential_digest_depends_on_the_nonce() {
        let a = credentials(10, "hunter2", "linux", &[1u8; 16]);
        let b = credentials(10, "hunter2", "linux", &[2u8; 16]);
        assert_ne!(a, b);
        // Same inputs are deterministic.
        assert_eq!(a, credentials(10, "hunter2", "linux", &[1u8; 16]));
    }

    #[test]
    fn login_status_variants_parse() {
        let ok = Writer::new().u8(0x00).u32(0xc0ffee).finish();
        assert_eq!(
            read_login_status(&ok).unwrap(),
            LoginStatus::Success { session_id: 0xc0ffee }
        );

        let wrong = Writer::new().u8(0x01).finish();
        assert_eq!(read_login_status(&wrong).unwrap(), LoginStatus::WrongPassword);

        let captcha = Writer::new().u8(0x02).bytes(b"tok").bytes(b"png").finish();
        assert_eq!(
            read_login_status(&captcha).unwrap(),
            LoginStatus::CaptchaRequired { token: b"tok".to_vec(), image: b"png".to_vec() }
        );

        let lock = Writer::new().u8(0x03).bytes(b"tok").string("https://verify").finish();
        assert_eq!(
            read_login_status(&lock).unwrap(),
            LoginStatus::DeviceLockRequired { token: b"tok".to_vec(), url: "https://verify".into() }
        );

        let other = Writer::new().u8(0x7f).finish();
        assert_eq!(read_login_status(&other).unwrap(), LoginStatus::Other(0x7f));
    }
}
