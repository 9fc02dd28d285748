//! The packet codec: length-delimited framing, checksum, payload sealing.
//!
//! Wire layout of one frame (all little-endian):
//!
//! ```text
//! len:  u32   — byte length of everything after this field
//! cmd:  u16   — command id
//! seq:  u16   — sequence number
//! body: [u8]  — sealed payload (len - 8 bytes)
//! crc:  u32   — CRC-32 over cmd | seq | body
//! ```
//!
//! [`encode`] and [`decode`] are pure functions of their inputs; the only
//! key material is passed in, so the same bytes always produce the same
//! result. [`decode`] supports streamed input: a truncated frame yields
//! [`Decoded::NeedMore`] rather than an error.

use std::fmt;

use tern_crypto::{SealKey, crc32_ieee, open_payload, seal_payload};

use crate::packet::{IncomingPacket, OutgoingPacket};

/// Frames longer than this are rejected as malformed rather than buffered.
pub const MAX_FRAME: usize = 1 << 20;

/// Bytes after the length field that are not body: cmd + seq + crc.
const OVERHEAD: usize = 2 + 2 + 4;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors for structurally invalid complete frames.
#[derive(Clone, Debug, PartialEq)]
pub enum CodecError {
    /// The length field is impossible (shorter than the fixed overhead or
    /// larger than [`MAX_FRAME`]).
    Malformed { len: usize },
    /// The frame checksum did not match its contents.
    ChecksumMismatch { got: u32, expected: u32 },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { len } => write!(f, "malformed frame (len field {len})"),
            Self::ChecksumMismatch { got, expected } => {
                write!(f, "frame CRC mismatch (got {got:#010x}, expected {expected:#010x})")
            }
        }
    }
}

impl std::error::Error for CodecError {}

// ─── Decode result ───────────────────────────────────────────────────────────

/// Outcome of a [`decode`] attempt on a (possibly partial) buffer.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    /// A complete frame was decoded; `consumed` bytes may be drained.
    Packet { packet: IncomingPacket, consumed: usize },
    /// The buffer holds a frame prefix; at least this many more bytes are
    /// needed before another attempt can succeed.
    NeedMore(usize),
}

// ─── Codec ───────────────────────────────────────────────────────────────────

/// Encode a logical packet into one sealed wire frame.
pub fn encode(packet: &OutgoingPacket, key: &SealKey) -> Vec<u8> {
    let mut body = packet.payload.clone();
    seal_payload(packet.command, packet.seq, &mut body, key);

    let len = (body.len() + OVERHEAD) as u32;
    let mut frame = Vec::with_capacity(4 + len as usize);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&packet.command.to_le_bytes());
    frame.extend_from_slice(&packet.seq.to_le_bytes());
    frame.extend_from_slice(&body);

    let crc = crc32_ieee(&frame[4..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Decode the first frame from `buf`, if complete.
///
/// `arrival` is the wire arrival index assigned by the caller; the codec
/// itself holds no state. The checksum is verified over the sealed body, so
/// corruption is detected before any key material is applied.
pub fn decode(buf: &[u8], key: &SealKey, arrival: u64) -> Result<Decoded, CodecError> {
    if buf.len() < 4 {
        return Ok(Decoded::NeedMore(4 - buf.len()));
    }
    let len = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
    if len < OVERHEAD || len > MAX_FRAME {
        return Err(CodecError::Malformed { len });
    }
    let total = 4 + len;
    if buf.len() < total {
        return Ok(Decoded::NeedMore(total - buf.len()));
    }

    let crc_at = total - 4;
    let got = u32::from_le_bytes(buf[crc_at..total].try_into().unwrap());
    let expected = crc32_ieee(&buf[4..crc_at]);
    if got != expected {
        return Err(CodecError::ChecksumMismatch { got, expected });
    }

    let command = u16::from_le_bytes(buf[4..6].try_into().unwrap());
    let seq = u16::from_le_bytes(buf[6..8].try_into().unwrap());
    let mut payload = buf[8..crc_at].to_vec();
    open_payload(command, seq, &mut payload, key);

    Ok(Decoded::Packet {
        packet: IncomingPacket { command, seq, payload, arrival },
        consumed: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::cmd;

    fn sample() -> OutgoingPacket {
        OutgoingPacket::new(cmd::FRIEND_INFO, 0x1234, b"payload bytes".to_vec())
    }

    #[test]
    fn round_trip() {
        let key = SealKey::from_bytes([3u8; 16]);
        let wire = encode(&sample(), &key);

        match decode(&wire, &key, 7).unwrap() {
            Decoded::Packet { packet, consumed } => {
                assert_eq!(consumed, wire.len());
                assert_eq!(packet.command, cmd::FRIEND_INFO);
                assert_eq!(packet.seq, 0x1234);
                assert_eq!(packet.payload, b"payload bytes");
                assert_eq!(packet.arrival, 7);
            }
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn streaming_decode_requests_more_bytes() {
        let key = SealKey::handshake();
        let wire = encode(&sample(), &key);

        // Feed the frame one byte at a time; every prefix must yield
        // NeedMore, and the full buffer must yield the packet.
        for cut in 0..wire.len() {
            match decode(&wire[..cut], &key, 0).unwrap() {
                Decoded::NeedMore(n) => {
                    assert!(n > 0);
                    assert!(cut + n <= wire.len(), "never over-asks");
                }
                Decoded::Packet { .. } => panic!("prefix of {cut} bytes decoded"),
            }
        }
        assert!(matches!(decode(&wire, &key, 0).unwrap(), Decoded::Packet { .. }));
    }

    #[test]
    fn trailing_bytes_are_left_for_the_next_frame() {
        let key = SealKey::handshake();
        let mut wire = encode(&sample(), &key);
        let first_len = wire.len();
        wire.extend_from_slice(&encode(&sample(), &key));

        match decode(&wire, &key, 0).unwrap() {
            Decoded::Packet { consumed, .. } => assert_eq!(consumed, first_len),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let key = SealKey::handshake();
        let mut wire = encode(&sample(), &key);
        let mid = wire.len() / 2;
        wire[mid] ^= 0xff;

        assert!(matches!(
            decode(&wire, &key, 0),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn impossible_length_is_malformed() {
        let key = SealKey::handshake();

        // len = 3 < overhead
        let short = 3u32.to_le_bytes().to_vec();
        assert_eq!(decode(&short, &key, 0), Err(CodecError::Malformed { len: 3 }));

        // len far beyond MAX_FRAME
        let huge = (MAX_FRAME as u32 + 1).to_le_bytes().to_vec();
        assert!(matches!(decode(&huge, &key, 0), Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn wrong_key_still_frames_but_garbles_payload() {
        // Sealing is not integrity: the CRC covers the sealed body, so a
        // wrong key decodes the frame but yields a different payload.
        let k1 = SealKey::from_bytes([1u8; 16]);
        let k2 = SealKey::from_bytes([2u8; 16]);
        let wire = encode(&sample(), &k1);
        match decode(&wire, &k2, 0).unwrap() {
            Decoded::Packet { packet, .. } => assert_ne!(packet.payload, b"payload bytes"),
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn empty_payload_round_trips() {
        let key = SealKey::handshake();
        let p = OutgoingPacket::new(cmd::HEARTBEAT, 9, Vec::new());
        let wire = encode(&p, &key);
        match decode(&wire, &key, 0).unwrap() {
            Decoded::Packet { packet, .. } => {
                assert_eq!(packet.command, cmd::HEARTBEAT);
                assert_eq!(packet.seq, 9);
                assert!(packet.payload.is_empty());
            }
            other => panic!("expected packet, got {other:?}"),
        }
    }
}
