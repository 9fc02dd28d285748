//! Cryptographic primitives for the tern IM protocol.
//!
//! Provides:
//! - `SealKey` — 16-byte payload sealing key with a precomputed id
//! - AES-128-CTR payload sealing keyed by the frame header
//! - SHA-1 / SHA-256 hash macros
//! - CRC-32 (IEEE) for frame checksums

#![deny(unsafe_code)]

mod crc;
mod seal;
mod sha;

pub use crc::crc32_ieee;
pub use seal::{SealKey, open_payload, seal_payload};

/// Fill `buf` with cryptographically secure random bytes.
///
/// Thin wrapper so callers don't need a direct `getrandom` dependency.
pub fn fill_random(buf: &mut [u8]) {
    getrandom::getrandom(buf).expect("getrandom failed");
}
