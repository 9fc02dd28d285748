//! Primitive payload fields: little-endian integers and length-prefixed
//! byte strings (`u16` length, no padding).

use std::fmt;

// ─── Error ───────────────────────────────────────────────────────────────────

/// Errors that can occur while reading payload fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Ran out of bytes before the field was fully read.
    UnexpectedEof,
    /// A string field did not hold valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of payload"),
            Self::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for payload reads.
pub type Result<T> = std::result::Result<T, Error>;

// ─── Reader ──────────────────────────────────────────────────────────────────

/// A zero-copy cursor over an in-memory payload.
///
/// Avoids `std::io::Cursor` and its wide error surface; only the two error
/// cases above can ever occur while reading a payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Remaining bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof);
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Read a fixed-size array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into().unwrap())
    }

    /// Read a `u16`-length-prefixed byte string.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u16()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a `u16`-length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String> {
        String::from_utf8(self.bytes()?).map_err(|_| Error::InvalidUtf8)
    }
}

// ─── Writer ──────────────────────────────────────────────────────────────────

/// Builds a payload byte vector field by field.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn raw(mut self, v: &[u8]) -> Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Write a `u16`-length-prefixed byte string.
    ///
    /// Nothing in the protocol legitimately carries a field longer than
    /// `u16::MAX` bytes; passing one is a caller bug. Debug builds panic,
    /// release builds truncate and log.
    pub fn bytes(mut self, v: &[u8]) -> Self {
        debug_assert!(v.len() <= u16::MAX as usize, "payload field of {} bytes", v.len());
        let len = v.len().min(u16::MAX as usize);
        if len < v.len() {
            log::warn!("truncating {}-byte payload field to {len}", v.len());
        }
        self.buf.extend_from_slice(&(len as u16).to_le_bytes());
        self.buf.extend_from_slice(&v[..len]);
        self
    }

    /// Write a `u16`-length-prefixed UTF-8 string.
    pub fn string(self, v: &str) -> Self {
        self.bytes(v.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}
