//! Error types for tern-client.

use std::{fmt, io};

use tern_proto::frame::CodecError;
use tern_proto::packet::InvalidId;
use tern_proto::{directory, handshake};

/// The error type returned from any operation that talks to the server.
#[derive(Debug)]
pub enum ClientError {
    /// Network / I/O failure.
    Connection(io::Error),
    /// A frame failed structural validation.
    Codec(CodecError),
    /// The login handshake failed at the protocol level.
    Handshake(handshake::Error),
    /// A directory reply could not be understood.
    Directory(directory::Error),
    /// The server answered a command with a status it must not use there.
    Protocol { command: u16, code: u8 },
    /// No matching response arrived within the deadline.
    Timeout,
    /// The operation is not valid in the current session state.
    IllegalState(&'static str),
    /// A caller-supplied identifier was rejected before any I/O.
    Validation(InvalidId),
    /// The requested entity does not exist on the server.
    NotFound,
    /// A helper task went away before producing a result.
    Dropped,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "connection error: {e}"),
            Self::Codec(e) => write!(f, "{e}"),
            Self::Handshake(e) => write!(f, "{e}"),
            Self::Directory(e) => write!(f, "{e}"),
            Self::Protocol { command, code } => {
                write!(f, "unexpected status {code:#04x} for command {command:#06x}")
            }
            Self::Timeout => write!(f, "request timed out"),
            Self::IllegalState(what) => write!(f, "illegal state: {what}"),
            Self::Validation(e) => write!(f, "{e}"),
            Self::NotFound => write!(f, "no such contact"),
            Self::Dropped => write!(f, "request dropped"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        Self::Connection(e)
    }
}

impl From<CodecError> for ClientError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<handshake::Error> for ClientError {
    fn from(e: handshake::Error) -> Self {
        Self::Handshake(e)
    }
}

impl From<directory::Error> for ClientError {
    fn from(e: directory::Error) -> Self {
        Self::Directory(e)
    }
}

impl From<InvalidId> for ClientError {
    fn from(e: InvalidId) -> Self {
        Self::Validation(e)
    }
}
