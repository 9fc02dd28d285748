//! Sans-IO implementation of the tern IM wire protocol.
//!
//! This crate knows nothing about sockets or tasks. It provides:
//!
//! - [`wire`] — primitive payload field reader/writer
//! - [`packet`] — logical packet types, command ids, identifier newtypes
//! - [`frame`] — the packet codec: framing, checksum, payload sealing
//! - [`handshake`] — step functions for the login key exchange and
//!   credential submission
//! - [`directory`] — payload builders/parsers for the contact directory
//!
//! The async client in `tern-client` drives these over a real connection.

#![deny(unsafe_code)]

pub mod directory;
pub mod frame;
pub mod handshake;
pub mod packet;
pub mod wire;

pub use frame::{CodecError, Decoded, decode, encode};
pub use packet::{AccountId, GroupId, GroupInternalId, IncomingPacket, InvalidId, OutgoingPacket, cmd};
