//! Logical packet types, command ids, and identifier newtypes.

use std::fmt;

// ─── Command ids ─────────────────────────────────────────────────────────────

/// Command ids carried in the frame header.
pub mod cmd {
    pub const KEY_EXCHANGE: u16 = 0x0825;
    pub const LOGIN: u16 = 0x0836;
    pub const VERIFY: u16 = 0x00ba;
    pub const HEARTBEAT: u16 = 0x0058;
    pub const FRIEND_INFO: u16 = 0x00ce;
    pub const GROUP_INFO: u16 = 0x00d2;
    pub const ADD_FRIEND: u16 = 0x00a8;
    pub const SERVER_PUSH: u16 = 0x0017;

    /// Commands a client may send before the session is authenticated.
    pub fn is_handshake(command: u16) -> bool {
        matches!(command, KEY_EXCHANGE | LOGIN | VERIFY)
    }
}

// ─── Packets ─────────────────────────────────────────────────────────────────

/// An outgoing packet, immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingPacket {
    /// Command id.
    pub command: u16,
    /// Session-scoped sequence number used to correlate the response.
    pub seq: u16,
    /// Unsealed payload bytes.
    pub payload: Vec<u8>,
}

impl OutgoingPacket {
    pub fn new(command: u16, seq: u16, payload: Vec<u8>) -> Self {
        Self { command, seq, payload }
    }
}

/// An incoming packet produced by the codec.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingPacket {
    /// Command id.
    pub command: u16,
    /// Sequence number echoed by the server (0 for pushes).
    pub seq: u16,
    /// Opened payload bytes.
    pub payload: Vec<u8>,
    /// Position in wire arrival order, assigned by the receiver loop.
    pub arrival: u64,
}

// ─── Identifier newtypes ─────────────────────────────────────────────────────

/// A rejected identifier: zero, or negative before coercion.
#[derive(Clone, Debug, PartialEq)]
pub struct InvalidId {
    /// The raw value as given by the caller.
    pub raw: i64,
}

impl fmt::Display for InvalidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "identifier must be strictly positive (got {})", self.raw)
    }
}

impl std::error::Error for InvalidId {}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Construct from a raw value, rejecting zero.
            pub fn new(raw: u64) -> Result<Self, InvalidId> {
                if raw == 0 {
                    Err(InvalidId { raw: 0 })
                } else {
                    Ok(Self(raw))
                }
            }

            /// The raw numeric value. Always `> 0`.
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = InvalidId;

            fn try_from(raw: i64) -> Result<Self, InvalidId> {
                if raw <= 0 {
                    Err(InvalidId { raw })
                } else {
                    Ok(Self(raw as u64))
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type! {
    /// An individual account number.
    AccountId
}

id_type! {
    /// A group's public number — the one members see.
    GroupId
}

id_type! {
    /// A group's internal id — the server-side routing id, a separate
    /// namespace from [`GroupId`].
    GroupInternalId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ids_are_rejected() {
        assert!(AccountId::new(0).is_err());
        assert!(GroupId::new(0).is_err());
        assert!(GroupInternalId::new(0).is_err());
        assert_eq!(AccountId::new(10).unwrap().get(), 10);
    }

    #[test]
    fn negative_coercions_are_rejected() {
        assert_eq!(AccountId::try_from(-5), Err(InvalidId { raw: -5 }));
        assert_eq!(GroupId::try_from(0), Err(InvalidId { raw: 0 }));
        assert_eq!(GroupInternalId::try_from(7).unwrap().get(), 7);
    }

    #[test]
    fn handshake_commands() {
        assert!(cmd::is_handshake(cmd::KEY_EXCHANGE));
        assert!(cmd::is_handshake(cmd::LOGIN));
        assert!(cmd::is_handshake(cmd::VERIFY));
        assert!(!cmd::is_handshake(cmd::FRIEND_INFO));
        assert!(!cmd::is_handshake(cmd::HEARTBEAT));
    }
}
