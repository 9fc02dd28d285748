//! Payload builders and parsers for the contact directory commands.

use std::fmt;

use crate::packet::{AccountId, GroupId, GroupInternalId};
use crate::wire::{self, Reader, Writer};

// ─── Error ───────────────────────────────────────────────────────────────────

/// A directory reply that could not be understood.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The payload could not be read.
    Payload(wire::Error),
    /// A status byte outside the documented set.
    UnknownStatus { code: u8 },
    /// The server returned a zero identifier.
    BadId,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload(e) => write!(f, "malformed directory payload: {e}"),
            Self::UnknownStatus { code } => write!(f, "unknown directory status {code:#04x}"),
            Self::BadId => write!(f, "server returned a zero identifier"),
        }
    }
}

impl std::error::Error for Error {}

impl From<wire::Error> for Error {
    fn from(e: wire::Error) -> Self {
        Self::Payload(e)
    }
}

// ─── Friend info ─────────────────────────────────────────────────────────────

/// Build a FRIEND_INFO query payload.
pub fn friend_query(id: AccountId) -> Vec<u8> {
    Writer::new().u64(id.get()).finish()
}

/// Parsed FRIEND_INFO reply.
#[derive(Clone, Debug, PartialEq)]
pub enum FriendReply {
    Found { nickname: String, remark: String },
    NotFound,
}

/// Parse a FRIEND_INFO reply payload.
pub fn read_friend_reply(payload: &[u8]) -> Result<FriendReply, Error> {
    let mut r = Reader::new(payload);
    match r.u8()? {
        0x00 => Ok(FriendReply::Found { nickname: r.string()?, remark: r.string()? }),
        0x01 => Ok(FriendReply::NotFound),
        code => Err(Error::UnknownStatus { code }),
    }
}

// ─── Group info ──────────────────────────────────────────────────────────────

/// Which namespace a group lookup uses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GroupQuery {
    /// By the public group number.
    ById(GroupId),
    /// By the server-internal routing id.
    ByInternal(GroupInternalId),
}

/// Build a GROUP_INFO query payload.
pub fn group_query(query: GroupQuery) -> Vec<u8> {
    let (ns, raw) = match query {
        GroupQuery::ById(id) => (0u8, id.get()),
        GroupQuery::ByInternal(id) => (1u8, id.get()),
    };
    Writer::new().u8(ns).u64(raw).finish()
}

/// Parsed GROUP_INFO reply. Always carries both ids, so a lookup through
/// either namespace populates the mapping for the other.
#[derive(Clone, Debug, PartialEq)]
pub enum GroupReply {
    Found { id: GroupId, internal: GroupInternalId, name: String },
    NotFound,
}

/// Parse a GROUP_INFO reply payload.
pub fn read_group_reply(payload: &[u8]) -> Result<GroupReply, Error> {
    let mut r = Reader::new(payload);
    match r.u8()? {
        0x00 => {
            let id = GroupId::new(r.u64()?).map_err(|_| Error::BadId)?;
            let internal = GroupInternalId::new(r.u64()?).map_err(|_| Error::BadId)?;
            Ok(GroupReply::Found { id, internal, name: r.string()? })
        }
        0x01 => Ok(GroupReply::NotFound),
        code => Err(Error::UnknownStatus { code }),
    }
}

// ─── Add friend ──────────────────────────────────────────────────────────────

/// Build the first-phase ADD_FRIEND payload: asks whether the target can be
/// added directly, carrying no message.
pub fn add_friend_probe(id: AccountId) -> Vec<u8> {
    Writer::new().u64(id.get()).u8(0).finish()
}

/// Build the second-phase ADD_FRIEND payload carrying the validation
/// message and remark. Only sent after the server asked for validation.
pub fn add_friend_request(id: AccountId, message: &str, remark: &str) -> Vec<u8> {
    Writer::new().u64(id.get()).u8(1).string(message).string(remark).finish()
}

/// Parsed ADD_FRIEND reply for either phase.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AddFriendReply {
    /// The target was added (phase 0) or the validation request was
    /// delivered (phase 1).
    Accepted,
    /// The target is already a friend.
    AlreadyFriend,
    /// The target refuses friend requests.
    Rejected,
    /// The target requires a validation message; re-send with phase 1.
    ValidationNeeded,
}

/// Parse an ADD_FRIEND reply payload.
pub fn read_add_friend_reply(payload: &[u8]) -> Result<AddFriendReply, Error> {
    let mut r = Reader::new(payload);
    match r.u8()? {
        0x00 => Ok(AddFriendReply::Accepted),
        0x01 => Ok(AddFriendReply::AlreadyFriend),
        0x02 => Ok(AddFriendReply::Rejected),
        0x03 => Ok(AddFriendReply::ValidationNeeded),
        code => Err(Error::UnknownStatus { code }),
    }
}
