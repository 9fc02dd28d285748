//! The contact directory: cached friend and group lookups plus the
//! two-phase add-friend workflow.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tern_proto::directory::{self, AddFriendReply, FriendReply, GroupQuery, GroupReply};
use tern_proto::packet::{AccountId, GroupId, GroupInternalId, OutgoingPacket, cmd};

use crate::errors::ClientError;
use crate::manager::SessionManager;

/// A friend, as the server last described it.
#[derive(Clone, Debug, PartialEq)]
pub struct Friend {
    pub id: AccountId,
    pub nickname: String,
    /// The bot's own note about this friend. Empty when unset.
    pub remark: String,
}

/// A group, addressable by either of its two id namespaces.
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub internal_id: GroupInternalId,
    pub name: String,
}

/// Outcome of [`ContactDirectory::add_friend`].
#[derive(Clone, Debug, PartialEq)]
pub enum AddFriendResult {
    /// The target is now a friend.
    Success,
    /// The target already was a friend; nothing was sent past the cache.
    AlreadyFriend,
    /// The target refuses friend requests.
    Rejected,
    /// A validation request with the given message was delivered; the
    /// target must approve it before the friendship exists.
    RequiresValidation { message: String },
}

/// A string that may be produced on demand.
///
/// The add-friend probe often succeeds without needing a message; a
/// `Lazy` variant keeps an expensive message computation from running in
/// that case. The closure is invoked at most once.
pub enum Deferred {
    /// No value; resolves to an empty string.
    None,
    /// A value known up front.
    Ready(String),
    /// A value computed only if actually needed.
    Lazy(Box<dyn FnOnce() -> String + Send>),
}

impl Deferred {
    /// Defer computation of the value.
    pub fn lazy<F>(f: F) -> Self
    where
        F: FnOnce() -> String + Send + 'static,
    {
        Self::Lazy(Box::new(f))
    }

    fn resolve(self) -> String {
        match self {
            Self::None => String::new(),
            Self::Ready(s) => s,
            Self::Lazy(f) => f(),
        }
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::None
    }
}

impl From<&str> for Deferred {
    fn from(s: &str) -> Self {
        Self::Ready(s.to_string())
    }
}

impl From<String> for Deferred {
    fn from(s: String) -> Self {
        Self::Ready(s)
    }
}

impl From<Option<String>> for Deferred {
    fn from(s: Option<String>) -> Self {
        match s {
            Some(s) => Self::Ready(s),
            None => Self::None,
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Deferred::None"),
            Self::Ready(s) => f.debug_tuple("Deferred::Ready").field(s).finish(),
            Self::Lazy(_) => f.write_str("Deferred::Lazy(…)"),
        }
    }
}

/// Cached view of the account's friends and groups.
///
/// Lookups hit the cache first and fall through to the server; the cache
/// only ever holds entries the server confirmed. [`invalidate`] drops
/// everything, which a relogin does implicitly.
///
/// [`invalidate`]: ContactDirectory::invalidate
pub struct ContactDirectory {
    manager: SessionManager,
    request_timeout: Duration,
    friends: Mutex<HashMap<AccountId, Friend>>,
    groups: Mutex<HashMap<GroupId, Group>>,
    by_internal: Mutex<HashMap<GroupInternalId, GroupId>>,
}

impl ContactDirectory {
    pub(crate) fn new(manager: SessionManager, request_timeout: Duration) -> Self {
        Self {
            manager,
            request_timeout,
            friends: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            by_internal: Mutex::new(HashMap::new()),
        }
    }

    /// Look a friend up, from cache or from the server.
    ///
    /// [`ClientError::NotFound`] if the account exists but is not a friend
    /// of this bot (or does not exist at all).
    pub async fn get_friend(&self, id: AccountId) -> Result<Friend, ClientError> {
        if let Some(friend) = lock(&self.friends).get(&id) {
            return Ok(friend.clone());
        }

        let reply = self.exchange(cmd::FRIEND_INFO, directory::friend_query(id)).await?;
        match directory::read_friend_reply(&reply.payload)? {
            FriendReply::Found { nickname, remark } => {
                let friend = Friend { id, nickname, remark };
                lock(&self.friends).insert(id, friend.clone());
                Ok(friend)
            }
            FriendReply::NotFound => Err(ClientError::NotFound),
        }
    }

    /// Look a group up through either id namespace.
    ///
    /// A hit through one namespace also populates the mapping for the
    /// other, since the reply always carries both ids.
    pub async fn get_group(&self, query: GroupQuery) -> Result<Group, ClientError> {
        let cached = match query {
            GroupQuery::ById(id) => lock(&self.groups).get(&id).cloned(),
            GroupQuery::ByInternal(internal) => {
                let id = lock(&self.by_internal).get(&internal).copied();
                id.and_then(|id| lock(&self.groups).get(&id).cloned())
            }
        };
        if let Some(group) = cached {
            return Ok(group);
        }

        let reply = self.exchange(cmd::GROUP_INFO, directory::group_query(query)).await?;
        match directory::read_group_reply(&reply.payload)? {
            GroupReply::Found { id, internal, name } => {
                let group = Group { id, internal_id: internal, name };
                lock(&self.groups).insert(id, group.clone());
                lock(&self.by_internal).insert(internal, id);
                Ok(group)
            }
            GroupReply::NotFound => Err(ClientError::NotFound),
        }
    }

    /// Add `id` as a friend.
    ///
    /// Runs in up to two phases: a probe without a message first, then, if
    /// the target requires validation, a second request carrying `message`
    /// and `remark`. The deferred values are only resolved for that second
    /// phase. A cached friend short-circuits with no I/O at all.
    pub async fn add_friend(
        &self,
        id: AccountId,
        message: Deferred,
        remark: Deferred,
    ) -> Result<AddFriendResult, ClientError> {
        if lock(&self.friends).contains_key(&id) {
            return Ok(AddFriendResult::AlreadyFriend);
        }

        let reply = self.exchange(cmd::ADD_FRIEND, directory::add_friend_probe(id)).await?;
        match directory::read_add_friend_reply(&reply.payload)? {
            AddFriendReply::Accepted => {
                self.cache_new_friend(id).await;
                Ok(AddFriendResult::Success)
            }
            AddFriendReply::AlreadyFriend => Ok(AddFriendResult::AlreadyFriend),
            AddFriendReply::Rejected => Ok(AddFriendResult::Rejected),
            AddFriendReply::ValidationNeeded => {
                let message = message.resolve();
                let remark = remark.resolve();
                let payload = directory::add_friend_request(id, &message, &remark);
                let reply = self.exchange(cmd::ADD_FRIEND, payload).await?;
                match directory::read_add_friend_reply(&reply.payload)? {
                    AddFriendReply::Accepted => Ok(AddFriendResult::RequiresValidation { message }),
                    AddFriendReply::AlreadyFriend => Ok(AddFriendResult::AlreadyFriend),
                    AddFriendReply::Rejected => Ok(AddFriendResult::Rejected),
                    // Phase 1 carried the message; asking again is a
                    // server bug, not a state we can make progress from.
                    AddFriendReply::ValidationNeeded => {
                        Err(ClientError::Protocol { command: cmd::ADD_FRIEND, code: 0x03 })
                    }
                }
            }
        }
    }

    /// Drop all cached entries.
    pub fn invalidate(&self) {
        lock(&self.friends).clear();
        lock(&self.groups).clear();
        lock(&self.by_internal).clear();
    }

    /// Best-effort cache fill after a direct add; the friendship exists
    /// whether or not this lookup succeeds.
    async fn cache_new_friend(&self, id: AccountId) {
        if let Err(e) = self.get_friend(id).await {
            tracing::debug!(%id, error = %e, "could not fetch new friend's info");
        }
    }

    async fn exchange(
        &self,
        command: u16,
        payload: Vec<u8>,
    ) -> Result<tern_proto::packet::IncomingPacket, ClientError> {
        let packet = OutgoingPacket::new(command, self.manager.next_seq(), payload);
        self.manager.send_and_await(packet, self.request_timeout).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
