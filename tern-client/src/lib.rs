//! Async client engine for the tern IM protocol.
//!
//! [`Bot`] is the entry point: connect, log in, then talk to the contact
//! directory or consume server pushes.
//!
//! ```no_run
//! use tern_client::{Bot, BotConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tern_client::ClientError> {
//!     let config = BotConfig {
//!         server_addr: "im.example.com:8080".to_string(),
//!         bot_id: 123456,
//!         password: "hunter2".to_string(),
//!         ..Default::default()
//!     };
//!     let bot = Bot::connect(config).await?;
//!     bot.login().await?;
//!
//!     let friend = bot.get_friend(654321).await?;
//!     println!("{}", friend.nickname);
//!     Ok(())
//! }
//! ```
#![deny(unsafe_code)]

pub mod config;
pub mod contacts;
pub mod errors;
pub mod event;
pub mod login;
pub mod manager;
pub mod socket;

use std::sync::Arc;
use std::time::Duration;

use tern_proto::directory::GroupQuery;
use tern_proto::packet::{AccountId, GroupId, GroupInternalId, IncomingPacket, OutgoingPacket, cmd};

pub use crate::config::{BotConfig, DeviceInfo, VerifySolver};
pub use crate::contacts::{AddFriendResult, ContactDirectory, Deferred, Friend, Group};
pub use crate::errors::ClientError;
pub use crate::event::{Event, EventStream};
pub use crate::login::LoginResult;
pub use crate::manager::SessionManager;

struct BotInner {
    manager: SessionManager,
    directory: ContactDirectory,
    config: BotConfig,
}

/// A bot account bound to one server connection.
///
/// Cheap to clone; clones share the connection, session, and caches.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    /// Open the connection. Does not log in.
    pub async fn connect(config: BotConfig) -> Result<Self, ClientError> {
        let manager = SessionManager::connect(&config.server_addr).await?;
        let directory = ContactDirectory::new(manager.clone(), config.request_timeout);
        Ok(Self { inner: Arc::new(BotInner { manager, directory, config }) })
    }

    /// Run the login handshake. On success the heartbeat task starts and
    /// the contact caches are reset.
    pub async fn login(&self) -> Result<LoginResult, ClientError> {
        let result = self.inner.manager.login(&self.inner.config).await?;
        if let LoginResult::Success { .. } = result {
            self.inner.directory.invalidate();
            self.spawn_heartbeat();
        }
        Ok(result)
    }

    /// Look up a friend by account number.
    pub async fn get_friend(&self, id: i64) -> Result<Friend, ClientError> {
        let id = AccountId::try_from(id)?;
        self.inner.directory.get_friend(id).await
    }

    /// Look up a group by its public number.
    pub async fn get_group(&self, id: i64) -> Result<Group, ClientError> {
        let id = GroupId::try_from(id)?;
        self.inner.directory.get_group(GroupQuery::ById(id)).await
    }

    /// Look up a group by its server-internal id.
    pub async fn get_group_by_internal(&self, id: i64) -> Result<Group, ClientError> {
        let id = GroupInternalId::try_from(id)?;
        self.inner.directory.get_group(GroupQuery::ByInternal(id)).await
    }

    /// Send a friend request to `id`.
    ///
    /// `message` and `remark` are deferred: when the target accepts
    /// requests directly, neither is ever computed.
    pub async fn add_friend(
        &self,
        id: i64,
        message: Deferred,
        remark: Deferred,
    ) -> Result<AddFriendResult, ClientError> {
        let id = AccountId::try_from(id)?;
        self.inner.directory.add_friend(id, message, remark).await
    }

    /// Send a raw packet without waiting for a response.
    pub async fn send_packet(&self, packet: &OutgoingPacket) -> Result<(), ClientError> {
        self.inner.manager.send_packet(packet).await
    }

    /// Send a raw packet and wait for its response. `timeout` defaults to
    /// the configured request timeout.
    pub async fn send_and_await(
        &self,
        packet: OutgoingPacket,
        timeout: Option<Duration>,
    ) -> Result<IncomingPacket, ClientError> {
        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);
        self.inner.manager.send_and_await(packet, timeout).await
    }

    /// Allocate a sequence number for a raw packet.
    pub fn next_seq(&self) -> u16 {
        self.inner.manager.next_seq()
    }

    /// Subscribe to server pushes.
    pub fn stream_events(&self) -> EventStream {
        EventStream { rx: self.inner.manager.subscribe() }
    }

    /// `true` between login success and disconnect.
    pub fn is_alive(&self) -> bool {
        self.inner.manager.is_alive()
    }

    /// The underlying session manager, for code that needs more control
    /// than the façade offers.
    pub fn session_manager(&self) -> &SessionManager {
        &self.inner.manager
    }

    /// Close the connection.
    pub async fn disconnect(&self) {
        self.inner.manager.disconnect().await;
    }

    fn spawn_heartbeat(&self) {
        let manager = self.inner.manager.clone();
        let interval = self.inner.config.heartbeat_interval;
        let timeout = self.inner.config.request_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                if !manager.is_alive() {
                    return;
                }
                let ping = OutgoingPacket::new(cmd::HEARTBEAT, manager.next_seq(), Vec::new());
                if let Err(e) = manager.send_and_await(ping, timeout).await {
                    tracing::warn!(error = %e, "heartbeat failed, closing connection");
                    manager.disconnect().await;
                    return;
                }
                tracing::trace!("heartbeat ok");
            }
        });
    }
}
