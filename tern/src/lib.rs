//! # tern — async IM bot library
//!
//! `tern` is a modular Rust library for the tern IM protocol. It consists
//! of three focused sub-crates wired together here for convenience:
//!
//! | Sub-crate     | Role                                                |
//! |---------------|-----------------------------------------------------|
//! | `tern-crypto` | Payload sealing, hashing, checksums                 |
//! | `tern-proto`  | Frame codec, handshake steps, directory payloads    |
//! | `tern-client` | Connection, session manager, login engine, contacts |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tern::{Bot, BotConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tern::ClientError> {
//!     let bot = Bot::connect(BotConfig {
//!         server_addr: "im.example.com:8080".to_string(),
//!         bot_id: 123456,
//!         password: "hunter2".to_string(),
//!         ..Default::default()
//!     }).await?;
//!     bot.login().await?;
//!
//!     let mut events = bot.stream_events();
//!     while let Some(event) = events.next().await {
//!         println!("push {:#06x}: {} bytes", event.command, event.payload.len());
//!     }
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Re-export of [`tern_client`] — connection, session, login, contacts.
pub use tern_client as client;

/// Re-export of [`tern_proto`] — frame codec, handshake, directory payloads.
pub use tern_proto as proto;

/// Re-export of [`tern_crypto`] — sealing, hashing, checksums.
pub use tern_crypto as crypto;

// ─── Convenience re-exports ───────────────────────────────────────────────────

pub use tern_client::{
    AddFriendResult,
    Bot,
    BotConfig,
    ClientError,
    Deferred,
    DeviceInfo,
    Event,
    EventStream,
    Friend,
    Group,
    LoginResult,
    VerifySolver,
};

pub use tern_proto::{IncomingPacket, OutgoingPacket, cmd};
pub use tern_proto::packet::{AccountId, GroupId, GroupInternalId};
