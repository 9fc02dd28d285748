//! Client configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Answers server challenges that need a human (or an external service).
///
/// Both methods run on a blocking thread, so reading from stdin or calling
/// out to a solver service is fine. Returning `None` declines the challenge
/// and ends the login attempt.
pub trait VerifySolver: Send + Sync + 'static {
    /// Solve a captcha. `image` is the raw picture bytes as sent by the
    /// server.
    fn solve_captcha(&self, image: &[u8]) -> Option<String>;

    /// Obtain the device verification code for the given URL.
    fn solve_device_lock(&self, url: &str) -> Option<String>;
}

/// What the client reports about itself during login.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// Device model string shown in the account's session list.
    pub model: String,
    /// Client version string.
    pub client_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            model: "tern".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration for a [`Bot`](crate::Bot).
///
/// `server_addr`, `bot_id` and `password` have no useful defaults and must
/// be filled in; everything else can be left as-is:
///
/// ```
/// use tern_client::BotConfig;
///
/// let config = BotConfig {
///     server_addr: "127.0.0.1:8080".to_string(),
///     bot_id: 123456,
///     password: "hunter2".to_string(),
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct BotConfig {
    /// Server address, `host:port`.
    pub server_addr: String,
    /// Account number to log in as.
    pub bot_id: u64,
    /// Account password. Never sent in the clear; only a salted digest
    /// crosses the wire.
    pub password: String,
    /// Device identity reported during login.
    pub device: DeviceInfo,
    /// Interval between heartbeats once logged in.
    pub heartbeat_interval: Duration,
    /// Deadline for a single request/response exchange.
    pub request_timeout: Duration,
    /// Deadline for the whole login handshake, solver time excluded.
    pub login_timeout: Duration,
    /// Deadline for one [`VerifySolver`] call.
    pub verify_timeout: Duration,
    /// Challenge solver. With `None`, a captcha or device lock ends the
    /// login attempt.
    pub solver: Option<Arc<dyn VerifySolver>>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            server_addr: String::new(),
            bot_id: 0,
            password: String::new(),
            device: DeviceInfo::default(),
            heartbeat_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(15),
            login_timeout: Duration::from_secs(45),
            verify_timeout: Duration::from_secs(120),
            solver: None,
        }
    }
}

impl fmt::Debug for BotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotConfig")
            .field("server_addr", &self.server_addr)
            .field("bot_id", &self.bot_id)
            .field("device", &self.device)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("request_timeout", &self.request_timeout)
            .field("login_timeout", &self.login_timeout)
            .field("verify_timeout", &self.verify_timeout)
            .field("solver", &self.solver.as_ref().map(|_| "…"))
            .finish_non_exhaustive()
    }
}
