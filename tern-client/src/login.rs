//! The login state machine: key exchange, credential submission, and
//! server challenge handling.

use std::future::Future;
use std::time::{Duration, Instant};

use tern_proto::handshake::{self, LoginStatus};
use tern_proto::packet::{OutgoingPacket, cmd};

use crate::config::{BotConfig, VerifySolver};
use crate::errors::ClientError;
use crate::manager::SessionManager;

/// Terminal outcome of a login attempt.
///
/// Only `Success` leaves the session usable. The challenge variants mean
/// the server asked for verification and no solver answered; the carried
/// data lets the application present the challenge some other way.
#[derive(Clone, Debug, PartialEq)]
pub enum LoginResult {
    /// Logged in; the session key is installed.
    Success { session_id: u32 },
    /// The server rejected the credentials.
    WrongPassword,
    /// A captcha was required and not solved.
    CaptchaRequired { image: Vec<u8> },
    /// Device verification was required and not completed.
    DeviceLockRequired { url: String },
    /// The server replied with a status byte this client does not know.
    UnknownError { code: u8 },
}

/// Drives one login attempt over an existing connection.
pub(crate) struct LoginEngine<'a> {
    pub(crate) manager: &'a SessionManager,
    pub(crate) config: &'a BotConfig,
}

impl LoginEngine<'_> {
    pub(crate) async fn run(&self) -> Result<LoginResult, ClientError> {
        // The login deadline covers only the network phases. Time spent in
        // a solver is bounded by verify_timeout instead, so a human can use
        // all of it without the login expiring under them.
        let mut budget = Budget::new(self.config.login_timeout);

        // Key exchange under the well-known handshake key.
        let (payload, state) = handshake::start();
        let reply = self.exchange(cmd::KEY_EXCHANGE, payload, &mut budget).await?;
        let agreed = handshake::agree(state, &reply.payload)?;

        // Credentials, salted with the server nonce.
        let payload = handshake::credentials(
            self.config.bot_id,
            &self.config.password,
            &self.config.device.model,
            &agreed.server_nonce,
        );
        let reply = self.exchange(cmd::LOGIN, payload, &mut budget).await?;
        let mut status = handshake::read_login_status(&reply.payload)?;

        // The server may chain challenges; each solved answer re-enters
        // status evaluation until a terminal state is reached.
        loop {
            match status {
                LoginStatus::Success { session_id } => {
                    self.manager.install_session(agreed.candidate_key.clone(), session_id)?;
                    tracing::info!(session_id, "login complete");
                    return Ok(LoginResult::Success { session_id });
                }
                LoginStatus::WrongPassword => return Ok(LoginResult::WrongPassword),
                LoginStatus::Other(code) => return Ok(LoginResult::UnknownError { code }),
                LoginStatus::CaptchaRequired { token, image } => {
                    let answer = {
                        let img = image.clone();
                        self.solve(move |s| s.solve_captcha(&img)).await?
                    };
                    match answer {
                        Some(answer) => status = self.verify(&token, &answer, &mut budget).await?,
                        None => return Ok(LoginResult::CaptchaRequired { image }),
                    }
                }
                LoginStatus::DeviceLockRequired { token, url } => {
                    let answer = {
                        let u = url.clone();
                        self.solve(move |s| s.solve_device_lock(&u)).await?
                    };
                    match answer {
                        Some(answer) => status = self.verify(&token, &answer, &mut budget).await?,
                        None => return Ok(LoginResult::DeviceLockRequired { url }),
                    }
                }
            }
        }
    }

    async fn verify(
        &self,
        token: &[u8],
        answer: &str,
        budget: &mut Budget,
    ) -> Result<LoginStatus, ClientError> {
        let payload = handshake::verify(token, answer);
        let reply = self.exchange(cmd::VERIFY, payload, budget).await?;
        Ok(handshake::read_login_status(&reply.payload)?)
    }

    /// Run the solver on a blocking thread, bounded by `verify_timeout`.
    /// No configured solver behaves like a declined challenge.
    async fn solve<F>(&self, f: F) -> Result<Option<String>, ClientError>
    where
        F: FnOnce(&dyn VerifySolver) -> Option<String> + Send + 'static,
    {
        let Some(solver) = self.config.solver.clone() else {
            return Ok(None);
        };
        let task = tokio::task::spawn_blocking(move || f(solver.as_ref()));
        match tokio::time::timeout(self.config.verify_timeout, task).await {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(ClientError::Dropped),
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn exchange(
        &self,
        command: u16,
        payload: Vec<u8>,
        budget: &mut Budget,
    ) -> Result<tern_proto::packet::IncomingPacket, ClientError> {
        let packet = OutgoingPacket::new(command, self.manager.next_seq(), payload);
        budget.run(self.manager.send_and_await(packet, self.config.request_timeout)).await
    }
}

/// Time remaining for the network phases of one login attempt. Only the
/// awaits passed to [`run`](Budget::run) are charged against it.
struct Budget {
    remaining: Duration,
}

impl Budget {
    fn new(total: Duration) -> Self {
        Self { remaining: total }
    }

    async fn run<T, F>(&mut self, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let start = Instant::now();
        let result = tokio::time::timeout(self.remaining, fut).await;
        self.remaining = self.remaining.saturating_sub(start.elapsed());
        match result {
            Ok(inner) => inner,
            Err(_) => Err(ClientError::Timeout),
        }
    }
}
