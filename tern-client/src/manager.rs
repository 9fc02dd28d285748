//! Session manager: owns the connection, correlates requests with
//! responses, and routes server pushes.
//!
//! One connection has exactly one receiver loop and one writer. All sends
//! funnel through [`SessionManager::send_packet`]; all reads happen in the
//! loop spawned by [`SessionManager::connect`].

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tern_crypto::SealKey;
use tern_proto::frame::{self, CodecError, Decoded};
use tern_proto::packet::{IncomingPacket, OutgoingPacket, cmd};

use crate::config::BotConfig;
use crate::errors::ClientError;
use crate::event::Event;
use crate::login::{LoginEngine, LoginResult};
use crate::socket::{SocketReader, SocketWriter, TransportSocket};

const READ_CHUNK: usize = 8 * 1024;

#[derive(Default)]
struct SessionState {
    key: Option<SealKey>,
    session_id: Option<u32>,
    alive: bool,
}

struct Shared {
    writer: tokio::sync::Mutex<Option<SocketWriter>>,
    pending: Mutex<HashMap<u16, oneshot::Sender<IncomingPacket>>>,
    session: Mutex<SessionState>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
    next_seq: AtomicU16,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

/// Handle to one connection. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    /// Connect to the server and spawn the receiver loop.
    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        let socket = TransportSocket::connect(addr).await?;
        let (reader, writer) = socket.into_split();

        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Some(writer)),
            pending: Mutex::new(HashMap::new()),
            session: Mutex::new(SessionState::default()),
            listeners: Mutex::new(Vec::new()),
            next_seq: AtomicU16::new(1),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(receiver_loop(Arc::clone(&shared), reader));
        Ok(Self { shared })
    }

    /// Run the login handshake against this connection.
    ///
    /// On success the session key is installed and non-handshake commands
    /// become sendable. The network phases are bounded by
    /// `config.login_timeout`; time spent in a [`VerifySolver`] is bounded
    /// by `config.verify_timeout` and not charged against the login
    /// deadline.
    ///
    /// [`VerifySolver`]: crate::config::VerifySolver
    pub async fn login(&self, config: &BotConfig) -> Result<LoginResult, ClientError> {
        LoginEngine { manager: self, config }.run().await
    }

    /// Next free sequence number. Skips 0 (reserved for pushes) and any
    /// value with a response still outstanding.
    pub fn next_seq(&self) -> u16 {
        loop {
            let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
            if seq == 0 {
                continue;
            }
            let pending = lock(&self.shared.pending);
            if !pending.contains_key(&seq) {
                return seq;
            }
        }
    }

    /// Seal and write one packet. Does not wait for a response.
    ///
    /// Before login only handshake commands may pass; anything else is an
    /// [`ClientError::IllegalState`] without touching the socket.
    pub async fn send_packet(&self, packet: &OutgoingPacket) -> Result<(), ClientError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ClientError::Connection(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed",
            )));
        }
        let key = {
            let session = lock(&self.shared.session);
            if !session.alive && !cmd::is_handshake(packet.command) {
                return Err(ClientError::IllegalState("session is not authenticated"));
            }
            self.key_for(&session)
        };

        let wire = frame::encode(packet, &key);
        let mut writer = self.shared.writer.lock().await;
        match writer.as_mut() {
            Some(w) => {
                w.send(&wire).await?;
                tracing::trace!(command = packet.command, seq = packet.seq, len = wire.len(), "sent");
                Ok(())
            }
            None => Err(ClientError::IllegalState("socket is not open")),
        }
    }

    /// Send one packet and wait for the response carrying the same
    /// sequence number, up to `timeout`.
    ///
    /// On timeout or cancellation the pending entry is removed, so the
    /// sequence number becomes reusable.
    pub async fn send_and_await(
        &self,
        packet: OutgoingPacket,
        timeout: Duration,
    ) -> Result<IncomingPacket, ClientError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.shared.pending);
            if pending.contains_key(&packet.seq) {
                return Err(ClientError::IllegalState("sequence number already in flight"));
            }
            pending.insert(packet.seq, tx);
        }
        let mut guard = PendingGuard { shared: &self.shared, seq: packet.seq, armed: true };

        self.send_packet(&packet).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                guard.disarm();
                Ok(response)
            }
            Ok(Err(_)) => {
                // Sender dropped: the receiver loop tore the session down.
                guard.disarm();
                Err(ClientError::Connection(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "connection lost",
                )))
            }
            Err(_) => Err(ClientError::Timeout),
        }
    }

    /// Promote the candidate key to the session key and mark the session
    /// authenticated. Called once, by the login engine.
    pub(crate) fn install_session(&self, key: SealKey, session_id: u32) -> Result<(), ClientError> {
        let mut session = lock(&self.shared.session);
        if session.key.is_some() {
            return Err(ClientError::IllegalState("session key already installed"));
        }
        session.key = Some(key);
        session.session_id = Some(session_id);
        session.alive = true;
        Ok(())
    }

    /// Subscribe to server pushes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared.listeners).push(tx);
        rx
    }

    /// `true` between login success and disconnect.
    pub fn is_alive(&self) -> bool {
        lock(&self.shared.session).alive
    }

    /// The server-assigned session id, once logged in.
    pub fn session_id(&self) -> Option<u32> {
        lock(&self.shared.session).session_id
    }

    /// Number of requests still waiting for a response.
    pub fn pending_len(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Tear the connection down. Outstanding requests fail with a
    /// connection error; further sends are rejected.
    pub async fn disconnect(&self) {
        disconnect_shared(&self.shared).await;
    }

    fn key_for(&self, session: &SessionState) -> SealKey {
        session.key.clone().unwrap_or_else(SealKey::handshake)
    }
}

/// Removes the pending entry on drop unless the response path disarmed it.
struct PendingGuard<'a> {
    shared: &'a Shared,
    seq: u16,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.shared.pending).remove(&self.seq);
        }
    }
}

async fn receiver_loop(shared: Arc<Shared>, mut reader: SocketReader) {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut arrival: u64 = 0;

    loop {
        // Drain complete frames before reading more.
        loop {
            let key = {
                let session = lock(&shared.session);
                session.key.clone().unwrap_or_else(SealKey::handshake)
            };
            match frame::decode(&buf, &key, arrival) {
                Ok(Decoded::Packet { packet, consumed }) => {
                    buf.drain(..consumed);
                    arrival += 1;
                    dispatch(&shared, packet);
                }
                Ok(Decoded::NeedMore(_)) => break,
                Err(CodecError::ChecksumMismatch { got, expected }) => {
                    // The frame structure is intact, only the body is bad.
                    // Skip this frame and keep the stream.
                    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                    tracing::warn!(got, expected, len, "dropping frame with bad checksum");
                    buf.drain(..4 + len);
                    arrival += 1;
                }
                Err(e @ CodecError::Malformed { .. }) => {
                    tracing::warn!(error = %e, "unrecoverable frame, closing connection");
                    disconnect_shared(&shared).await;
                    return;
                }
            }
        }

        let mut chunk = [0u8; READ_CHUNK];
        let read = tokio::select! {
            r = reader.recv(&mut chunk) => r,
            _ = shared.shutdown.cancelled() => return,
        };
        match read {
            Ok(0) => {
                tracing::debug!("server closed the connection");
                disconnect_shared(&shared).await;
                return;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                tracing::warn!(error = %e, "read failed, closing connection");
                disconnect_shared(&shared).await;
                return;
            }
        }
    }
}

fn dispatch(shared: &Shared, packet: IncomingPacket) {
    if packet.seq != 0 {
        let waiter = lock(&shared.pending).remove(&packet.seq);
        match waiter {
            // A closed receiver means the caller timed out or went away.
            Some(tx) => drop(tx.send(packet)),
            None => {
                tracing::debug!(command = packet.command, seq = packet.seq, "response with no waiter")
            }
        }
        return;
    }

    let event = Event { command: packet.command, payload: packet.payload, arrival: packet.arrival };
    let mut listeners = lock(&shared.listeners);
    listeners.retain(|tx| tx.send(event.clone()).is_ok());
}

async fn disconnect_shared(shared: &Shared) {
    shared.closed.store(true, Ordering::Release);
    shared.shutdown.cancel();
    {
        let mut session = lock(&shared.session);
        session.alive = false;
        session.key = None;
    }
    if let Some(mut writer) = shared.writer.lock().await.take() {
        // Best effort; the peer may already be gone.
        let _ = writer.close().await;
    }
    // Dropping the senders fails every outstanding request.
    lock(&shared.pending).clear();
    lock(&shared.listeners).clear();
}

/// Locks a mutex, recovering from poisoning. The maps hold no invariants a
/// panicked holder could have broken halfway.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
