//! A scripted in-process server for exercising the client end to end.
//!
//! Speaks the real wire protocol over a loopback TCP socket: it runs the
//! server half of the key exchange, checks the credential digest, and
//! answers directory commands from tables provided by the test.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use num_bigint::BigUint;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tern_crypto::{SealKey, sha256};
use tern_proto::frame::{self, Decoded};
use tern_proto::handshake;
use tern_proto::packet::{IncomingPacket, OutgoingPacket, cmd};
use tern_proto::wire::{Reader, Writer};

pub const PASSWORD: &str = "hunter2";
pub const SESSION_ID: u32 = 7;

/// How the server treats a LOGIN with a correct credential digest.
pub enum LoginMode {
    AcceptAll,
    WrongPassword,
    CaptchaThenAccept { token: Vec<u8>, image: Vec<u8>, answer: String },
}

/// How the server treats an ADD_FRIEND for a given target.
#[derive(Clone, Copy)]
pub enum AddFriendMode {
    Accept,
    AlreadyFriend,
    Reject,
    NeedValidation,
}

/// Optional per-request artificial delay, for reordering responses.
pub type DelayFn = Arc<dyn Fn(&IncomingPacket) -> Option<Duration> + Send + Sync>;

pub struct Script {
    pub login: LoginMode,
    /// (nickname, remark) by account number.
    pub friends: HashMap<u64, (String, String)>,
    /// (public id, internal id, name).
    pub groups: Vec<(u64, u64, String)>,
    pub add_friend: HashMap<u64, AddFriendMode>,
    /// Commands the server swallows without answering.
    pub silent: HashSet<u16>,
    pub delay: Option<DelayFn>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            login: LoginMode::AcceptAll,
            friends: HashMap::new(),
            groups: Vec::new(),
            add_friend: HashMap::new(),
            silent: HashSet::new(),
            delay: None,
        }
    }
}

enum Ctl {
    Push { command: u16, payload: Vec<u8> },
    PushCorrupted { command: u16, payload: Vec<u8> },
    Close,
}

pub struct TestServer {
    pub addr: String,
    ctl: mpsc::UnboundedSender<Ctl>,
    commands: Arc<Mutex<Vec<u16>>>,
    /// Phase-1 ADD_FRIEND bodies: (target, message, remark).
    pub friend_requests: Arc<Mutex<Vec<(u64, String, String)>>>,
}

impl TestServer {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let friend_requests = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(serve(
            listener,
            script,
            ctl_rx,
            Arc::clone(&commands),
            Arc::clone(&friend_requests),
        ));
        Self { addr, ctl: ctl_tx, commands, friend_requests }
    }

    /// Inject a server push (sequence number 0).
    pub fn push(&self, command: u16, payload: Vec<u8>) {
        let _ = self.ctl.send(Ctl::Push { command, payload });
    }

    /// Inject a push whose body is flipped after the checksum was computed,
    /// so the frame arrives length-intact but fails CRC verification.
    pub fn push_corrupted(&self, command: u16, payload: Vec<u8>) {
        let _ = self.ctl.send(Ctl::PushCorrupted { command, payload });
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        let _ = self.ctl.send(Ctl::Close);
    }

    /// How many requests with this command the server has seen.
    pub fn count(&self, command: u16) -> usize {
        self.commands.lock().unwrap().iter().filter(|&&c| c == command).count()
    }
}

struct HandshakeState {
    candidate: Option<SealKey>,
    server_nonce: [u8; 16],
    pending_token: Vec<u8>,
    expected_answer: Option<String>,
}

async fn serve(
    listener: TcpListener,
    script: Script,
    mut ctl: mpsc::UnboundedReceiver<Ctl>,
    commands: Arc<Mutex<Vec<u16>>>,
    friend_requests: Arc<Mutex<Vec<(u64, String, String)>>>,
) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut key = SealKey::handshake();
    let mut buf: Vec<u8> = Vec::new();
    let mut arrival = 0u64;
    let mut hs = HandshakeState {
        candidate: None,
        server_nonce: [0x42; 16],
        pending_token: Vec::new(),
        expected_answer: None,
    };
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    loop {
        while let Ok(Decoded::Packet { packet, consumed }) = frame::decode(&buf, &key, arrival) {
            buf.drain(..consumed);
            arrival += 1;
            commands.lock().unwrap().push(packet.command);
            if script.silent.contains(&packet.command) {
                continue;
            }

            let (reply, new_key) = respond(&script, &mut hs, &packet, &friend_requests);
            if let Some(payload) = reply {
                let out = OutgoingPacket::new(packet.command, packet.seq, payload);
                let bytes = frame::encode(&out, &key);
                match script.delay.as_ref().and_then(|d| d(&packet)) {
                    Some(delay) => {
                        let tx = out_tx.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send(bytes);
                        });
                    }
                    None => {
                        let _ = out_tx.send(bytes);
                    }
                }
            }
            if let Some(new_key) = new_key {
                key = new_key;
            }
        }

        let mut chunk = [0u8; 4096];
        tokio::select! {
            read = stream.read(&mut chunk) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            },
            Some(bytes) = out_rx.recv() => {
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            ctl_msg = ctl.recv() => match ctl_msg {
                Some(Ctl::Push { command, payload }) => {
                    let bytes = frame::encode(&OutgoingPacket::new(command, 0, payload), &key);
                    if stream.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                Some(Ctl::PushCorrupted { command, payload }) => {
                    let mut bytes = frame::encode(&OutgoingPacket::new(command, 0, payload), &key);
                    bytes[8] ^= 0xff; // first body byte, past the header
                    if stream.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                Some(Ctl::Close) | None => {
                    let _ = stream.shutdown().await;
                    return;
                }
            },
        }
    }
}

fn respond(
    script: &Script,
    hs: &mut HandshakeState,
    packet: &IncomingPacket,
    friend_requests: &Mutex<Vec<(u64, String, String)>>,
) -> (Option<Vec<u8>>, Option<SealKey>) {
    let mut r = Reader::new(&packet.payload);
    match packet.command {
        cmd::KEY_EXCHANGE => {
            let _ver = r.u8().unwrap();
            let client_nonce: [u8; 16] = r.array().unwrap();
            let g_a = BigUint::from_bytes_be(&r.bytes().unwrap());

            let prime = handshake::dh_prime();
            let b = BigUint::from_bytes_be(&[0x5f; 64]);
            let g_b = BigUint::from(handshake::DH_GENERATOR).modpow(&b, &prime);
            let shared = g_a.modpow(&b, &prime);
            let digest = sha256!(&shared.to_bytes_be());
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&digest[..16]);
            hs.candidate = Some(SealKey::from_bytes(raw));

            let payload = Writer::new()
                .u8(0)
                .raw(&client_nonce)
                .raw(&hs.server_nonce)
                .bytes(&g_b.to_bytes_be())
                .finish();
            (Some(payload), None)
        }
        cmd::LOGIN => {
            let _ver = r.u8().unwrap();
            let _bot_id = r.u64().unwrap();
            let digest: [u8; 32] = r.array().unwrap();
            let _device = r.string().unwrap();

            let inner = sha256!(PASSWORD.as_bytes());
            let expected = sha256!(&inner, &hs.server_nonce);
            if digest != expected {
                return (Some(Writer::new().u8(0x01).finish()), None);
            }
            match &script.login {
                LoginMode::AcceptAll => success(hs),
                LoginMode::WrongPassword => (Some(Writer::new().u8(0x01).finish()), None),
                LoginMode::CaptchaThenAccept { token, image, answer } => {
                    hs.pending_token = token.clone();
                    hs.expected_answer = Some(answer.clone());
                    let payload = Writer::new().u8(0x02).bytes(token).bytes(image).finish();
                    (Some(payload), None)
                }
            }
        }
        cmd::VERIFY => {
            let _ver = r.u8().unwrap();
            let token = r.bytes().unwrap();
            let answer = r.string().unwrap();
            if token == hs.pending_token && Some(&answer) == hs.expected_answer.as_ref() {
                success(hs)
            } else {
                (Some(Writer::new().u8(0x01).finish()), None)
            }
        }
        cmd::HEARTBEAT => (Some(Vec::new()), None),
        cmd::FRIEND_INFO => {
            let id = r.u64().unwrap();
            let payload = match script.friends.get(&id) {
                Some((nickname, remark)) => {
                    Writer::new().u8(0x00).string(nickname).string(remark).finish()
                }
                None => Writer::new().u8(0x01).finish(),
            };
            (Some(payload), None)
        }
        cmd::GROUP_INFO => {
            let ns = r.u8().unwrap();
            let raw = r.u64().unwrap();
            let found = script
                .groups
                .iter()
                .find(|(id, internal, _)| if ns == 0 { *id == raw } else { *internal == raw });
            let payload = match found {
                Some((id, internal, name)) => {
                    Writer::new().u8(0x00).u64(*id).u64(*internal).string(name).finish()
                }
                None => Writer::new().u8(0x01).finish(),
            };
            (Some(payload), None)
        }
        cmd::ADD_FRIEND => {
            let id = r.u64().unwrap();
            let phase = r.u8().unwrap();
            if phase == 1 {
                let message = r.string().unwrap();
                let remark = r.string().unwrap();
                friend_requests.lock().unwrap().push((id, message, remark));
            }
            let mode = script.add_friend.get(&id).copied().unwrap_or(AddFriendMode::Accept);
            let code = match (mode, phase) {
                (AddFriendMode::Accept, _) => 0x00,
                (AddFriendMode::AlreadyFriend, _) => 0x01,
                (AddFriendMode::Reject, _) => 0x02,
                (AddFriendMode::NeedValidation, 0) => 0x03,
                (AddFriendMode::NeedValidation, _) => 0x00,
            };
            (Some(Writer::new().u8(code).finish()), None)
        }
        other => panic!("scripted server got unexpected command {other:#06x}"),
    }
}

fn success(hs: &mut HandshakeState) -> (Option<Vec<u8>>, Option<SealKey>) {
    let payload = Writer::new().u8(0x00).u32(SESSION_ID).finish();
    (Some(payload), hs.candidate.clone())
}
