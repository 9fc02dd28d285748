//! Thin TCP wrapper used by the session manager.
//!
//! Framing and sealing live a layer up; this only moves bytes. There is no
//! reconnect policy: any error surfaces to the session manager, which tears
//! the session down.

use std::io;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// A connected transport socket.
pub struct TransportSocket {
    stream: TcpStream,
}

impl TransportSocket {
    /// Open a TCP connection to `addr`.
    pub async fn connect(addr: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(%addr, "connected");
        Ok(Self { stream })
    }

    /// Split into independently owned receive and send halves.
    pub fn into_split(self) -> (SocketReader, SocketWriter) {
        let (read, write) = self.stream.into_split();
        (SocketReader { half: read }, SocketWriter { half: write })
    }
}

/// The receive half, owned by the receiver loop.
pub struct SocketReader {
    half: OwnedReadHalf,
}

impl SocketReader {
    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed.
    pub async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.half.read(buf).await
    }
}

/// The send half, owned by the session manager.
pub struct SocketWriter {
    half: OwnedWriteHalf,
}

impl SocketWriter {
    /// Write all of `bytes`.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.half.write_all(bytes).await
    }

    /// Shut the write direction down.
    pub async fn close(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}
