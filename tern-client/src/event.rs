//! Server pushes surfaced to the application.

use tokio::sync::mpsc;

/// A server-initiated packet (sequence number 0 on the wire).
#[derive(Clone, Debug)]
pub struct Event {
    /// Command id of the push.
    pub command: u16,
    /// Opened payload bytes.
    pub payload: Vec<u8>,
    /// Position in wire arrival order. Strictly increasing per connection,
    /// shared with response packets.
    pub arrival: u64,
}

/// An async stream of [`Event`]s.
///
/// Obtained from [`Bot::stream_events`](crate::Bot::stream_events). Pushes
/// that arrive while nobody holds a stream are dropped, not buffered.
pub struct EventStream {
    pub(crate) rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// The next push, or `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}
