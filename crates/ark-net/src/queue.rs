//! Inbound message queue bridging the network thread and the logic thread.
//!
//! Only the transport side pushes and only the thread calling
//! [`TcpClient::tick`](crate::TcpClient::tick) pops. The queue is a
//! [`crossbeam_channel`] pair, so pushes never wait on a drain in progress.

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::{ConnectionId, FrameHeader};

/// Connection lifecycle events reported to the event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetEvent {
    /// The transport finished the handshake.
    Connected,
    /// The peer closed, the transport failed, or the connection was closed locally.
    Disconnected,
}

/// One entry in a connection's inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedMessage {
    /// Connection established.
    Connected {
        /// The new connection.
        connection_id: ConnectionId,
        /// Target bus id the connection was started for.
        target_id: i32,
    },
    /// Connection gone; the entity is removed after this is dispatched.
    Disconnected {
        /// The closed connection.
        connection_id: ConnectionId,
        /// Target bus id the connection was started for.
        target_id: i32,
    },
    /// One decoded frame.
    Data {
        /// Decoded header.
        header: FrameHeader,
        /// Body bytes, exactly `header.body_length` long.
        body: Bytes,
        /// Connection the frame arrived on.
        connection_id: ConnectionId,
    },
}

/// Thread-safe FIFO of [`QueuedMessage`]s.
pub struct MessageQueue {
    tx: Sender<QueuedMessage>,
    rx: Receiver<QueuedMessage>,
}

impl MessageQueue {
    /// Create an empty, unbounded queue.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Append a message. Insertion order is dispatch order.
    pub fn push(&self, message: QueuedMessage) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.tx.send(message);
    }

    /// Take the oldest message, or `None` when empty.
    pub fn pop(&self) -> Option<QueuedMessage> {
        match self.rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Snapshot of the queued message count.
    ///
    /// A tick drains at most this many messages so anything pushed during
    /// the drain waits for the next tick.
    pub fn count(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}
