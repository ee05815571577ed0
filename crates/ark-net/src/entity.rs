//! Per-connection state owned by the client session.
//!
//! Lifecycle: Connecting → Connected → Disconnecting → Removed. An entity is
//! only created once the transport reports the handshake, so `Connecting`
//! describes the session before that point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::buffer::ConnectionBuffer;
use crate::framing::{FrameConfig, FrameError};
use crate::queue::{MessageQueue, QueuedMessage};
use crate::transport::TransportHandle;
use crate::ConnectionId;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport handshake in progress.
    Connecting,
    /// Handshake done; frames are decoded and queued.
    Connected,
    /// Disconnect reported; incoming bytes are dropped.
    Disconnecting,
    /// Detached from the session after the disconnect was dispatched.
    Removed,
}

/// Receive buffer, inbound queue and identity of one live connection.
pub struct ConnectionEntity {
    id: ConnectionId,
    target_id: i32,
    handle: Arc<dyn TransportHandle>,
    buffer: Mutex<ConnectionBuffer>,
    queue: MessageQueue,
    state: Mutex<ConnectionState>,
    need_remove: AtomicBool,
}

impl ConnectionEntity {
    /// Create an entity for a freshly connected transport handle and queue
    /// its `Connected` message, so it precedes any data.
    ///
    /// `target_id` is fixed for the entity's lifetime and travels with both
    /// of its lifecycle messages.
    pub fn new(
        id: ConnectionId,
        target_id: i32,
        handle: Arc<dyn TransportHandle>,
        buffer_capacity: usize,
    ) -> Self {
        let queue = MessageQueue::new();
        queue.push(QueuedMessage::Connected {
            connection_id: id,
            target_id,
        });
        Self {
            id,
            target_id,
            handle,
            buffer: Mutex::new(ConnectionBuffer::with_capacity(buffer_capacity)),
            queue,
            state: Mutex::new(ConnectionState::Connected),
            need_remove: AtomicBool::new(false),
        }
    }

    /// The connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Target bus id the connection was started for.
    pub fn target_id(&self) -> i32 {
        self.target_id
    }

    /// Transport handle used for sends and disconnects.
    pub fn handle(&self) -> &Arc<dyn TransportHandle> {
        &self.handle
    }

    /// Inbound queue drained by the logic thread.
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Append received bytes and queue every frame they complete.
    ///
    /// Bytes arriving after the disconnect are dropped. A corrupt header
    /// force-closes the connection and is returned to the caller.
    pub fn receive(&self, bytes: &[u8], config: &FrameConfig) -> Result<usize, FrameError> {
        let id = self.id;
        let result = {
            // Held across the decode so a concurrent close cannot queue
            // `Disconnected` ahead of these frames.
            let state = self.state.lock();
            if *state != ConnectionState::Connected {
                tracing::trace!("Connection {id} dropping {} bytes after disconnect", bytes.len());
                return Ok(0);
            }

            let mut buffer = self.buffer.lock();
            buffer.append(bytes);
            buffer.drain_frames(config, |header, body| {
                self.queue.push(QueuedMessage::Data {
                    header,
                    body,
                    connection_id: id,
                });
            })
        };

        if let Err(e) = &result {
            tracing::warn!("Connection {id} closed on {e}");
            self.close();
        }
        result
    }

    /// Move to `Disconnecting` and queue the `Disconnected` message.
    ///
    /// Returns `false` if the connection was already disconnecting, so the
    /// message is queued exactly once no matter who reports the close.
    pub fn mark_disconnected(&self) -> bool {
        let mut state = self.state.lock();
        if *state != ConnectionState::Connected {
            return false;
        }
        *state = ConnectionState::Disconnecting;
        self.queue.push(QueuedMessage::Disconnected {
            connection_id: self.id,
            target_id: self.target_id,
        });
        true
    }

    /// Close from the local side: queue the disconnect, then tell the transport.
    pub fn close(&self) {
        self.mark_disconnected();
        self.handle.disconnect();
    }

    /// Whether the `Disconnected` message has been dispatched.
    pub fn need_remove(&self) -> bool {
        self.need_remove.load(Ordering::Acquire)
    }

    pub(crate) fn set_need_remove(&self) {
        self.need_remove.store(true, Ordering::Release);
    }

    pub(crate) fn set_removed(&self) {
        *self.state.lock() = ConnectionState::Removed;
    }
}
