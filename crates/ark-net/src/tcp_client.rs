//! Single-peer TCP client session.
//!
//! [`TcpClient`] owns at most one live [`ConnectionEntity`]. The transport
//! thread decodes incoming bytes into the entity's queue; the logic thread
//! calls [`TcpClient::tick`] once per step to dispatch whatever has arrived.
//!
//! The entity slot sits behind a read/write lock. Transport callbacks and
//! dispatch only read the slot; replacing or removing the entity takes the
//! write lock, so it never happens in the middle of a dispatch pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::entity::{ConnectionEntity, ConnectionState};
use crate::framing::{FrameConfig, FrameHeader, encode_frame};
use crate::queue::{NetEvent, QueuedMessage};
use crate::transport::{SocketOptions, TcpTransport, TransportEvents, TransportHandle};
use crate::{ConnectionId, IdGenerator, NetError, PlayerId};

/// Receives every decoded frame: `(header, message_id, body, connection_id)`.
pub type DataHandler = Box<dyn Fn(&FrameHeader, u16, &[u8], ConnectionId) + Send + Sync>;

/// Receives lifecycle events: `(event, connection_id, target_id)`.
pub type EventHandler = Box<dyn Fn(NetEvent, ConnectionId, i32) + Send + Sync>;

/// Configuration for [`TcpClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Framing limits.
    pub frame: FrameConfig,
    /// Initial capacity of the per-connection receive buffer. Default: 4 KB.
    pub recv_buffer_capacity: usize,
    /// Socket options for the transport.
    pub socket: SocketOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            recv_buffer_capacity: 4096,
            socket: SocketOptions::default(),
        }
    }
}

/// State shared with the transport thread.
struct ClientCore {
    config: ClientConfig,
    entity: RwLock<Option<ConnectionEntity>>,
    id_gen: IdGenerator,
    target_id: AtomicI32,
}

impl ClientCore {
    fn with_entity<R>(&self, id: ConnectionId, f: impl FnOnce(&ConnectionEntity) -> R) -> Option<R> {
        let slot = self.entity.read_recursive();
        match slot.as_ref() {
            Some(entity) if entity.id() == id => Some(f(entity)),
            _ => None,
        }
    }
}

impl TransportEvents for ClientCore {
    fn on_connect(&self, handle: Arc<dyn TransportHandle>) -> ConnectionId {
        let id = self.id_gen.next_id();
        let target_id = self.target_id.load(Ordering::Relaxed);
        let entity =
            ConnectionEntity::new(id, target_id, handle, self.config.recv_buffer_capacity);

        let previous = self.entity.write().replace(entity);
        if let Some(previous) = previous {
            tracing::info!("Connection {} replaced by {id}", previous.id());
            previous.handle().disconnect();
        }
        id
    }

    fn on_data(&self, id: ConnectionId, bytes: &[u8]) {
        let handled = self.with_entity(id, |entity| {
            // A corrupt frame has already closed the connection.
            let _ = entity.receive(bytes, &self.config.frame);
        });
        if handled.is_none() {
            tracing::trace!("Dropping {} bytes for stale connection {id}", bytes.len());
        }
    }

    fn on_disconnect(&self, id: ConnectionId) {
        if self.with_entity(id, ConnectionEntity::mark_disconnected) == Some(true) {
            tracing::info!("Connection {id} disconnected");
        }
    }
}

/// Client session manager for one server connection at a time.
///
/// Handlers are installed before [`start`](Self::start) and invoked only
/// from [`tick`](Self::tick). Handlers may call [`send_message`](Self::send_message),
/// [`close_connection`](Self::close_connection) and [`shutdown`](Self::shutdown),
/// but not [`start`](Self::start).
pub struct TcpClient {
    core: Arc<ClientCore>,
    transport: Mutex<Option<TcpTransport>>,
    data_handler: Option<DataHandler>,
    event_handler: Option<EventHandler>,
    working: AtomicBool,
    connecting: AtomicBool,
}

impl TcpClient {
    /// Create an idle client. No threads are started until [`start`](Self::start).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            core: Arc::new(ClientCore {
                config,
                entity: RwLock::new(None),
                id_gen: IdGenerator::new(0),
                target_id: AtomicI32::new(0),
            }),
            transport: Mutex::new(None),
            data_handler: None,
            event_handler: None,
            working: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
        }
    }

    /// Install the handler for decoded frames.
    pub fn set_data_handler(
        &mut self,
        handler: impl Fn(&FrameHeader, u16, &[u8], ConnectionId) + Send + Sync + 'static,
    ) {
        self.data_handler = Some(Box::new(handler));
    }

    /// Install the handler for connect/disconnect events.
    pub fn set_event_handler(
        &mut self,
        handler: impl Fn(NetEvent, ConnectionId, i32) + Send + Sync + 'static,
    ) {
        self.event_handler = Some(Box::new(handler));
    }

    /// Connect to `host:port`, blocking for at most `timeout`.
    ///
    /// On failure no connection entity is created and the caller may retry.
    /// A live connection is replaced wholesale by the new one. Must not be
    /// called from inside a tokio runtime.
    pub fn start(
        &self,
        target_id: i32,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<ConnectionId, NetError> {
        let mut transport = self.transport.lock();
        if transport.is_none() {
            *transport = Some(TcpTransport::new(self.core.config.socket.clone())?);
        }
        let Some(transport) = transport.as_ref() else {
            return Err(NetError::TransportClosed);
        };

        // Read by `on_connect`, which runs before `connect` returns.
        self.core.target_id.store(target_id, Ordering::Relaxed);
        self.connecting.store(true, Ordering::Release);
        let events: Arc<dyn TransportEvents> = Arc::clone(&self.core) as Arc<dyn TransportEvents>;
        let result = transport.connect(host, port, timeout, events);
        self.connecting.store(false, Ordering::Release);

        match result {
            Ok(id) => {
                self.working.store(true, Ordering::Release);
                tracing::info!("Client session {id} started for target {target_id}");
                Ok(id)
            }
            Err(e) => {
                tracing::warn!("Client failed to connect to {host}:{port}: {e}");
                Err(e)
            }
        }
    }

    /// Dispatch queued messages of the active connection.
    ///
    /// At most the number of messages queued when the pass starts is
    /// dispatched; later arrivals wait for the next tick. Once the
    /// `Disconnected` event has been dispatched the entity is removed.
    /// Returns the number of messages dispatched.
    pub fn tick(&self) -> usize {
        let mut dispatched = 0;
        let remove = {
            let slot = self.core.entity.read();
            let Some(entity) = slot.as_ref() else {
                return 0;
            };

            let count = entity.queue().count();
            for _ in 0..count {
                let Some(message) = entity.queue().pop() else {
                    break;
                };
                self.dispatch(entity, message);
                dispatched += 1;
            }
            entity.need_remove()
        };

        if remove {
            let mut slot = self.core.entity.write();
            if slot.as_ref().is_some_and(ConnectionEntity::need_remove)
                && let Some(entity) = slot.take()
            {
                entity.set_removed();
                tracing::debug!("Connection {} removed", entity.id());
            }
        }

        dispatched
    }

    fn dispatch(&self, entity: &ConnectionEntity, message: QueuedMessage) {
        match message {
            QueuedMessage::Data {
                header,
                body,
                connection_id,
            } => {
                if let Some(handler) = &self.data_handler {
                    handler(&header, header.message_id, &body, connection_id);
                }
            }
            QueuedMessage::Connected {
                connection_id,
                target_id,
            } => {
                if let Some(handler) = &self.event_handler {
                    handler(NetEvent::Connected, connection_id, target_id);
                }
            }
            QueuedMessage::Disconnected {
                connection_id,
                target_id,
            } => {
                if let Some(handler) = &self.event_handler {
                    handler(NetEvent::Disconnected, connection_id, target_id);
                }
                entity.set_need_remove();
            }
        }
    }

    /// Encode a frame and send it on the active connection.
    ///
    /// Fails without touching the transport when `message_id` is 0, when
    /// there is no live connection, or when `connection_id` is not the
    /// active one.
    pub fn send_message(
        &self,
        message_id: u16,
        body: &[u8],
        connection_id: ConnectionId,
        player_id: PlayerId,
    ) -> Result<(), NetError> {
        if message_id == 0 {
            return Err(NetError::InvalidMessageId);
        }
        let max = self.core.config.frame.max_body_size;
        if body.len() > max as usize {
            return Err(NetError::PayloadTooLarge {
                size: body.len(),
                max,
            });
        }
        let frame = encode_frame(FrameHeader::new(message_id, player_id), body);
        self.send_raw(frame, connection_id)
    }

    /// Send pre-encoded bytes with the same routing rules as [`send_message`](Self::send_message).
    pub fn send_raw(&self, bytes: Bytes, connection_id: ConnectionId) -> Result<(), NetError> {
        self.route(connection_id, |entity| {
            if entity.handle().send(bytes) {
                Ok(())
            } else {
                Err(NetError::TransportClosed)
            }
        })
    }

    /// Close the active connection if it is `connection_id`.
    ///
    /// The `Disconnected` event is queued immediately and dispatched by the
    /// next tick.
    pub fn close_connection(&self, connection_id: ConnectionId) -> Result<(), NetError> {
        self.route(connection_id, |entity| {
            entity.close();
            Ok(())
        })
    }

    fn route(
        &self,
        connection_id: ConnectionId,
        f: impl FnOnce(&ConnectionEntity) -> Result<(), NetError>,
    ) -> Result<(), NetError> {
        let slot = self.core.entity.read_recursive();
        let Some(entity) = slot.as_ref() else {
            tracing::debug!("No active connection for {connection_id}");
            return Err(NetError::NoActiveConnection);
        };
        if entity.id() != connection_id {
            tracing::debug!(
                "Dropping route to {connection_id}, active connection is {}",
                entity.id()
            );
            return Err(NetError::ConnectionMismatch {
                requested: connection_id,
                active: entity.id(),
            });
        }
        f(entity)
    }

    /// Close the active connection and stop the transport thread. Idempotent.
    ///
    /// A connection that was still live gets its `Disconnected` event
    /// queued, so a later tick reports it and removes the entity.
    /// Frames already accepted by [`send_message`](Self::send_message) are
    /// flushed to the peer first; this may block for up to a second.
    pub fn shutdown(&self) {
        if let Some(entity) = self.core.entity.read_recursive().as_ref() {
            entity.close();
        }
        if let Some(mut transport) = self.transport.lock().take() {
            transport.shutdown();
        }
        if self.working.swap(false, Ordering::AcqRel) {
            tracing::info!("Client session shut down");
        }
    }

    /// Whether [`start`](Self::start) succeeded and [`shutdown`](Self::shutdown) has not run since.
    pub fn is_working(&self) -> bool {
        self.working.load(Ordering::Acquire)
    }

    /// Always `false`: this is the client side of the protocol.
    pub fn is_server(&self) -> bool {
        false
    }

    /// Target bus id given to the last [`start`](Self::start).
    pub fn target_id(&self) -> i32 {
        self.core.target_id.load(Ordering::Relaxed)
    }

    /// Id of the connection currently held, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.core.entity.read_recursive().as_ref().map(ConnectionEntity::id)
    }

    /// Lifecycle state of the session's connection.
    pub fn connection_state(&self) -> ConnectionState {
        if let Some(entity) = self.core.entity.read_recursive().as_ref() {
            return entity.state();
        }
        if self.connecting.load(Ordering::Acquire) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Removed
        }
    }

    /// Transport callbacks of this session, for driving it from a custom transport.
    pub fn transport_events(&self) -> Arc<dyn TransportEvents> {
        Arc::clone(&self.core) as Arc<dyn TransportEvents>
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
