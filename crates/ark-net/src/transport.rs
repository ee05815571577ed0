//! Socket transport: the only code that touches tokio and the TCP stream.
//!
//! The session core never reads or writes sockets itself. It hands the
//! transport a [`TransportEvents`] sink and gets back a [`TransportHandle`]
//! per connection. [`TcpTransport`] is the production implementation: one
//! dedicated runtime with a single I/O worker thread that runs a reader and
//! a writer task per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{ConnectionId, NetError};

/// How long [`TcpTransport::shutdown`] waits for writers to flush queued frames.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Outbound half of a connection as seen by the session core.
pub trait TransportHandle: Send + Sync {
    /// Queue bytes for sending. Returns `false` once the connection is closing.
    fn send(&self, bytes: Bytes) -> bool;

    /// Ask the transport to close the connection. Idempotent.
    fn disconnect(&self);

    /// Remote address, if known.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Callbacks the transport invokes from its own thread.
pub trait TransportEvents: Send + Sync {
    /// A connection finished its handshake. Returns the id used to tag
    /// every later callback for this connection.
    fn on_connect(&self, handle: Arc<dyn TransportHandle>) -> ConnectionId;

    /// Raw bytes arrived.
    fn on_data(&self, id: ConnectionId, bytes: &[u8]);

    /// The connection is gone. Called at most once per connection.
    fn on_disconnect(&self, id: ConnectionId);
}

/// Socket options applied to every connected stream.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// TCP keepalive idle time, or `None` to leave keepalive off. Default: 60s.
    pub keepalive: Option<Duration>,
    /// Size of each socket read handed to [`TransportEvents::on_data`]. Default: 4 KB.
    pub read_chunk_size: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
            read_chunk_size: 4096,
        }
    }
}

fn configure_stream(stream: &TcpStream, options: &SocketOptions) -> std::io::Result<()> {
    stream.set_nodelay(options.tcp_nodelay)?;
    if let Some(idle) = options.keepalive {
        SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
    }
    Ok(())
}

/// Handle to one tokio-driven TCP connection.
struct TcpHandle {
    outbound: mpsc::UnboundedSender<Bytes>,
    shutdown_tx: watch::Sender<bool>,
    peer_addr: Option<SocketAddr>,
}

impl TransportHandle for TcpHandle {
    fn send(&self, bytes: Bytes) -> bool {
        !*self.shutdown_tx.borrow() && self.outbound.send(bytes).is_ok()
    }

    fn disconnect(&self) {
        self.shutdown_tx.send_replace(true);
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

/// TCP transport backed by a private tokio runtime.
///
/// [`connect`](Self::connect) and [`shutdown`](Self::shutdown) block the
/// calling thread, so they must not be called from inside another tokio
/// runtime.
pub struct TcpTransport {
    runtime: Option<Runtime>,
    options: SocketOptions,
    writers: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Start the I/O worker thread.
    pub fn new(options: SocketOptions) -> Result<Self, NetError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ark-net-io")
            .enable_all()
            .build()
            .map_err(NetError::Runtime)?;
        Ok(Self {
            runtime: Some(runtime),
            options,
            writers: Mutex::new(Vec::new()),
        })
    }

    /// Whether the worker thread is still running.
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Connect to `host:port`, waiting at most `timeout`.
    ///
    /// On success `events.on_connect` has already run and the reader and
    /// writer tasks are live; the returned id is the one `on_connect` gave.
    pub fn connect(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
        events: Arc<dyn TransportEvents>,
    ) -> Result<ConnectionId, NetError> {
        let runtime = self.runtime.as_ref().ok_or(NetError::TransportClosed)?;
        let target = format!("{host}:{port}");

        let stream = runtime.block_on(async {
            match tokio::time::timeout(timeout, Self::open(host, port)).await {
                Ok(result) => result,
                Err(_) => Err(NetError::ConnectTimeout {
                    addr: target.clone(),
                    timeout,
                }),
            }
        })?;
        configure_stream(&stream, &self.options).map_err(NetError::ConnectFailed)?;

        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = Arc::new(TcpHandle {
            outbound: outbound_tx,
            shutdown_tx,
            peer_addr,
        });
        let id = events.on_connect(handle);
        tracing::info!("Connected {id} to {target}");

        let chunk_size = self.options.read_chunk_size.max(1);
        runtime.spawn(Self::read_loop(
            id,
            reader,
            events,
            shutdown_rx.clone(),
            chunk_size,
        ));
        let writer = runtime.spawn(Self::write_loop(id, writer, outbound_rx, shutdown_rx));

        let mut writers = self.writers.lock();
        writers.retain(|task| !task.is_finished());
        writers.push(writer);

        Ok(id)
    }

    /// Stop the worker thread. Idempotent.
    ///
    /// Writers of disconnected handles get up to one second to flush frames
    /// already accepted by [`TransportHandle::send`]; anything still running
    /// after that is dropped.
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        let writers = std::mem::take(&mut *self.writers.lock());
        let flushed = runtime.block_on(async {
            tokio::time::timeout(FLUSH_GRACE, async {
                for writer in writers {
                    let _ = writer.await;
                }
            })
            .await
        });
        if flushed.is_err() {
            tracing::warn!("Transport writers still busy after {FLUSH_GRACE:?}, dropping them");
        }
        runtime.shutdown_background();
        tracing::debug!("Transport worker stopped");
    }

    async fn open(host: &str, port: u16) -> Result<TcpStream, NetError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| NetError::InvalidAddress(format!("{host}:{port}: {e}")))?
            .collect();
        if addrs.is_empty() {
            return Err(NetError::InvalidAddress(format!("{host}:{port}")));
        }
        TcpStream::connect(&addrs[..])
            .await
            .map_err(NetError::ConnectFailed)
    }

    /// Deliver socket reads until EOF, error, or a local disconnect.
    async fn read_loop(
        id: ConnectionId,
        mut reader: OwnedReadHalf,
        events: Arc<dyn TransportEvents>,
        mut shutdown_rx: watch::Receiver<bool>,
        chunk_size: usize,
    ) {
        let mut buf = vec![0u8; chunk_size];
        loop {
            tokio::select! {
                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("Connection {id} closed by peer");
                            break;
                        }
                        Ok(n) => {
                            tracing::trace!("Connection {id} received {n} bytes");
                            events.on_data(id, &buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("Connection {id} read failed: {e}");
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        events.on_disconnect(id);
    }

    /// Write queued frames in order until the handle closes.
    ///
    /// On a local disconnect the channel is closed and every frame accepted
    /// before that is still written, then the write half is shut down.
    async fn write_loop(
        id: ConnectionId,
        mut writer: OwnedWriteHalf,
        mut outbound: mpsc::UnboundedReceiver<Bytes>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                next = outbound.recv() => {
                    let Some(bytes) = next else { break };
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::debug!("Connection {id} write failed: {e}");
                        return;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        // Later sends fail; frames already queued are still delivered.
        outbound.close();
        let mut flushed = 0usize;
        while let Some(bytes) = outbound.recv().await {
            if let Err(e) = writer.write_all(&bytes).await {
                tracing::debug!("Connection {id} write failed while flushing: {e}");
                return;
            }
            flushed += 1;
        }
        if flushed > 0 {
            tracing::trace!("Connection {id} flushed {flushed} frames on close");
        }
        let _ = writer.shutdown().await;
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
