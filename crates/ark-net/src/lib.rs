//! Framed-message TCP client: wire framing, stream reassembly, and a
//! tick-driven hand-off of decoded messages from the network thread to the
//! logic thread.

mod buffer;
mod entity;
mod error;
pub mod framing;
mod id;
mod queue;
pub mod tcp_client;
pub mod transport;

pub use buffer::ConnectionBuffer;
pub use entity::{ConnectionEntity, ConnectionState};
pub use error::NetError;
pub use framing::{FrameConfig, FrameError, FrameHeader, HEADER_SIZE, decode_frame, encode_frame};
pub use id::{ConnectionId, IdGenerator, PlayerId};
pub use queue::{MessageQueue, NetEvent, QueuedMessage};
pub use tcp_client::{ClientConfig, DataHandler, EventHandler, TcpClient};
pub use transport::{SocketOptions, TcpTransport, TransportEvents, TransportHandle};
