//! Error types for the client session.

use std::time::Duration;

use crate::ConnectionId;

/// Errors returned by [`TcpClient`](crate::TcpClient) operations.
///
/// Only a corrupt frame tears a connection down; everything here is a
/// recoverable return value the caller is expected to check.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The connect attempt did not finish within the timeout.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Target address as given by the caller.
        addr: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The peer refused the connection or the socket could not be set up.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),

    /// Host and port did not resolve to any socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// There is no live connection to route to.
    #[error("no active connection")]
    NoActiveConnection,

    /// The operation targeted a connection that is not the active one.
    #[error("connection {requested} is not the active connection {active}")]
    ConnectionMismatch {
        /// The id the caller asked for.
        requested: ConnectionId,
        /// The id of the live connection.
        active: ConnectionId,
    },

    /// Message id 0 is reserved; peers treat it as a corrupt frame.
    #[error("message id 0 is reserved")]
    InvalidMessageId,

    /// The body exceeds the configured maximum frame body size.
    #[error("body size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual body size.
        size: usize,
        /// Configured maximum.
        max: u32,
    },

    /// The transport refused the bytes because it is already closing.
    #[error("transport closed")]
    TransportClosed,

    /// The transport runtime could not be started.
    #[error("failed to start transport runtime: {0}")]
    Runtime(#[source] std::io::Error),
}
