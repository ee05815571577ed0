//! Connection and player identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 128-bit identifier for one connection within a session manager's lifetime.
///
/// `high` is 0 for client-originated connections (or derived from a remote
/// bus id); `low` is a monotonically increasing counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionId {
    /// Fixed origin part.
    pub high: u64,
    /// Per-connection counter.
    pub low: u64,
}

impl ConnectionId {
    /// Build an id from its two halves.
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.high, self.low)
    }
}

/// Opaque originator identifier carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PlayerId(pub u128);

impl PlayerId {
    /// Upper 64 bits, written first on the wire.
    pub fn high(self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Lower 64 bits.
    pub fn low(self) -> u64 {
        self.0 as u64
    }

    /// Reassemble from the two wire halves.
    pub fn from_parts(high: u64, low: u64) -> Self {
        Self(((high as u128) << 64) | low as u128)
    }
}

/// Atomic generator for [`ConnectionId`]s sharing one `high` part.
pub struct IdGenerator {
    high: u64,
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a generator whose first id has `low == 1`.
    pub fn new(high: u64) -> Self {
        Self {
            high,
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId::new(self.high, self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}
