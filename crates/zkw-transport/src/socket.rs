//! Transport socket contract.
//!
//! Routers need an addressable, multi-frame, asynchronous socket:
//! - router side: receives `[address, <empty>, payload...]` and sends the
//!   same shape, delivering to the peer named by the first frame
//! - dealer side: receives and sends `[<empty>, payload...]`
//!
//! Sends run in "mandatory" mode: a frame set addressed to an unknown or
//! unreachable peer comes back as a [`SendFailure`] value instead of being
//! dropped silently.

use async_trait::async_trait;

/// Peer address is not connected.
pub const EHOSTUNREACH: &str = "EHOSTUNREACH";

/// Write to the peer failed.
pub const EIO: &str = "EIO";

/// Send cancelled before reaching the socket.
pub const ECANCELED: &str = "ECANCELED";

/// Per-message delivery failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    /// Error code (`EHOSTUNREACH`, `EIO`, `ECANCELED`).
    pub code: &'static str,
    /// Human-readable detail.
    pub message: String,
}

impl SendFailure {
    /// Create a failure.
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Multi-frame socket driven by a router's socket task.
///
/// Both methods are called from a `tokio::select!` loop, so `recv` must be
/// cancel-safe: dropping its future must not lose a frame set.
#[async_trait]
pub trait MultipartSocket: Send + 'static {
    /// Next complete frame set, `None` once the socket is closed.
    async fn recv(&mut self) -> Option<Vec<Vec<u8>>>;

    /// Send one frame set.
    async fn send(&mut self, frames: Vec<Vec<u8>>) -> Result<(), SendFailure>;
}
