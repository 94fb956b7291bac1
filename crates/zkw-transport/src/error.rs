//! Transport layer errors.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Send attempted with no frames.
    #[error("Message has no frames")]
    EmptyMessage,

    /// Send attempted before the secure session exists (operation cancelled).
    #[error("Operation cancelled: secure session not established")]
    SessionNotEstablished,

    /// Router was shut down.
    #[error("Router has been shut down")]
    Disposed,

    /// Multipart wire encoding violated a limit or was truncated.
    #[error("Invalid multipart encoding: {0}")]
    InvalidEncoding(String),

    /// Protocol error from core.
    #[error("Protocol error: {0}")]
    Protocol(#[from] zkw_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
