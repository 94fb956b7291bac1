//! Error types for protocol operations.

use crate::header::MessageKind;
use thiserror::Error;

/// Result type alias for protocol operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Protocol operation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Message carries no frames.
    #[error("Message has no frames")]
    EmptyMessage,

    /// Invalid frame layout.
    #[error("Invalid frame format: {0}")]
    InvalidFrame(String),

    /// A message arrived that the current handshake phase does not accept.
    #[error("Unexpected {got:?} in phase {phase}")]
    UnexpectedMessage {
        /// Phase the state machine was in.
        phase: &'static str,
        /// Classification of the offending message.
        got: MessageKind,
    },

    /// The host answered with a failure response.
    #[error("Handshake rejected by host: {0:?}")]
    HandshakeRejected(MessageKind),

    /// No credential record for the identity.
    #[error("Unknown identity")]
    UnknownIdentity,

    /// Session proof did not match.
    #[error("Session proof mismatch")]
    ProofMismatch,

    /// Operation not valid in the current state.
    #[error("Invalid state transition")]
    InvalidState,

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] zkw_crypto::Error),
}
