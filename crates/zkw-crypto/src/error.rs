//! Error types for cryptographic operations.

use thiserror::Error;

/// Result type alias for cryptographic operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input length.
    #[error("Invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length received in bytes.
        actual: usize,
    },

    /// Peer public value is malformed or degenerate (zero modulo the group prime).
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Scramble parameter computed to zero.
    #[error("Scramble parameter is zero")]
    ZeroScramble,

    /// Key exchange failed.
    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    /// Key derivation failed.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (bad padding, failed authentication, truncated input).
    #[error("Decryption failed: {0}")]
    Decryption(String),
}
