//! Cryptographic primitives for the zkwire secure message transport.
//!
//! This crate implements the cryptographic foundations of the zkwire handshake:
//! - Zero-knowledge password proof (SRP-6a over the RFC 5054 2048-bit group, SHA-256)
//! - Session cipher (AES-256-CBC with PKCS#7 padding) keyed from the SRP session key
//! - Sealed frames (X25519 + HKDF-SHA256 + ChaCha20-Poly1305) protecting handshake
//!   payloads before a session key exists
//!
//! Security notes:
//! - Private exponents, shared secrets and session keys use `Zeroizing` wrappers
//! - Proof comparisons are constant-time via the `subtle` crate
//! - No logging of key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cipher;
pub mod error;
pub mod sealed;
pub mod srp;

pub use cipher::SessionCipher;
pub use error::{Error, Result};
pub use sealed::SealingKeyPair;
pub use srp::{CredentialHash, Ephemeral};
