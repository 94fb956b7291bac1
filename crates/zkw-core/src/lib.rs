//! Protocol engine for the zkwire secure message transport.
//!
//! This crate sits between the cryptographic primitives and the routers:
//! - Message-type header tags and classification
//! - Wire message model and router/dealer framing
//! - Credential records and the repository lookup contract
//! - Client and host handshake state machines
//! - Host session table with timeout-based eviction
//!
//! Nothing here performs I/O. The routers in `zkw-transport` feed received
//! frame sets in and send whatever frame sets come back out.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod credentials;
pub mod error;
pub mod header;
pub mod message;
pub mod session;

pub use credentials::{CredentialRepository, Credentials, MemoryRepository};
pub use error::{Error, Result};
pub use header::MessageKind;
pub use message::Message;
pub use session::{ClientPhase, ClientSession, ClientStep, HostOutcome, HostReply, HostSession, SessionInfo, SessionTable};
pub use zkw_crypto::{CredentialHash, SessionCipher};
