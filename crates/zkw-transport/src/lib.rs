//! Authenticated message routers for the zkwire transport.
//!
//! A [`Host`] binds one router socket and serves many [`Client`]s, each with a
//! stable address. When a credential repository is configured, every client
//! proves knowledge of its shared secret with a zero-knowledge handshake and
//! all application frames are encrypted under the derived session key.
//!
//! Each router runs two tokio tasks:
//! - a socket task that owns the transport socket and the outbound queue
//! - a router task that owns session state, runs handshakes, encrypts and
//!   decrypts frames, and delivers events
//!
//! The tasks talk only through channels. The socket task never touches
//! session state.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use zkw_core::{CredentialRepository, MemoryRepository};
//! use zkw_transport::{Client, ClientConfig, Credentials, Host, HostConfig, HostEvent};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo: Arc<dyn CredentialRepository> = Arc::new(MemoryRepository::new().with("alice", "s3cret"));
//! let (host, mut host_events) = Host::bind("127.0.0.1:0", HostConfig::default(), Some(repo)).await?;
//! let addr = host.local_addr().expect("tcp host has an address");
//!
//! let config = ClientConfig {
//!     credentials: Some(Credentials::new("alice", "s3cret")),
//!     ..ClientConfig::default()
//! };
//! let (client, _client_events) = Client::connect(addr, config).await?;
//! assert!(client.secure_connection(true, Duration::from_secs(2)).await?);
//!
//! client.send(vec![b"hello".to_vec()])?;
//! if let Some(HostEvent::MessageReceived(message)) = host_events.recv().await {
//!     host.send(&message.address, message.frames)?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod socket;
pub mod tcp;

mod pump;

pub use client::{Client, ConnectionStatus};
pub use config::{ClientConfig, HostConfig};
pub use error::{Error, Result};
pub use event::{ClientEvent, ClientEvents, HostEvent, HostEvents, MessageFailure};
pub use host::Host;
pub use socket::{MultipartSocket, SendFailure};
pub use tcp::{TcpDealer, TcpRouter};
pub use zkw_core::{Credentials, Message, SessionInfo};
