//! Echo demo: an authenticating host and one client in a single process.
//!
//! ```text
//! zkw-echo [message...]
//! ```
//!
//! The host echoes every message back; the client prints each echo.
//! Set `RUST_LOG=zkw_transport=debug,zkw_core=debug` to watch the handshake.

use std::sync::Arc;
use std::time::Duration;

use zkw_core::{CredentialRepository, MemoryRepository};
use zkw_transport::{Client, ClientConfig, ClientEvent, Credentials, Host, HostConfig, HostEvent};

const IDENTITY: &str = "alice";
const SECRET: &str = "s3cret";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "zkw_transport=info".into()),
        )
        .init();

    let mut messages: Vec<String> = std::env::args().skip(1).collect();
    if messages.is_empty() {
        messages = vec!["hello".into(), "zero knowledge".into()];
    }

    let repository: Arc<dyn CredentialRepository> = Arc::new(MemoryRepository::new().with(IDENTITY, SECRET));
    let (host, mut host_events) = Host::bind("127.0.0.1:0", HostConfig::from_env(), Some(repository)).await?;
    let host_addr = host.local_addr().ok_or("host has no listening address")?;

    // Echo everything back to its sender.
    tokio::spawn(async move {
        while let Some(event) = host_events.recv().await {
            match event {
                HostEvent::MessageReceived(message) => {
                    if let Err(e) = host.send_message(message) {
                        tracing::warn!(error = %e, "echo failed");
                    }
                }
                HostEvent::SessionEstablished(address) => {
                    if let Some(info) = host.session(&address) {
                        tracing::info!(address = %address, identity = ?info.identity, client_ip = ?info.client_ip, "client authenticated");
                    }
                }
                HostEvent::SendFailed(failure) => {
                    tracing::warn!(address = %failure.message.address, code = %failure.error_code, "echo not delivered");
                }
            }
        }
    });

    let config = ClientConfig::from_env().with_credentials(Credentials::new(IDENTITY, SECRET));
    let (client, mut client_events) = Client::connect(host_addr, config).await?;
    if !client.secure_connection(true, Duration::from_secs(5)).await? {
        return Err("handshake failed".into());
    }

    for text in &messages {
        client.send(vec![text.as_bytes().to_vec()])?;
    }

    let mut echoed = 0;
    while echoed < messages.len() {
        match tokio::time::timeout(Duration::from_secs(5), client_events.recv()).await {
            Ok(Some(ClientEvent::MessageReceived(message))) => {
                for frame in &message.frames {
                    println!("{}", String::from_utf8_lossy(frame));
                }
                echoed += 1;
            }
            Ok(Some(event)) => tracing::debug!(?event, "client event"),
            Ok(None) => break,
            Err(_) => return Err("timed out waiting for echo".into()),
        }
    }

    client.shutdown();
    Ok(())
}
