//! Host/client router integration tests over loopback TCP.
//!
//! Tests verify:
//! - Unauthenticated round trips deliver each message exactly once
//! - Authenticated handshake, encrypted send and echo
//! - Wrong secret fails the handshake with a single protocol-failed event
//! - Send preconditions and delivery failure events
//! - Heartbeat bookkeeping, fail-open decryption and linger on shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use zkw_core::{ClientSession, ClientStep, CredentialRepository, MemoryRepository, Message};
use zkw_transport::socket::MultipartSocket;
use zkw_transport::{
    Client, ClientConfig, ClientEvent, ClientEvents, ConnectionStatus, Credentials, Error, Host, HostConfig,
    HostEvent, HostEvents, Result, TcpDealer,
};

const WAIT: Duration = Duration::from_secs(2);

fn repository() -> Arc<dyn CredentialRepository> {
    Arc::new(MemoryRepository::new().with("alice", "s3cret"))
}

fn frames(parts: &[&str]) -> Vec<Vec<u8>> {
    parts.iter().map(|p| p.as_bytes().to_vec()).collect()
}

async fn next_host_event(events: &mut HostEvents) -> HostEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("host event timeout")
        .expect("host stopped")
}

async fn next_client_event(events: &mut ClientEvents) -> ClientEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("client event timeout")
        .expect("client stopped")
}

async fn start_pair(
    repository: Option<Arc<dyn CredentialRepository>>,
    credentials: Option<Credentials>,
) -> Result<(Host, HostEvents, Client, ClientEvents)> {
    let (host, host_events) = Host::bind("127.0.0.1:0", HostConfig::default(), repository).await?;
    let addr = host.local_addr().expect("tcp host address");
    let config = ClientConfig {
        credentials,
        ..ClientConfig::default()
    };
    let (client, client_events) = Client::connect(addr, config).await?;
    Ok((host, host_events, client, client_events))
}

/// Test: unauthenticated exchange delivers each side's message once
#[tokio::test]
async fn test_unauthenticated_round_trip() -> Result<()> {
    let (host, mut host_events, client, mut client_events) = start_pair(None, None).await?;

    client.send(frames(&["hello", "world"]))?;
    let HostEvent::MessageReceived(received) = next_host_event(&mut host_events).await else {
        panic!("expected a message");
    };
    assert_eq!(received.address, client.address());
    assert_eq!(received.frames, frames(&["hello", "world"]));

    let mut reply = frames(&["greetings"]);
    reply.extend(received.frames.iter().cloned());
    host.send(&received.address, reply)?;
    let ClientEvent::MessageReceived(echo) = next_client_event(&mut client_events).await else {
        panic!("expected a reply");
    };
    assert_eq!(echo.frames, frames(&["greetings", "hello", "world"]));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(host_events.try_recv().is_none());
    assert!(client_events.try_recv().is_none());
    assert!(host.sessions().is_empty());
    Ok(())
}

/// Test: correct credentials establish a session and frames round-trip decrypted
#[tokio::test]
async fn test_secure_round_trip() -> Result<()> {
    let (host, mut host_events, client, mut client_events) =
        start_pair(Some(repository()), Some(Credentials::new("alice", "s3cret"))).await?;

    assert!(client.secure_connection(true, WAIT).await?);
    assert_eq!(client.status(), ConnectionStatus::Established);
    assert!(client.can_send());
    // Already established: returns at once.
    assert!(client.secure_connection(true, WAIT).await?);

    assert_eq!(
        next_client_event(&mut client_events).await,
        ClientEvent::ProtocolEstablished
    );
    assert_eq!(
        next_host_event(&mut host_events).await,
        HostEvent::SessionEstablished(client.address().to_string())
    );

    let info = host.session(client.address()).expect("session descriptor");
    assert!(info.established);
    assert_eq!(info.identity.as_deref(), Some("alice"));
    assert_eq!(host.session_keys(), vec![client.address().to_string()]);

    client.send(frames(&["secret payload", ""]))?;
    let HostEvent::MessageReceived(received) = next_host_event(&mut host_events).await else {
        panic!("expected a message");
    };
    assert_eq!(received.frames, frames(&["secret payload", ""]));

    host.send_message(received)?;
    let ClientEvent::MessageReceived(echo) = next_client_event(&mut client_events).await else {
        panic!("expected the echo");
    };
    assert_eq!(echo.frames, frames(&["secret payload", ""]));
    Ok(())
}

/// Test: a wrong secret fails the handshake and reports it once
#[tokio::test]
async fn test_wrong_secret_fails_once() -> Result<()> {
    let (host, mut host_events, client, mut client_events) =
        start_pair(Some(repository()), Some(Credentials::new("alice", "wrong"))).await?;

    assert!(!client.secure_connection(true, WAIT).await?);
    assert_eq!(client.status(), ConnectionStatus::Failed);
    assert!(!client.can_send());
    assert!(matches!(client.send(frames(&["x"])), Err(Error::SessionNotEstablished)));

    assert!(matches!(
        next_client_event(&mut client_events).await,
        ClientEvent::ProtocolFailed(_)
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client_events.try_recv().is_none());
    assert!(host_events.try_recv().is_none());

    let info = host.session(client.address()).expect("session descriptor");
    assert!(!info.established);
    Ok(())
}

/// Test: an unknown identity is rejected the same way
#[tokio::test]
async fn test_unknown_identity_fails() -> Result<()> {
    let (_host, _host_events, client, mut client_events) =
        start_pair(Some(repository()), Some(Credentials::new("mallory", "s3cret"))).await?;

    assert!(!client.secure_connection(true, WAIT).await?);
    assert!(matches!(
        next_client_event(&mut client_events).await,
        ClientEvent::ProtocolFailed(_)
    ));
    Ok(())
}

/// Test: a failed attempt can be retried
#[tokio::test]
async fn test_retry_after_failure() -> Result<()> {
    let (host, host_events) = Host::bind("127.0.0.1:0", HostConfig::default(), Some(repository())).await?;
    let addr = host.local_addr().expect("tcp host address");
    drop(host_events);

    let config = ClientConfig::default().with_credentials(Credentials::new("alice", "wrong"));
    let (client, _events) = Client::connect(addr, config).await?;
    assert!(!client.secure_connection(true, WAIT).await?);
    assert!(!client.secure_connection(true, WAIT).await?);
    assert_eq!(client.status(), ConnectionStatus::Failed);
    Ok(())
}

/// Test: the host refuses sends to an unauthenticated address
#[tokio::test]
async fn test_host_send_before_handshake() -> Result<()> {
    let (host, _host_events, client, _client_events) =
        start_pair(Some(repository()), Some(Credentials::new("alice", "s3cret"))).await?;

    assert!(matches!(
        host.send(client.address(), frames(&["x"])),
        Err(Error::SessionNotEstablished)
    ));
    assert!(matches!(client.send(frames(&["x"])), Err(Error::SessionNotEstablished)));
    Ok(())
}

/// Test: sending to an address with no connection raises a failure event
#[tokio::test]
async fn test_send_to_unknown_address() -> Result<()> {
    let (host, mut host_events) = Host::bind("127.0.0.1:0", HostConfig::default(), None).await?;

    host.send("nobody", frames(&["hello"]))?;
    let HostEvent::SendFailed(failure) = next_host_event(&mut host_events).await else {
        panic!("expected a send failure");
    };
    assert_eq!(failure.error_code, "EHOSTUNREACH");
    assert_eq!(failure.message.address, "nobody");
    assert_eq!(failure.message.frames, frames(&["hello"]));
    Ok(())
}

/// Test: heartbeats are echoed by the host
#[tokio::test]
async fn test_heartbeats() -> Result<()> {
    let (host, _host_events) = Host::bind("127.0.0.1:0", HostConfig::default(), None).await?;
    let addr = host.local_addr().expect("tcp host address");
    let config = ClientConfig {
        heartbeat_interval: Some(Duration::from_millis(25)),
        ..ClientConfig::default()
    };
    let (client, _client_events) = Client::connect(addr, config).await?;

    timeout(WAIT, async {
        while client.heartbeats_received() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("heartbeat replies");

    assert!(client.heartbeats_sent() >= client.heartbeats_received());
    assert!(client.is_host_alive());
    Ok(())
}

/// Test: shut down routers reject further use
#[tokio::test]
async fn test_shutdown() -> Result<()> {
    let (host, _host_events, client, _client_events) = start_pair(None, None).await?;

    client.shutdown();
    host.shutdown();
    host.shutdown();

    assert!(matches!(client.send(frames(&["x"])), Err(Error::Disposed)));
    assert!(matches!(host.send(client.address(), frames(&["x"])), Err(Error::Disposed)));
    assert!(matches!(host.send("any", Vec::new()), Err(Error::Disposed)));
    Ok(())
}

/// Test: heartbeats from an authenticated client touch its host session
#[tokio::test]
async fn test_heartbeats_touch_authenticated_session() -> Result<()> {
    let (host, _host_events) = Host::bind("127.0.0.1:0", HostConfig::default(), Some(repository())).await?;
    let addr = host.local_addr().expect("tcp host address");
    let config = ClientConfig {
        credentials: Some(Credentials::new("alice", "s3cret")),
        heartbeat_interval: Some(Duration::from_millis(25)),
        ..ClientConfig::default()
    };
    let (client, _client_events) = Client::connect(addr, config).await?;
    assert!(client.secure_connection(true, WAIT).await?);

    let info = timeout(WAIT, async {
        loop {
            if let Some(info) = host.session(client.address()) {
                if info.heartbeat_count >= 2 {
                    return info;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("heartbeats recorded");

    assert!(info.established);
    assert!(info.last_heartbeat_at.is_some());
    assert!(info.last_heartbeat_at >= Some(info.created_at));
    Ok(())
}

/// Test: frames that fail to decrypt are delivered unchanged
#[tokio::test]
async fn test_undecryptable_frames_delivered_as_received() -> Result<()> {
    let (host, mut host_events) = Host::bind("127.0.0.1:0", HostConfig::default(), Some(repository())).await?;
    let addr = host.local_addr().expect("tcp host address");

    // Drive the handshake by hand so the payload can be chosen freely.
    let mut dealer = TcpDealer::connect(addr, "manual-peer").await?;
    let mut session = ClientSession::new(Credentials::new("alice", "s3cret"), "127.0.0.1");
    let mut outgoing = session.start();
    loop {
        dealer.send(Message::dealer_frames(outgoing)).await.expect("dealer send");
        let raw = timeout(WAIT, dealer.recv()).await.expect("reply timeout").expect("host closed");
        let reply = Message::from_dealer_frames("manual-peer", raw)?;
        match session.handle_reply(&reply.frames)? {
            ClientStep::Send(next) => outgoing = next,
            ClientStep::Established => break,
        }
    }
    assert_eq!(
        next_host_event(&mut host_events).await,
        HostEvent::SessionEstablished("manual-peer".to_string())
    );

    let cipher = session.cipher().expect("cipher installed");
    let payload = vec![cipher.encrypt(b"intact"), b"garbled".to_vec()];
    dealer.send(Message::dealer_frames(payload)).await.expect("dealer send");

    let HostEvent::MessageReceived(received) = next_host_event(&mut host_events).await else {
        panic!("expected a message");
    };
    assert_eq!(received.address, "manual-peer");
    assert_eq!(received.frames, frames(&["intact", "garbled"]));
    Ok(())
}

/// Test: sends accepted before shutdown are flushed within the linger period
#[tokio::test]
async fn test_linger_flushes_accepted_sends() -> Result<()> {
    let config = HostConfig {
        linger: Duration::from_secs(2),
        ..HostConfig::default()
    };
    let (host, mut host_events) = Host::bind("127.0.0.1:0", config, None).await?;
    let addr = host.local_addr().expect("tcp host address");
    let (client, mut client_events) = Client::connect(addr, ClientConfig::default()).await?;

    client.send(frames(&["hello"]))?;
    let HostEvent::MessageReceived(received) = next_host_event(&mut host_events).await else {
        panic!("expected a message");
    };

    for i in 0..50 {
        host.send(&received.address, vec![i.to_string().into_bytes()])?;
    }
    host.shutdown();

    for i in 0..50 {
        let ClientEvent::MessageReceived(message) = next_client_event(&mut client_events).await else {
            panic!("expected message {i}");
        };
        assert_eq!(message.frames, vec![i.to_string().into_bytes()]);
    }
    Ok(())
}
