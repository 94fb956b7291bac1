//! Host router.
//!
//! Owns one router socket and, when a credential repository is configured,
//! a session table plus a periodic cleanup timer. Per inbound frame set the
//! router task dispatches on the leading tag:
//! - heartbeat request: touch the session if one exists, echo a reply
//! - handshake request: run the host state machine, send its reply, raise
//!   `SessionEstablished` on proof success
//! - anything else: decrypt with the session cipher and raise
//!   `MessageReceived`
//!
//! Without a repository every non-heartbeat message is delivered as is.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Duration, MissedTickBehavior};
use zkw_core::{CredentialRepository, HostOutcome, Message, MessageKind, SessionInfo, SessionTable};

use crate::config::HostConfig;
use crate::event::{HostEvent, HostEvents, MessageFailure};
use crate::pump::{run_socket, tick, FailedSend, Outbound};
use crate::socket::{MultipartSocket, ECANCELED};
use crate::tcp::TcpRouter;
use crate::{Error, Result};

enum Command {
    Send(Message),
}

/// Host router handle.
///
/// Dropping the handle shuts the router down.
pub struct Host {
    commands: mpsc::UnboundedSender<Command>,
    directory: Arc<DashMap<String, SessionInfo>>,
    authenticated: bool,
    local_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
    disposed: AtomicBool,
}

impl Host {
    /// Bind a TCP router socket and start the host.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to listen on (e.g. `"127.0.0.1:0"`)
    /// * `config` - Timeout and linger settings
    /// * `repository` - Credential lookup; `None` runs unauthenticated
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionFailed` if binding fails.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: HostConfig,
        repository: Option<Arc<dyn CredentialRepository>>,
    ) -> Result<(Self, HostEvents)> {
        let socket = TcpRouter::bind(addr).await?;
        let local_addr = socket.local_addr();
        let (mut host, events) = Self::with_socket(socket, config, repository);
        host.local_addr = Some(local_addr);
        Ok((host, events))
    }

    /// Start a host on an existing router socket.
    ///
    /// Must be called within a tokio runtime.
    pub fn with_socket<S: MultipartSocket>(
        socket: S,
        config: HostConfig,
        repository: Option<Arc<dyn CredentialRepository>>,
    ) -> (Self, HostEvents) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let directory = Arc::new(DashMap::new());
        let authenticated = repository.is_some();

        tokio::spawn(run_socket(
            socket,
            outbound_rx,
            inbound_tx,
            failures_tx,
            shutdown_rx.clone(),
            config.linger,
        ));

        let router = HostRouter {
            repository,
            table: SessionTable::new(),
            directory: Arc::clone(&directory),
            outbound: outbound_tx,
            events: events_tx,
            timeout: config.session_timeout(),
        };
        tokio::spawn(router.run(inbound_rx, failures_rx, commands_rx, shutdown_rx));

        tracing::info!(authenticated, "host started");
        let host = Self {
            commands: commands_tx,
            directory,
            authenticated,
            local_addr: None,
            shutdown: shutdown_tx,
            disposed: AtomicBool::new(false),
        };
        (host, HostEvents::new(events_rx))
    }

    /// Send frames to the client at `address`.
    ///
    /// Non-blocking: the message is queued for the router task, which
    /// encrypts it and hands it to the socket. Delivery failures arrive as
    /// [`HostEvent::SendFailed`].
    ///
    /// # Errors
    ///
    /// - `Error::Disposed` after [`shutdown`](Self::shutdown)
    /// - `Error::EmptyMessage` if `frames` is empty
    /// - `Error::SessionNotEstablished` if authenticating and `address` has
    ///   no established session
    pub fn send(&self, address: &str, frames: Vec<Vec<u8>>) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if frames.is_empty() {
            return Err(Error::EmptyMessage);
        }
        if self.authenticated && !self.directory.get(address).is_some_and(|s| s.established) {
            return Err(Error::SessionNotEstablished);
        }

        let message = Message::new(address, frames)?;
        self.commands
            .send(Command::Send(message))
            .map_err(|_| Error::Disposed)
    }

    /// [`send`](Self::send) taking a [`Message`].
    pub fn send_message(&self, message: Message) -> Result<()> {
        self.send(&message.address, message.frames)
    }

    /// Addresses with a session.
    pub fn session_keys(&self) -> Vec<String> {
        self.directory.iter().map(|e| e.key().clone()).collect()
    }

    /// Descriptor for the session at `address`.
    pub fn session(&self, address: &str) -> Option<SessionInfo> {
        self.directory.get(address).map(|e| e.value().clone())
    }

    /// All session descriptors.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.directory.iter().map(|e| e.value().clone()).collect()
    }

    /// Whether a credential repository is configured.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Listening address, when bound over TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop both tasks. Idempotent.
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        tracing::info!("host shut down");
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct HostRouter {
    repository: Option<Arc<dyn CredentialRepository>>,
    table: SessionTable,
    directory: Arc<DashMap<String, SessionInfo>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<HostEvent>,
    timeout: Duration,
}

impl HostRouter {
    async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
        mut failures: mpsc::UnboundedReceiver<FailedSend>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        // Eviction only matters when there are sessions to evict.
        let mut cleanup = self.repository.as_ref().map(|_| {
            let mut interval = interval_at(tokio::time::Instant::now() + self.timeout, self.timeout);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(raw) = inbound.recv() => self.on_inbound(raw),
                Some(command) = commands.recv() => self.on_command(command),
                Some(failed) = failures.recv() => self.on_send_failed(failed),
                _ = tick(&mut cleanup) => self.sweep(Instant::now()),
                else => break,
            }
        }

        // Sends accepted before shutdown still go out within the linger period.
        while let Ok(command) = commands.try_recv() {
            self.on_command(command);
        }
        tracing::debug!("host router stopped");
    }

    fn on_inbound(&mut self, raw: Vec<Vec<u8>>) {
        let message = match Message::from_router_frames(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame set");
                return;
            }
        };

        let kind = message.kind();
        if kind == MessageKind::HeartbeatRequest {
            self.on_heartbeat(&message.address);
            return;
        }

        let Some(repository) = self.repository.clone() else {
            self.emit(HostEvent::MessageReceived(message));
            return;
        };

        if kind.is_handshake_request() {
            self.on_handshake(message, repository.as_ref());
        } else {
            self.on_application(message);
        }
    }

    fn on_heartbeat(&mut self, address: &str) {
        if let Some(session) = self.table.get_mut(address) {
            session.touch_heartbeat(Instant::now());
            let info = session.info();
            self.publish(info);
        }
        self.enqueue(address, vec![MessageKind::HeartbeatReply.frame()], None);
    }

    fn on_handshake(&mut self, message: Message, repository: &dyn CredentialRepository) {
        let address = message.address;
        let session = self.table.get_or_insert(&address, Instant::now());
        let reply = session.process(&message.frames, repository, Instant::now());
        let info = session.info();
        self.publish(info);

        self.enqueue(&address, reply.frames, None);
        match reply.outcome {
            HostOutcome::Established => {
                tracing::info!(address = %address, "session established");
                self.emit(HostEvent::SessionEstablished(address));
            }
            HostOutcome::Failed => {
                tracing::debug!(address = %address, "handshake step failed");
            }
            HostOutcome::Continue => {}
        }
    }

    fn on_application(&mut self, message: Message) {
        let Some(session) = self.table.get_mut(&message.address) else {
            tracing::warn!(address = %message.address, "dropping message from address without a session");
            return;
        };
        let Some(cipher) = session.cipher().cloned() else {
            tracing::warn!(address = %message.address, kind = ?message.kind(), "dropping message before session is established");
            return;
        };

        session.touch_message(Instant::now());
        let info = session.info();
        self.publish(info);

        let frames = message.frames.iter().map(|f| cipher.decrypt(f)).collect();
        self.emit(HostEvent::MessageReceived(Message {
            address: message.address,
            frames,
        }));
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send(message) => {
                if self.repository.is_none() {
                    let frames = message.frames.clone();
                    let address = message.address.clone();
                    self.enqueue(&address, frames, Some(message));
                    return;
                }

                let Some(cipher) = self.table.get(&message.address).and_then(|s| s.cipher()).cloned() else {
                    // Session went away between the handle's check and now.
                    self.emit(HostEvent::SendFailed(MessageFailure {
                        message,
                        error_code: ECANCELED.to_string(),
                        error_message: "secure session not established".into(),
                    }));
                    return;
                };

                let frames = message.frames.iter().map(|f| cipher.encrypt(f)).collect();
                let address = message.address.clone();
                self.enqueue(&address, frames, Some(message));
            }
        }
    }

    fn on_send_failed(&mut self, failed: FailedSend) {
        match failed.origin {
            Some(message) => {
                tracing::warn!(address = %message.address, failure = %failed.failure, "message not delivered");
                self.emit(HostEvent::SendFailed(MessageFailure {
                    message,
                    error_code: failed.failure.code.to_string(),
                    error_message: failed.failure.message,
                }));
            }
            None => tracing::debug!(failure = %failed.failure, "control reply not delivered"),
        }
    }

    fn sweep(&mut self, now: Instant) {
        let evicted = self.table.sweep(now, self.timeout);
        for address in &evicted {
            self.directory.remove(address);
        }
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), remaining = self.table.len(), "evicted idle sessions");
        }
    }

    fn enqueue(&self, address: &str, frames: Vec<Vec<u8>>, origin: Option<Message>) {
        let raw = Message {
            address: address.to_string(),
            frames,
        }
        .into_router_frames();
        let _ = self.outbound.send(Outbound { frames: raw, origin });
    }

    fn publish(&self, info: SessionInfo) {
        self.directory.insert(info.address.clone(), info);
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::socket::{SendFailure, EHOSTUNREACH};
    use zkw_core::MemoryRepository;

    /// In-process router socket driven by the test.
    struct ChannelSocket {
        incoming: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
        sent: mpsc::UnboundedSender<Vec<Vec<u8>>>,
        reachable: Vec<String>,
    }

    #[async_trait]
    impl MultipartSocket for ChannelSocket {
        async fn recv(&mut self) -> Option<Vec<Vec<u8>>> {
            self.incoming.recv().await
        }

        async fn send(&mut self, frames: Vec<Vec<u8>>) -> std::result::Result<(), SendFailure> {
            let address = String::from_utf8_lossy(&frames[0]).into_owned();
            if !self.reachable.contains(&address) {
                return Err(SendFailure::new(EHOSTUNREACH, "unknown peer"));
            }
            let _ = self.sent.send(frames);
            Ok(())
        }
    }

    fn channel_socket(
        reachable: &[&str],
    ) -> (ChannelSocket, mpsc::UnboundedSender<Vec<Vec<u8>>>, mpsc::UnboundedReceiver<Vec<Vec<u8>>>) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let socket = ChannelSocket {
            incoming: in_rx,
            sent: out_tx,
            reachable: reachable.iter().map(|s| s.to_string()).collect(),
        };
        (socket, in_tx, out_rx)
    }

    fn raw(address: &str, frames: &[&[u8]]) -> Vec<Vec<u8>> {
        Message::new(address, frames.iter().map(|f| f.to_vec()).collect())
            .unwrap()
            .into_router_frames()
    }

    #[tokio::test]
    async fn test_unauthenticated_delivery_and_send_failure() {
        let (socket, incoming, _sent) = channel_socket(&[]);
        let (host, mut events) = Host::with_socket(socket, HostConfig::default(), None);

        incoming.send(raw("peer", &[b"hello"])).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event in time")
            .expect("event");
        assert_eq!(
            event,
            HostEvent::MessageReceived(Message::new("peer", vec![b"hello".to_vec()]).unwrap())
        );

        host.send("gone", vec![b"x".to_vec()]).expect("queued");
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event in time")
            .expect("event");
        let HostEvent::SendFailed(failure) = event else {
            panic!("expected send failure, got {event:?}");
        };
        assert_eq!(failure.error_code, EHOSTUNREACH);
        assert_eq!(failure.message.address, "gone");
        assert_eq!(failure.message.frames, vec![b"x".to_vec()]);
    }

    #[tokio::test]
    async fn test_heartbeat_echoed() {
        let (socket, incoming, mut sent) = channel_socket(&["peer"]);
        let (_host, _events) = Host::with_socket(socket, HostConfig::default(), None);

        incoming.send(raw("peer", &[MessageKind::HeartbeatRequest.frame().as_slice()])).unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), sent.recv())
            .await
            .expect("reply in time")
            .expect("reply");
        assert_eq!(reply, raw("peer", &[[0x01u8, 0x06, 0x07, 0x07].as_slice()]));
    }

    #[tokio::test]
    async fn test_authenticated_send_requires_session() {
        let (socket, _incoming, _sent) = channel_socket(&["peer"]);
        let repo: Arc<dyn CredentialRepository> = Arc::new(MemoryRepository::new().with("alice", "pw"));
        let (host, _events) = Host::with_socket(socket, HostConfig::default(), Some(repo));

        assert!(host.is_authenticated());
        assert!(matches!(
            host.send("peer", vec![b"x".to_vec()]),
            Err(Error::SessionNotEstablished)
        ));
    }

    #[tokio::test]
    async fn test_preconditions() {
        let (socket, _incoming, _sent) = channel_socket(&[]);
        let (host, _events) = Host::with_socket(socket, HostConfig::default(), None);

        assert!(matches!(host.send("peer", Vec::new()), Err(Error::EmptyMessage)));

        host.shutdown();
        host.shutdown();
        assert!(matches!(host.send("peer", vec![b"x".to_vec()]), Err(Error::Disposed)));
    }

    #[tokio::test]
    async fn test_handshake_request_creates_session() {
        let (socket, incoming, mut sent) = channel_socket(&["peer"]);
        let repo: Arc<dyn CredentialRepository> = Arc::new(MemoryRepository::new());
        let (host, _events) = Host::with_socket(socket, HostConfig::default(), Some(repo));

        incoming
            .send(raw("peer", &[MessageKind::InitRequest.frame().as_slice(), [7u8; 32].as_slice()]))
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(1), sent.recv())
            .await
            .expect("reply in time")
            .expect("reply");

        assert_eq!(reply.len(), 4);
        assert_eq!(reply[2], MessageKind::InitSuccess.frame());
        assert_eq!(host.session_keys(), vec!["peer".to_string()]);
        let info = host.session("peer").expect("descriptor");
        assert!(!info.established);
        assert_eq!(info.message_count, 1);
    }
}
