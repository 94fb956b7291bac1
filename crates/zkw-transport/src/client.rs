//! Client router.
//!
//! Mirrors the host: one dealer socket, one socket task, one router task and,
//! when credentials are configured, one [`ClientSession`]. Until the
//! handshake completes `send` is refused; afterwards every outgoing frame is
//! encrypted and every incoming application frame decrypted before delivery.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, MissedTickBehavior};
use uuid::Uuid;
use zkw_core::{ClientPhase, ClientSession, ClientStep, Message, MessageKind};

use crate::config::ClientConfig;
use crate::event::{ClientEvent, ClientEvents};
use crate::pump::{run_socket, tick, FailedSend, Outbound};
use crate::socket::MultipartSocket;
use crate::tcp::TcpDealer;
use crate::{Error, Result};

/// Handshake status as seen by the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No credentials configured; frames travel in the clear.
    Unsecured,
    /// Credentials configured, no handshake started.
    Idle,
    /// Handshake in flight.
    Pending,
    /// Session cipher installed.
    Established,
    /// Last handshake attempt failed.
    Failed,
}

enum Command {
    Send(Vec<Vec<u8>>),
    Secure(Option<oneshot::Sender<bool>>),
}

#[derive(Debug)]
struct HeartbeatStats {
    started: Instant,
    sent: AtomicU64,
    received: AtomicU64,
    // Milliseconds since `started` plus one; zero means no reply yet.
    last_reply: AtomicU64,
}

impl HeartbeatStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            last_reply: AtomicU64::new(0),
        }
    }

    fn record_reply(&self, now: Instant) {
        let millis = now.saturating_duration_since(self.started).as_millis();
        let millis = u64::try_from(millis).unwrap_or(u64::MAX - 1);
        self.received.fetch_add(1, Ordering::Relaxed);
        self.last_reply.store(millis + 1, Ordering::Release);
    }

    fn last_reply(&self) -> Option<Instant> {
        match self.last_reply.load(Ordering::Acquire) {
            0 => None,
            stamp => Some(self.started + Duration::from_millis(stamp - 1)),
        }
    }
}

/// Client router handle.
///
/// Dropping the handle shuts the router down.
pub struct Client {
    address: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    stats: Arc<HeartbeatStats>,
    heartbeat_interval: Option<Duration>,
    shutdown: watch::Sender<bool>,
    disposed: AtomicBool,
}

impl Client {
    /// Connect to a host over TCP with a fresh random address.
    ///
    /// When `config.reported_address` is unset, the local IP of the
    /// connection is reported during the handshake.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionFailed` if the connection fails.
    pub async fn connect(addr: impl ToSocketAddrs, mut config: ClientConfig) -> Result<(Self, ClientEvents)> {
        let address = Uuid::new_v4().to_string();
        let socket = TcpDealer::connect(addr, &address).await?;
        if config.reported_address.is_none() {
            config.reported_address = Some(socket.local_addr().ip().to_string());
        }
        Ok(Self::with_socket(socket, address, config))
    }

    /// Start a client on an existing dealer socket announced as `address`.
    ///
    /// Must be called within a tokio runtime.
    pub fn with_socket<S: MultipartSocket>(
        socket: S,
        address: impl Into<String>,
        config: ClientConfig,
    ) -> (Self, ClientEvents) {
        let address = address.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = config
            .credentials
            .map(|c| ClientSession::new(c, config.reported_address.unwrap_or_default()));
        let initial = if session.is_some() {
            ConnectionStatus::Idle
        } else {
            ConnectionStatus::Unsecured
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let stats = Arc::new(HeartbeatStats::new());

        tokio::spawn(run_socket(
            socket,
            outbound_rx,
            inbound_tx,
            failures_tx,
            shutdown_rx.clone(),
            config.linger,
        ));

        let router = ClientRouter {
            address: address.clone(),
            session,
            waiters: Vec::new(),
            status: status_tx,
            stats: Arc::clone(&stats),
            outbound: outbound_tx,
            events: events_tx,
        };
        tokio::spawn(router.run(inbound_rx, failures_rx, commands_rx, shutdown_rx, config.heartbeat_interval));

        tracing::info!(address = %address, status = ?initial, "client started");
        let client = Self {
            address,
            commands: commands_tx,
            status: status_rx,
            stats,
            heartbeat_interval: config.heartbeat_interval,
            shutdown: shutdown_tx,
            disposed: AtomicBool::new(false),
        };
        (client, ClientEvents::new(events_rx))
    }

    /// Send frames to the host.
    ///
    /// Non-blocking: the frames are queued for the router task.
    ///
    /// # Errors
    ///
    /// - `Error::Disposed` after [`shutdown`](Self::shutdown)
    /// - `Error::EmptyMessage` if `frames` is empty
    /// - `Error::SessionNotEstablished` if credentials are configured and
    ///   the handshake has not completed
    pub fn send(&self, frames: Vec<Vec<u8>>) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if frames.is_empty() {
            return Err(Error::EmptyMessage);
        }
        if !matches!(self.status(), ConnectionStatus::Unsecured | ConnectionStatus::Established) {
            return Err(Error::SessionNotEstablished);
        }
        self.commands.send(Command::Send(frames)).map_err(|_| Error::Disposed)
    }

    /// Whether [`send`](Self::send) would accept a non-empty message now.
    pub fn can_send(&self) -> bool {
        !self.disposed.load(Ordering::Acquire)
            && matches!(self.status(), ConnectionStatus::Unsecured | ConnectionStatus::Established)
    }

    /// Run the handshake.
    ///
    /// Returns `Ok(true)` immediately if the session is already established
    /// and `Ok(false)` if no credentials are configured. Otherwise starts a
    /// fresh handshake, abandoning any attempt still in flight, so a caller
    /// can retry after a timeout. With `block` set, waits up to
    /// `timeout` for the outcome; without it, returns `Ok(false)` at once and
    /// the outcome arrives as a [`ClientEvent`].
    ///
    /// A failed attempt can be retried by calling this again.
    ///
    /// # Errors
    ///
    /// Returns `Error::Disposed` after [`shutdown`](Self::shutdown).
    pub async fn secure_connection(&self, block: bool, timeout: Duration) -> Result<bool> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        match self.status() {
            ConnectionStatus::Unsecured => return Ok(false),
            ConnectionStatus::Established => return Ok(true),
            _ => {}
        }

        if !block {
            self.commands.send(Command::Secure(None)).map_err(|_| Error::Disposed)?;
            return Ok(false);
        }

        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Secure(Some(tx))).map_err(|_| Error::Disposed)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(established)) => Ok(established),
            Ok(Err(_)) => Err(Error::Disposed),
            Err(_) => {
                tracing::debug!(?timeout, "secure connection timed out");
                Ok(false)
            }
        }
    }

    /// Address announced to the host.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current handshake status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Heartbeat requests sent so far.
    pub fn heartbeats_sent(&self) -> u64 {
        self.stats.sent.load(Ordering::Relaxed)
    }

    /// Heartbeat replies received so far.
    pub fn heartbeats_received(&self) -> u64 {
        self.stats.received.load(Ordering::Relaxed)
    }

    /// When the last heartbeat reply arrived.
    pub fn last_heartbeat_received(&self) -> Option<Instant> {
        self.stats.last_reply()
    }

    /// Whether a heartbeat reply arrived within the last three intervals.
    ///
    /// Always `false` when heartbeats are disabled.
    pub fn is_host_alive(&self) -> bool {
        let (Some(interval), Some(last)) = (self.heartbeat_interval, self.stats.last_reply()) else {
            return false;
        };
        last.elapsed() <= interval * 3
    }

    /// Stop both tasks. Idempotent.
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        tracing::info!(address = %self.address, "client shut down");
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ClientRouter {
    address: String,
    session: Option<ClientSession>,
    waiters: Vec<oneshot::Sender<bool>>,
    status: watch::Sender<ConnectionStatus>,
    stats: Arc<HeartbeatStats>,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientRouter {
    async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
        mut failures: mpsc::UnboundedReceiver<FailedSend>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: watch::Receiver<bool>,
        heartbeat_interval: Option<Duration>,
    ) {
        let mut heartbeat = heartbeat_interval.filter(|d| !d.is_zero()).map(|period| {
            let mut interval = interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(raw) = inbound.recv() => self.on_inbound(raw),
                Some(command) = commands.recv() => self.on_command(command),
                Some(failed) = failures.recv() => {
                    tracing::warn!(address = %self.address, failure = %failed.failure, "send to host failed");
                }
                _ = tick(&mut heartbeat) => self.send_heartbeat(),
                else => break,
            }
        }

        // Sends accepted before shutdown still go out within the linger period.
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Send(_) => self.on_command(command),
                Command::Secure(_) => {}
            }
        }

        // Waiters see a closed channel, which the handle reports as disposal.
        self.waiters.clear();
        tracing::debug!(address = %self.address, "client router stopped");
    }

    fn on_inbound(&mut self, raw: Vec<Vec<u8>>) {
        let message = match Message::from_dealer_frames(self.address.as_str(), raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame set");
                return;
            }
        };

        let kind = message.kind();
        if kind == MessageKind::HeartbeatReply {
            self.stats.record_reply(Instant::now());
            return;
        }
        if kind == MessageKind::HeartbeatRequest {
            tracing::debug!("ignoring heartbeat request from host");
            return;
        }

        let Some(session) = self.session.as_ref() else {
            self.emit(ClientEvent::MessageReceived(message));
            return;
        };

        if kind.is_handshake_reply() {
            self.on_handshake_reply(&message.frames);
            return;
        }

        let Some(cipher) = session.cipher() else {
            tracing::warn!(kind = ?kind, "dropping message before session is established");
            return;
        };
        let frames = message.frames.iter().map(|f| cipher.decrypt(f)).collect();
        self.emit(ClientEvent::MessageReceived(Message {
            address: message.address,
            frames,
        }));
    }

    fn on_handshake_reply(&mut self, frames: &[Vec<u8>]) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !matches!(session.phase(), ClientPhase::KeyExchange | ClientPhase::Proof) {
            tracing::debug!(phase = ?session.phase(), "ignoring handshake reply outside a handshake");
            return;
        }

        match session.handle_reply(frames) {
            Ok(ClientStep::Send(reply)) => self.enqueue(reply),
            Ok(ClientStep::Established) => {
                tracing::info!(address = %self.address, "secure session established");
                self.finish(ConnectionStatus::Established);
                self.emit(ClientEvent::ProtocolEstablished);
            }
            Err(e) => {
                tracing::warn!(address = %self.address, error = %e, "handshake failed");
                self.finish(ConnectionStatus::Failed);
                self.emit(ClientEvent::ProtocolFailed(e.to_string()));
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send(frames) => {
                let frames = match self.session.as_ref() {
                    None => frames,
                    Some(session) => match session.cipher() {
                        Some(cipher) => frames.iter().map(|f| cipher.encrypt(f)).collect(),
                        None => {
                            tracing::warn!("dropping send queued before a handshake restart");
                            return;
                        }
                    },
                };
                self.enqueue(frames);
            }
            Command::Secure(waiter) => self.on_secure(waiter),
        }
    }

    fn on_secure(&mut self, waiter: Option<oneshot::Sender<bool>>) {
        let Some(session) = self.session.as_mut() else {
            if let Some(waiter) = waiter {
                let _ = waiter.send(false);
            }
            return;
        };

        if session.phase() == ClientPhase::Established {
            if let Some(waiter) = waiter {
                let _ = waiter.send(true);
            }
            return;
        }

        // A stalled attempt is abandoned: its keys are replaced and the host
        // restarts the session on the new init request.
        if matches!(session.phase(), ClientPhase::KeyExchange | ClientPhase::Proof) {
            tracing::debug!(address = %self.address, phase = ?session.phase(), "restarting handshake in flight");
        }
        let frames = session.start();
        self.status.send_replace(ConnectionStatus::Pending);
        self.enqueue(frames);
        self.waiters.extend(waiter);
    }

    fn send_heartbeat(&mut self) {
        self.enqueue(vec![MessageKind::HeartbeatRequest.frame()]);
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&mut self, status: ConnectionStatus) {
        self.status.send_replace(status);
        let established = status == ConnectionStatus::Established;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(established);
        }
    }

    fn enqueue(&self, frames: Vec<Vec<u8>>) {
        let _ = self.outbound.send(Outbound {
            frames: Message::dealer_frames(frames),
            origin: None,
        });
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::socket::SendFailure;
    use zkw_core::Credentials;

    struct ChannelSocket {
        incoming: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
        sent: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MultipartSocket for ChannelSocket {
        async fn recv(&mut self) -> Option<Vec<Vec<u8>>> {
            self.incoming.recv().await
        }

        async fn send(&mut self, frames: Vec<Vec<u8>>) -> std::result::Result<(), SendFailure> {
            let _ = self.sent.send(frames);
            Ok(())
        }
    }

    fn start(
        config: ClientConfig,
    ) -> (Client, ClientEvents, mpsc::UnboundedSender<Vec<Vec<u8>>>, mpsc::UnboundedReceiver<Vec<Vec<u8>>>) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let socket = ChannelSocket {
            incoming: in_rx,
            sent: out_tx,
        };
        let (client, events) = Client::with_socket(socket, "client-1", config);
        (client, events, in_tx, out_rx)
    }

    async fn next_sent(sent: &mut mpsc::UnboundedReceiver<Vec<Vec<u8>>>) -> Vec<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(1), sent.recv())
            .await
            .expect("frame set in time")
            .expect("frame set")
    }

    #[tokio::test]
    async fn test_unsecured_client_sends_plain() {
        let (client, mut events, incoming, mut sent) = start(ClientConfig::default());

        assert_eq!(client.status(), ConnectionStatus::Unsecured);
        assert!(client.can_send());
        assert!(!client.secure_connection(true, Duration::from_millis(100)).await.unwrap());

        client.send(vec![b"ping".to_vec()]).unwrap();
        assert_eq!(next_sent(&mut sent).await, vec![Vec::new(), b"ping".to_vec()]);

        incoming.send(vec![Vec::new(), b"pong".to_vec()]).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::MessageReceived(Message::new("client-1", vec![b"pong".to_vec()]).unwrap())
        );
    }

    #[tokio::test]
    async fn test_send_refused_before_handshake() {
        let config = ClientConfig::default().with_credentials(Credentials::new("alice", "pw"));
        let (client, _events, _incoming, _sent) = start(config);

        assert_eq!(client.status(), ConnectionStatus::Idle);
        assert!(!client.can_send());
        assert!(matches!(
            client.send(vec![b"x".to_vec()]),
            Err(Error::SessionNotEstablished)
        ));
        assert!(matches!(client.send(Vec::new()), Err(Error::EmptyMessage)));
    }

    #[tokio::test]
    async fn test_secure_connection_sends_init_and_reports_failure() {
        let config = ClientConfig::default().with_credentials(Credentials::new("alice", "pw"));
        let (client, mut events, incoming, mut sent) = start(config);

        assert!(!client.secure_connection(false, Duration::ZERO).await.unwrap());
        let init = next_sent(&mut sent).await;
        assert_eq!(init.len(), 3);
        assert_eq!(init[1], MessageKind::InitRequest.frame());
        assert_eq!(init[2].len(), 32);
        assert_eq!(client.status(), ConnectionStatus::Pending);

        incoming
            .send(vec![Vec::new(), MessageKind::InitFailure.frame(), vec![0; 32], vec![0; 32]])
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ClientEvent::ProtocolFailed(_)));
        assert_eq!(client.status(), ConnectionStatus::Failed);

        // A second failure reply for the same attempt is ignored.
        incoming
            .send(vec![Vec::new(), MessageKind::InitFailure.frame(), vec![0; 32], vec![0; 32]])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_blocking_secure_times_out() {
        let config = ClientConfig::default().with_credentials(Credentials::new("alice", "pw"));
        let (client, _events, _incoming, _sent) = start(config);

        let established = client.secure_connection(true, Duration::from_millis(50)).await.unwrap();
        assert!(!established);
        assert_eq!(client.status(), ConnectionStatus::Pending);
    }

    #[tokio::test]
    async fn test_heartbeats_counted() {
        let config = ClientConfig {
            heartbeat_interval: Some(Duration::from_millis(20)),
            ..ClientConfig::default()
        };
        let (client, _events, incoming, mut sent) = start(config);

        let beat = next_sent(&mut sent).await;
        assert_eq!(beat, vec![Vec::new(), MessageKind::HeartbeatRequest.frame()]);
        assert!(!client.is_host_alive());

        incoming
            .send(vec![Vec::new(), MessageKind::HeartbeatReply.frame()])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(client.heartbeats_sent() >= 1);
        assert_eq!(client.heartbeats_received(), 1);
        assert!(client.last_heartbeat_received().is_some());
        assert!(client.is_host_alive());
    }

    #[tokio::test]
    async fn test_secure_retry_restarts_stalled_handshake() {
        let config = ClientConfig::default().with_credentials(Credentials::new("alice", "pw"));
        let (client, _events, _incoming, mut sent) = start(config);

        // The host never answers, so the first attempt stalls.
        assert!(!client.secure_connection(true, Duration::from_millis(50)).await.unwrap());
        let first = next_sent(&mut sent).await;
        assert_eq!(client.status(), ConnectionStatus::Pending);

        assert!(!client.secure_connection(true, Duration::from_millis(50)).await.unwrap());
        let second = next_sent(&mut sent).await;
        assert_eq!(second[1], MessageKind::InitRequest.frame());
        assert_eq!(second[2].len(), 32);
        assert_ne!(second[2], first[2], "retry uses a fresh sealing key");
        assert_eq!(client.status(), ConnectionStatus::Pending);
    }

    #[tokio::test]
    async fn test_linger_flushes_accepted_sends() {
        let config = ClientConfig {
            linger: Duration::from_secs(1),
            ..ClientConfig::default()
        };
        let (client, _events, _incoming, mut sent) = start(config);

        for i in 0..20u8 {
            client.send(vec![vec![i]]).unwrap();
        }
        client.shutdown();

        for i in 0..20u8 {
            assert_eq!(next_sent(&mut sent).await, vec![Vec::new(), vec![i]]);
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (client, _events, _incoming, _sent) = start(ClientConfig::default());
        client.shutdown();
        client.shutdown();

        assert!(!client.can_send());
        assert!(matches!(client.send(vec![b"x".to_vec()]), Err(Error::Disposed)));
        assert!(matches!(
            client.secure_connection(true, Duration::from_millis(10)).await,
            Err(Error::Disposed)
        ));
    }
}
