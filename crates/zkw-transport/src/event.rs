//! Router events.
//!
//! Events are delivered on unbounded channels from the router task, never
//! from the socket task.

use tokio::sync::mpsc;
use zkw_core::Message;

/// A message the socket could not deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFailure {
    /// The message as passed to `send`.
    pub message: Message,
    /// Error code (`EHOSTUNREACH`, `EIO`, `ECANCELED`).
    pub error_code: String,
    /// Human-readable detail.
    pub error_message: String,
}

/// Host router events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Application message (decrypted when authenticating).
    MessageReceived(Message),
    /// A send failed.
    SendFailed(MessageFailure),
    /// A client completed the handshake; carries its address.
    SessionEstablished(String),
}

/// Client router events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Application message (decrypted when authenticating).
    MessageReceived(Message),
    /// Handshake completed.
    ProtocolEstablished,
    /// Handshake failed; carries the reason.
    ProtocolFailed(String),
}

macro_rules! event_stream {
    ($name:ident, $event:ty) => {
        /// Receiving end of a router's event channel.
        #[derive(Debug)]
        pub struct $name {
            rx: mpsc::UnboundedReceiver<$event>,
        }

        impl $name {
            pub(crate) fn new(rx: mpsc::UnboundedReceiver<$event>) -> Self {
                Self { rx }
            }

            /// Next event; `None` once the router has stopped and all events are drained.
            pub async fn recv(&mut self) -> Option<$event> {
                self.rx.recv().await
            }

            /// Next event if one is ready.
            pub fn try_recv(&mut self) -> Option<$event> {
                self.rx.try_recv().ok()
            }
        }
    };
}

event_stream!(HostEvents, HostEvent);
event_stream!(ClientEvents, ClientEvent);
