//! Socket task shared by host and client routers.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Interval;
use zkw_core::Message;

use crate::socket::{MultipartSocket, SendFailure};

/// A frame set queued for the socket, with the application message it came
/// from (handshake replies and heartbeats have none).
pub(crate) struct Outbound {
    pub frames: Vec<Vec<u8>>,
    pub origin: Option<Message>,
}

/// A send the socket rejected.
pub(crate) struct FailedSend {
    pub origin: Option<Message>,
    pub failure: SendFailure,
}

/// Owns the socket and the outbound queue.
///
/// Runs until shutdown is signalled or the socket closes, then gives queued
/// frame sets up to `linger` to flush. The drain ends once every sender of
/// `outbound` is gone.
pub(crate) async fn run_socket<S: MultipartSocket>(
    mut socket: S,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    failures: mpsc::UnboundedSender<FailedSend>,
    mut shutdown: watch::Receiver<bool>,
    linger: Duration,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv() => match received {
                Some(frames) => {
                    if inbound.send(frames).is_err() {
                        break;
                    }
                }
                None => {
                    tracing::info!("socket closed");
                    break;
                }
            },
            Some(item) = outbound.recv() => {
                if let Err(failure) = socket.send(item.frames).await {
                    tracing::debug!(%failure, "send failed");
                    let _ = failures.send(FailedSend {
                        origin: item.origin,
                        failure,
                    });
                }
            }
        }
    }

    if linger.is_zero() {
        return;
    }
    // The router task flushes accepted sends into `outbound` and then drops
    // its sender, which ends the drain early.
    let drained = tokio::time::timeout(linger, async {
        while let Some(item) = outbound.recv().await {
            if let Err(failure) = socket.send(item.frames).await {
                tracing::debug!(%failure, "send failed during linger");
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!(?linger, "linger expired with sends pending");
    }
}

/// Tick an optional interval; pending forever when absent.
pub(crate) async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
