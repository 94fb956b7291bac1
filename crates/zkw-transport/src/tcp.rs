//! TCP router and dealer sockets.
//!
//! Frame sets travel over TCP with a simple length-prefixed encoding:
//!
//! ```text
//! +-------------+---------------+---------+---------------+---------+----
//! | count (u32) | len_0 (u32)   | frame_0 | len_1 (u32)   | frame_1 | ...
//! +-------------+---------------+---------+---------------+---------+----
//! ```
//!
//! All integers are big-endian. A dealer opens the connection by sending a
//! one-frame greeting carrying its address; the router then routes frame sets
//! addressed to that string over the connection. A reconnect with the same
//! address replaces the previous route.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::socket::{MultipartSocket, SendFailure, EHOSTUNREACH, EIO};
use crate::{Error, Result};

/// Maximum frames in one frame set.
pub const MAX_FRAMES: usize = 1024;

/// Maximum bytes in one frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode a frame set.
///
/// # Errors
///
/// Returns `Error::InvalidEncoding` if a limit is exceeded.
pub fn encode_multipart(frames: &[Vec<u8>]) -> Result<Vec<u8>> {
    if frames.len() > MAX_FRAMES {
        return Err(Error::InvalidEncoding(format!("{} frames exceeds {}", frames.len(), MAX_FRAMES)));
    }

    let total: usize = 4 + frames.iter().map(|f| 4 + f.len()).sum::<usize>();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(frames.len() as u32).to_be_bytes());
    for frame in frames {
        if frame.len() > MAX_FRAME_LEN {
            return Err(Error::InvalidEncoding(format!("frame of {} bytes exceeds limit", frame.len())));
        }
        buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        buf.extend_from_slice(frame);
    }
    Ok(buf)
}

/// Decode one frame set from the front of `buf`.
///
/// Returns the frames and the number of bytes consumed, or `None` if `buf`
/// does not yet hold a complete frame set.
///
/// # Errors
///
/// Returns `Error::InvalidEncoding` if a limit is exceeded.
pub fn decode_multipart(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>> {
    let Some(count) = read_be_u32(buf, 0) else {
        return Ok(None);
    };
    let count = count as usize;
    if count > MAX_FRAMES {
        return Err(Error::InvalidEncoding(format!("{} frames exceeds {}", count, MAX_FRAMES)));
    }

    let mut offset = 4;
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(len) = read_be_u32(buf, offset) else {
            return Ok(None);
        };
        let len = len as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::InvalidEncoding(format!("frame of {} bytes exceeds limit", len)));
        }
        offset += 4;
        let Some(frame) = buf.get(offset..offset + len) else {
            return Ok(None);
        };
        frames.push(frame.to_vec());
        offset += len;
    }
    Ok(Some((frames, offset)))
}

fn read_be_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Read one frame set. `Ok(None)` on a clean close between frame sets.
pub async fn read_multipart<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<Vec<u8>>>> {
    let count = match reader.read_u32().await {
        Ok(count) => count as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if count > MAX_FRAMES {
        return Err(Error::InvalidEncoding(format!("{} frames exceeds {}", count, MAX_FRAMES)));
    }

    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.read_u32().await? as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::InvalidEncoding(format!("frame of {} bytes exceeds limit", len)));
        }
        // Grow with the bytes that actually arrive, not the claimed length.
        let mut frame = Vec::new();
        let read = (&mut *reader).take(len as u64).read_to_end(&mut frame).await?;
        if read != len {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        frames.push(frame);
    }
    Ok(Some(frames))
}

/// Write one frame set.
pub async fn write_multipart<W: AsyncWrite + Unpin>(writer: &mut W, frames: &[Vec<u8>]) -> Result<()> {
    let buf = encode_multipart(frames)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

enum PeerEvent {
    Connected {
        identity: String,
        conn_id: u64,
        writer: OwnedWriteHalf,
    },
    Frames {
        identity: String,
        frames: Vec<Vec<u8>>,
    },
    Disconnected {
        identity: String,
        conn_id: u64,
    },
}

struct Peer {
    conn_id: u64,
    writer: OwnedWriteHalf,
}

/// Router-side TCP socket.
///
/// Accepts dealer connections in a background task. Received frame sets are
/// returned as `[address, <empty>, payload...]`.
pub struct TcpRouter {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    peers: HashMap<String, Peer>,
    accept_task: JoinHandle<()>,
}

impl TcpRouter {
    /// Bind a listener and start accepting dealers.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionFailed` if binding fails.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Router bind failed: {}", e)))?;
        let local_addr = listener.local_addr()?;
        let (tx, events) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(accept_loop(listener, tx));
        tracing::info!(%local_addr, "router socket bound");

        Ok(Self {
            local_addr,
            events,
            peers: HashMap::new(),
            accept_task,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently routed dealers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<PeerEvent>) {
    let mut readers = JoinSet::new();
    let mut next_conn_id = 0u64;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    next_conn_id += 1;
                    tracing::debug!(%peer_addr, conn_id = next_conn_id, "dealer connected");
                    readers.spawn(read_peer(stream, next_conn_id, tx.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
}

async fn read_peer(stream: TcpStream, conn_id: u64, tx: mpsc::UnboundedSender<PeerEvent>) {
    let _ = stream.set_nodelay(true);
    let (mut reader, writer) = stream.into_split();

    let identity = match read_multipart(&mut reader).await {
        Ok(Some(frames)) if frames.len() == 1 => match String::from_utf8(frames.into_iter().next().unwrap_or_default()) {
            Ok(identity) if !identity.is_empty() => identity,
            _ => {
                tracing::warn!(conn_id, "dealer greeting is not a valid address");
                return;
            }
        },
        Ok(_) => {
            tracing::warn!(conn_id, "dealer closed before a valid greeting");
            return;
        }
        Err(e) => {
            tracing::warn!(conn_id, error = %e, "dealer greeting failed");
            return;
        }
    };

    if tx
        .send(PeerEvent::Connected {
            identity: identity.clone(),
            conn_id,
            writer,
        })
        .is_err()
    {
        return;
    }

    loop {
        match read_multipart(&mut reader).await {
            Ok(Some(frames)) => {
                let event = PeerEvent::Frames {
                    identity: identity.clone(),
                    frames,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "dealer read failed");
                break;
            }
        }
    }

    tracing::debug!(conn_id, address = %identity, "dealer disconnected");
    let _ = tx.send(PeerEvent::Disconnected { identity, conn_id });
}

#[async_trait]
impl MultipartSocket for TcpRouter {
    async fn recv(&mut self) -> Option<Vec<Vec<u8>>> {
        loop {
            match self.events.recv().await? {
                PeerEvent::Connected {
                    identity,
                    conn_id,
                    writer,
                } => {
                    self.peers.insert(identity, Peer { conn_id, writer });
                }
                PeerEvent::Disconnected { identity, conn_id } => {
                    if self.peers.get(&identity).is_some_and(|p| p.conn_id == conn_id) {
                        self.peers.remove(&identity);
                    }
                }
                PeerEvent::Frames { identity, frames } => {
                    let mut raw = Vec::with_capacity(frames.len() + 1);
                    raw.push(identity.into_bytes());
                    raw.extend(frames);
                    return Some(raw);
                }
            }
        }
    }

    async fn send(&mut self, frames: Vec<Vec<u8>>) -> std::result::Result<(), SendFailure> {
        let mut frames = frames.into_iter();
        let address = frames
            .next()
            .map(|a| String::from_utf8_lossy(&a).into_owned())
            .ok_or_else(|| SendFailure::new(EHOSTUNREACH, "missing address frame"))?;
        let payload: Vec<Vec<u8>> = frames.collect();

        let Some(peer) = self.peers.get_mut(&address) else {
            return Err(SendFailure::new(EHOSTUNREACH, format!("no route to {}", address)));
        };

        if let Err(e) = write_multipart(&mut peer.writer, &payload).await {
            self.peers.remove(&address);
            return Err(SendFailure::new(EIO, e.to_string()));
        }
        Ok(())
    }
}

impl Drop for TcpRouter {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Dealer-side TCP socket.
pub struct TcpDealer {
    address: String,
    local_addr: SocketAddr,
    writer: OwnedWriteHalf,
    frames: mpsc::UnboundedReceiver<Vec<Vec<u8>>>,
    reader_task: JoinHandle<()>,
}

impl TcpDealer {
    /// Connect to a router and announce `address`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConnectionFailed` if the connection or greeting fails.
    pub async fn connect(addr: impl ToSocketAddrs, address: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Dealer connect failed: {}", e)))?;
        let _ = stream.set_nodelay(true);
        let local_addr = stream.local_addr()?;
        let (mut reader, mut writer) = stream.into_split();

        write_multipart(&mut writer, &[address.as_bytes().to_vec()])
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Greeting failed: {}", e)))?;

        let (tx, frames) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            loop {
                match read_multipart(&mut reader).await {
                    Ok(Some(set)) => {
                        if tx.send(set).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(error = %e, "router read failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            address: address.to_string(),
            local_addr,
            writer,
            frames,
            reader_task,
        })
    }

    /// Address announced to the router.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Local end of the connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl MultipartSocket for TcpDealer {
    async fn recv(&mut self) -> Option<Vec<Vec<u8>>> {
        self.frames.recv().await
    }

    async fn send(&mut self, frames: Vec<Vec<u8>>) -> std::result::Result<(), SendFailure> {
        write_multipart(&mut self.writer, &frames)
            .await
            .map_err(|e| SendFailure::new(EIO, e.to_string()))
    }
}

impl Drop for TcpDealer {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
