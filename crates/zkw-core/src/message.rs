//! Wire message model and router/dealer framing.
//!
//! The transport addresses frame sets as follows:
//!
//! ```text
//! router side:  [address, <empty>, payload_0, payload_1, ...]
//! dealer side:  [<empty>, payload_0, payload_1, ...]
//! ```
//!
//! Only the single leading delimiter is stripped, so empty payload frames
//! survive the round trip.

use crate::header::{classify_frames, MessageKind};
use crate::{Error, Result};

/// A multi-frame message plus the logical address of the client it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Client address.
    pub address: String,
    /// Payload frames, in order. Never empty.
    pub frames: Vec<Vec<u8>>,
}

impl Message {
    /// Create a message.
    ///
    /// # Errors
    ///
    /// Returns `Error::EmptyMessage` if `frames` is empty.
    pub fn new(address: impl Into<String>, frames: Vec<Vec<u8>>) -> Result<Self> {
        if frames.is_empty() {
            return Err(Error::EmptyMessage);
        }
        Ok(Self {
            address: address.into(),
            frames,
        })
    }

    /// Parse a frame set received on a router socket.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidFrame` if the address is missing or not UTF-8, or the
    ///   delimiter is absent
    /// - `Error::EmptyMessage` if no payload follows the delimiter
    pub fn from_router_frames(raw: Vec<Vec<u8>>) -> Result<Self> {
        let mut raw = raw.into_iter();
        let address = raw
            .next()
            .ok_or_else(|| Error::InvalidFrame("missing address frame".into()))?;
        let address = String::from_utf8(address)
            .map_err(|_| Error::InvalidFrame("address is not UTF-8".into()))?;

        let frames = strip_delimiter(raw.collect())?;
        Self::new(address, frames)
    }

    /// Frame set to hand to a router socket.
    pub fn into_router_frames(self) -> Vec<Vec<u8>> {
        let mut raw = Vec::with_capacity(self.frames.len() + 2);
        raw.push(self.address.into_bytes());
        raw.push(Vec::new());
        raw.extend(self.frames);
        raw
    }

    /// Parse a frame set received on a dealer socket, tagging it with `address`.
    ///
    /// # Errors
    ///
    /// Same as [`strip_delimiter`], plus `Error::EmptyMessage`.
    pub fn from_dealer_frames(address: impl Into<String>, raw: Vec<Vec<u8>>) -> Result<Self> {
        Self::new(address, strip_delimiter(raw)?)
    }

    /// Frame set to hand to a dealer socket.
    pub fn dealer_frames(frames: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut raw = Vec::with_capacity(frames.len() + 1);
        raw.push(Vec::new());
        raw.extend(frames);
        raw
    }

    /// Classification by the first payload frame.
    pub fn kind(&self) -> MessageKind {
        classify_frames(&self.frames)
    }
}

/// Remove the single empty delimiter frame that leads a payload.
///
/// # Errors
///
/// Returns `Error::InvalidFrame` if the first frame is missing or not empty.
pub fn strip_delimiter(mut raw: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
    match raw.first() {
        Some(delimiter) if delimiter.is_empty() => {
            raw.remove(0);
            Ok(raw)
        }
        Some(_) => Err(Error::InvalidFrame("expected empty delimiter frame".into())),
        None => Err(Error::InvalidFrame("missing delimiter frame".into())),
    }
}
