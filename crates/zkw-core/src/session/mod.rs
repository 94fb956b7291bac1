//! Handshake state machines and the host session table.
//!
//! Three-phase handshake, after which both ends hold the same
//! [`SessionCipher`](zkw_crypto::SessionCipher):
//!
//! ```text
//! client                                              host
//!   | [INIT_REQ, client_pub]                  ------>  |  AwaitInit
//!   | <------                  [INIT_OK, host_pub]     |  -> AwaitHandshake
//!   | [HS_REQ, seal(I), seal(A), seal(ip)]    ------>  |
//!   | <------           [HS_OK, seal(salt), seal(B)]   |  -> AwaitProof
//!   | [PROOF_REQ, seal(M1)]                   ------>  |
//!   | <------                 [PROOF_OK, seal(M2)]     |  -> Established
//! ```
//!
//! Every host failure reply has the same frame count and frame sizes as the
//! success reply it replaces, filled with hash-derived random bytes.

mod client;
mod host;
mod table;

pub use client::{ClientPhase, ClientSession, ClientStep};
pub use host::{HostOutcome, HostReply, HostSession};
pub use table::{SessionInfo, SessionTable};

use zkw_crypto::srp::{compute_hash, crypt_rand};

/// Random filler of exactly `len` bytes built from hash blocks.
pub(crate) fn dummy_frame(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let block = compute_hash(&crypt_rand());
        let take = (len - out.len()).min(block.len());
        out.extend_from_slice(&block[..take]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_frame_lengths() {
        for len in [0, 1, 32, 33, 80, 304] {
            assert_eq!(dummy_frame(len).len(), len);
        }
        assert_ne!(dummy_frame(32), dummy_frame(32));
    }
}
