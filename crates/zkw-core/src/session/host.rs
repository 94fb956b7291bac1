//! Host-side handshake state machine.

use std::time::Instant;

use zeroize::Zeroizing;
use zkw_crypto::sealed::{sealed_len, seal, SealingKeyPair, PUBLIC_KEY_LEN};
use zkw_crypto::srp::{
    calculate_random_scramble, client_create_session_hash, crypt_rand, server_compute_session_key,
    server_create_session_hash, server_ephemeral, verify_proof, HASH_LEN, PUBLIC_LEN, RANDOM_LEN,
};
use zkw_crypto::SessionCipher;

use super::{dummy_frame, SessionInfo};
use crate::credentials::CredentialRepository;
use crate::header::{classify_frames, MessageKind};
use crate::{Error, Result};

/// Result of feeding a handshake request to a [`HostSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOutcome {
    /// Handshake is progressing.
    Continue,
    /// Proof verified and cipher installed.
    Established,
    /// Request rejected; the session is back in AwaitInit.
    Failed,
}

/// Frames to send back plus what happened.
#[derive(Debug)]
pub struct HostReply {
    /// Reply frames (tag first).
    pub frames: Vec<Vec<u8>>,
    /// Outcome of the step.
    pub outcome: HostOutcome,
}

impl HostReply {
    fn ok(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            outcome: HostOutcome::Continue,
        }
    }

    fn failed(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            outcome: HostOutcome::Failed,
        }
    }
}

enum HostState {
    AwaitInit,
    AwaitHandshake {
        sealing: SealingKeyPair,
        client_key: [u8; PUBLIC_KEY_LEN],
    },
    AwaitProof {
        sealing: SealingKeyPair,
        client_key: [u8; PUBLIC_KEY_LEN],
        client_public: Vec<u8>,
        expected_proof: [u8; HASH_LEN],
        session_key: Zeroizing<[u8; HASH_LEN]>,
        scramble: [u8; HASH_LEN],
    },
    Established,
}

/// Per-client host session.
///
/// Tracks handshake progress, the installed cipher, and the timestamps and
/// counters the session table sweeps on.
pub struct HostSession {
    address: String,
    identity: Option<String>,
    client_ip: Option<String>,
    created_at: Instant,
    last_message_at: Instant,
    last_heartbeat_at: Option<Instant>,
    message_count: u64,
    heartbeat_count: u64,
    state: HostState,
    cipher: Option<SessionCipher>,
}

impl HostSession {
    /// Create a session for a previously unseen client address.
    pub fn new(address: impl Into<String>, now: Instant) -> Self {
        Self {
            address: address.into(),
            identity: None,
            client_ip: None,
            created_at: now,
            last_message_at: now,
            last_heartbeat_at: None,
            message_count: 0,
            heartbeat_count: 0,
            state: HostState::AwaitInit,
            cipher: None,
        }
    }

    /// Client address this session belongs to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Authenticated identity, once the handshake request was accepted.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Installed session cipher.
    pub fn cipher(&self) -> Option<&SessionCipher> {
        self.cipher.as_ref()
    }

    /// Whether the proof exchange completed.
    pub fn is_established(&self) -> bool {
        matches!(self.state, HostState::Established) && self.cipher.is_some()
    }

    /// Most recent activity of any kind.
    pub fn last_touched(&self) -> Instant {
        match self.last_heartbeat_at {
            Some(hb) if hb > self.last_message_at => hb,
            _ => self.last_message_at,
        }
    }

    /// Record an application or handshake message.
    pub fn touch_message(&mut self, now: Instant) {
        self.last_message_at = now;
        self.message_count += 1;
    }

    /// Record a heartbeat.
    pub fn touch_heartbeat(&mut self, now: Instant) {
        self.last_heartbeat_at = Some(now);
        self.heartbeat_count += 1;
    }

    /// Read-only descriptor.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            address: self.address.clone(),
            identity: self.identity.clone(),
            client_ip: self.client_ip.clone(),
            created_at: self.created_at,
            last_message_at: self.last_message_at,
            last_heartbeat_at: self.last_heartbeat_at,
            message_count: self.message_count,
            heartbeat_count: self.heartbeat_count,
            established: self.is_established(),
        }
    }

    /// Feed a handshake request and produce the reply.
    ///
    /// Never fails: validation errors produce a failure reply of the same
    /// shape as the success reply and reset the session to AwaitInit.
    pub fn process(&mut self, frames: &[Vec<u8>], repository: &dyn CredentialRepository, now: Instant) -> HostReply {
        self.touch_message(now);
        let kind = classify_frames(frames);

        match kind {
            MessageKind::InitRequest => self.on_init(frames),
            MessageKind::HandshakeRequest => {
                let state = std::mem::replace(&mut self.state, HostState::AwaitInit);
                match self.on_handshake(state, frames, repository) {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!(address = %self.address, error = %e, "handshake request rejected");
                        self.reset();
                        HostReply::failed(handshake_failure())
                    }
                }
            }
            MessageKind::ProofRequest => {
                let state = std::mem::replace(&mut self.state, HostState::AwaitInit);
                match self.on_proof(state, frames) {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!(address = %self.address, error = %e, "proof request rejected");
                        self.reset();
                        HostReply::failed(proof_failure())
                    }
                }
            }
            other => {
                tracing::warn!(address = %self.address, kind = ?other, "not a handshake request");
                self.reset();
                HostReply::failed(vec![MessageKind::ProtocolFailure.frame(), dummy_frame(HASH_LEN)])
            }
        }
    }

    fn reset(&mut self) {
        self.state = HostState::AwaitInit;
        self.cipher = None;
    }

    fn on_init(&mut self, frames: &[Vec<u8>]) -> HostReply {
        // A new init restarts the handshake from any state.
        self.reset();
        self.identity = None;

        let client_key = match frames {
            [_, key] => <[u8; PUBLIC_KEY_LEN]>::try_from(key.as_slice()).ok(),
            _ => None,
        };
        let Some(client_key) = client_key else {
            tracing::warn!(address = %self.address, frames = frames.len(), "malformed init request");
            return HostReply::failed(init_failure());
        };

        let sealing = SealingKeyPair::generate();
        let reply = vec![MessageKind::InitSuccess.frame(), sealing.public_key().to_vec()];
        self.state = HostState::AwaitHandshake { sealing, client_key };
        tracing::debug!(address = %self.address, "init accepted");
        HostReply::ok(reply)
    }

    fn on_handshake(
        &mut self,
        state: HostState,
        frames: &[Vec<u8>],
        repository: &dyn CredentialRepository,
    ) -> Result<HostReply> {
        let (sealing, client_key) = match state {
            HostState::AwaitHandshake { sealing, client_key } => (sealing, client_key),
            other => {
                return Err(Error::UnexpectedMessage {
                    phase: other.name(),
                    got: MessageKind::HandshakeRequest,
                })
            }
        };
        let [_, sealed_identity, sealed_a, sealed_ip] = frames else {
            return Err(Error::InvalidFrame(format!(
                "handshake request has {} frames, expected 4",
                frames.len()
            )));
        };

        let identity = String::from_utf8(sealing.open(sealed_identity)?)
            .map_err(|_| Error::InvalidFrame("identity is not UTF-8".into()))?;
        let client_public = sealing.open(sealed_a)?;
        let client_ip = String::from_utf8_lossy(&sealing.open(sealed_ip)?).into_owned();

        let record = repository.lookup(&identity).ok_or(Error::UnknownIdentity)?;
        let ephemeral = server_ephemeral(&record.verifier, &crypt_rand())?;
        let scramble = calculate_random_scramble(&client_public, ephemeral.public())?;
        let session_key = server_compute_session_key(&record.verifier, &ephemeral, &client_public, &scramble)?;
        let expected_proof = client_create_session_hash(
            &identity,
            &record.salt,
            &client_public,
            ephemeral.public(),
            session_key.as_slice(),
        );

        let reply = vec![
            MessageKind::HandshakeSuccess.frame(),
            seal(&client_key, &record.salt)?,
            seal(&client_key, ephemeral.public())?,
        ];

        tracing::debug!(address = %self.address, identity = %identity, client_ip = %client_ip, "handshake request accepted");
        self.identity = Some(identity);
        self.client_ip = Some(client_ip);
        self.state = HostState::AwaitProof {
            sealing,
            client_key,
            client_public,
            expected_proof,
            session_key,
            scramble,
        };
        Ok(HostReply::ok(reply))
    }

    fn on_proof(&mut self, state: HostState, frames: &[Vec<u8>]) -> Result<HostReply> {
        let (sealing, client_key, client_public, expected_proof, session_key, scramble) = match state {
            HostState::AwaitProof {
                sealing,
                client_key,
                client_public,
                expected_proof,
                session_key,
                scramble,
            } => (sealing, client_key, client_public, expected_proof, session_key, scramble),
            other => {
                return Err(Error::UnexpectedMessage {
                    phase: other.name(),
                    got: MessageKind::ProofRequest,
                })
            }
        };
        let [_, sealed_m1] = frames else {
            return Err(Error::InvalidFrame(format!("proof request has {} frames, expected 2", frames.len())));
        };

        let client_proof = sealing.open(sealed_m1)?;
        if !verify_proof(&expected_proof, &client_proof) {
            return Err(Error::ProofMismatch);
        }

        let host_proof = server_create_session_hash(&client_public, &client_proof, session_key.as_slice());
        let reply = vec![MessageKind::ProofSuccess.frame(), seal(&client_key, &host_proof)?];

        self.cipher = Some(SessionCipher::from_session(session_key.as_slice(), &scramble)?);
        self.state = HostState::Established;
        tracing::debug!(address = %self.address, "handshake proof completed");
        Ok(HostReply {
            frames: reply,
            outcome: HostOutcome::Established,
        })
    }
}

impl HostState {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitInit => "await-init",
            Self::AwaitHandshake { .. } => "await-handshake",
            Self::AwaitProof { .. } => "await-proof",
            Self::Established => "established",
        }
    }
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("address", &self.address)
            .field("identity", &self.identity)
            .field("state", &self.state.name())
            .finish_non_exhaustive()
    }
}

/// `[INIT_FAIL, dummy32, dummy32]`
fn init_failure() -> Vec<Vec<u8>> {
    vec![
        MessageKind::InitFailure.frame(),
        dummy_frame(RANDOM_LEN),
        dummy_frame(RANDOM_LEN),
    ]
}

/// Sized like `[HS_OK, seal(salt), seal(B)]`.
fn handshake_failure() -> Vec<Vec<u8>> {
    vec![
        MessageKind::HandshakeFailure.frame(),
        dummy_frame(sealed_len(RANDOM_LEN)),
        dummy_frame(sealed_len(PUBLIC_LEN)),
    ]
}

/// Sized like `[PROOF_OK, seal(M2)]`.
fn proof_failure() -> Vec<Vec<u8>> {
    vec![MessageKind::ProofFailure.frame(), dummy_frame(sealed_len(HASH_LEN))]
}
