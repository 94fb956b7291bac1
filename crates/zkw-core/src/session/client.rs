//! Client-side handshake state machine.

use zeroize::Zeroizing;
use zkw_crypto::sealed::{seal, SealingKeyPair, PUBLIC_KEY_LEN};
use zkw_crypto::srp::{
    calculate_random_scramble, client_compute_session_key, client_create_session_hash, client_ephemeral,
    crypt_rand, server_create_session_hash, verify_proof, Ephemeral, HASH_LEN,
};
use zkw_crypto::SessionCipher;

use crate::credentials::Credentials;
use crate::header::{classify_frames, MessageKind};
use crate::{Error, Result};

/// Externally visible handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// No handshake in flight.
    Init,
    /// Init request sent, waiting for the host key.
    KeyExchange,
    /// Identity and ephemeral sent, or proof sent.
    Proof,
    /// Cipher installed.
    Established,
    /// Last attempt failed.
    Failed,
}

/// What the router should do after a host reply.
#[derive(Debug)]
pub enum ClientStep {
    /// Send these frames to the host.
    Send(Vec<Vec<u8>>),
    /// Handshake complete; [`ClientSession::cipher`] is now available.
    Established,
}

enum ClientState {
    Init,
    AwaitInitReply {
        sealing: SealingKeyPair,
    },
    AwaitHandshakeReply {
        sealing: SealingKeyPair,
        host_public: [u8; PUBLIC_KEY_LEN],
        ephemeral: Ephemeral,
    },
    AwaitProofReply {
        sealing: SealingKeyPair,
        client_public: Vec<u8>,
        client_proof: [u8; HASH_LEN],
        session_key: Zeroizing<[u8; HASH_LEN]>,
        scramble: [u8; HASH_LEN],
    },
    Established,
    Failed,
}

/// One client's side of the handshake.
///
/// The throwaway sealing keypair and the SRP ephemeral live only inside the
/// state they belong to and are dropped on the next transition.
pub struct ClientSession {
    credentials: Credentials,
    reported_address: String,
    state: ClientState,
    cipher: Option<SessionCipher>,
}

impl ClientSession {
    /// Create a session for `credentials`.
    ///
    /// `reported_address` is the self-reported IP sent to the host for
    /// diagnostics.
    pub fn new(credentials: Credentials, reported_address: impl Into<String>) -> Self {
        Self {
            credentials,
            reported_address: reported_address.into(),
            state: ClientState::Init,
            cipher: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> ClientPhase {
        match self.state {
            ClientState::Init => ClientPhase::Init,
            ClientState::AwaitInitReply { .. } => ClientPhase::KeyExchange,
            ClientState::AwaitHandshakeReply { .. } | ClientState::AwaitProofReply { .. } => ClientPhase::Proof,
            ClientState::Established => ClientPhase::Established,
            ClientState::Failed => ClientPhase::Failed,
        }
    }

    /// Whether the cipher is installed.
    pub fn is_established(&self) -> bool {
        matches!(self.state, ClientState::Established)
    }

    /// Installed session cipher.
    pub fn cipher(&self) -> Option<&SessionCipher> {
        self.cipher.as_ref()
    }

    /// Identity this session authenticates as.
    pub fn identity(&self) -> &str {
        self.credentials.identity()
    }

    /// Begin (or restart) the handshake.
    ///
    /// Returns the init request frames. Any previous cipher is discarded.
    pub fn start(&mut self) -> Vec<Vec<u8>> {
        let sealing = SealingKeyPair::generate();
        let frames = vec![MessageKind::InitRequest.frame(), sealing.public_key().to_vec()];

        self.cipher = None;
        self.state = ClientState::AwaitInitReply { sealing };
        tracing::debug!(identity = %self.credentials.identity(), "handshake started");
        frames
    }

    /// Feed a host reply into the state machine.
    ///
    /// # Errors
    ///
    /// Any error is terminal for this attempt: the session moves to
    /// [`ClientPhase::Failed`] and a new attempt needs [`start`](Self::start).
    pub fn handle_reply(&mut self, frames: &[Vec<u8>]) -> Result<ClientStep> {
        let state = std::mem::replace(&mut self.state, ClientState::Failed);
        let result = self.advance(state, frames);
        if let Err(e) = &result {
            tracing::debug!(error = %e, "handshake failed");
        }
        result
    }

    fn advance(&mut self, state: ClientState, frames: &[Vec<u8>]) -> Result<ClientStep> {
        let kind = classify_frames(frames);
        if kind.is_failure() {
            return Err(Error::HandshakeRejected(kind));
        }

        match (state, kind) {
            (ClientState::AwaitInitReply { sealing }, MessageKind::InitSuccess) => {
                self.on_init_success(sealing, frames)
            }
            (
                ClientState::AwaitHandshakeReply {
                    sealing,
                    host_public,
                    ephemeral,
                },
                MessageKind::HandshakeSuccess,
            ) => self.on_handshake_success(sealing, host_public, ephemeral, frames),
            (
                ClientState::AwaitProofReply {
                    sealing,
                    client_public,
                    client_proof,
                    session_key,
                    scramble,
                },
                MessageKind::ProofSuccess,
            ) => self.on_proof_success(
                sealing,
                &client_public,
                &client_proof,
                session_key.as_slice(),
                &scramble,
                frames,
            ),
            (state, got) => Err(Error::UnexpectedMessage {
                phase: state.name(),
                got,
            }),
        }
    }

    fn on_init_success(&mut self, sealing: SealingKeyPair, frames: &[Vec<u8>]) -> Result<ClientStep> {
        let [_, host_public] = frames else {
            return Err(Error::InvalidFrame(format!("init reply has {} frames, expected 2", frames.len())));
        };
        let host_public: [u8; PUBLIC_KEY_LEN] = host_public
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidFrame("host key has wrong length".into()))?;

        let ephemeral = client_ephemeral(&crypt_rand())?;
        let out = vec![
            MessageKind::HandshakeRequest.frame(),
            seal(&host_public, self.credentials.identity().as_bytes())?,
            seal(&host_public, ephemeral.public())?,
            seal(&host_public, self.reported_address.as_bytes())?,
        ];

        self.state = ClientState::AwaitHandshakeReply {
            sealing,
            host_public,
            ephemeral,
        };
        Ok(ClientStep::Send(out))
    }

    fn on_handshake_success(
        &mut self,
        sealing: SealingKeyPair,
        host_public: [u8; PUBLIC_KEY_LEN],
        ephemeral: Ephemeral,
        frames: &[Vec<u8>],
    ) -> Result<ClientStep> {
        let [_, sealed_salt, sealed_b] = frames else {
            return Err(Error::InvalidFrame(format!(
                "handshake reply has {} frames, expected 3",
                frames.len()
            )));
        };

        let salt = sealing.open(sealed_salt)?;
        let server_public = sealing.open(sealed_b)?;
        let scramble = calculate_random_scramble(ephemeral.public(), &server_public)?;
        let session_key = client_compute_session_key(
            &salt,
            self.credentials.identity(),
            self.credentials.secret(),
            &ephemeral,
            &server_public,
            &scramble,
        )?;
        let client_proof = client_create_session_hash(
            self.credentials.identity(),
            &salt,
            ephemeral.public(),
            &server_public,
            session_key.as_slice(),
        );

        let out = vec![MessageKind::ProofRequest.frame(), seal(&host_public, &client_proof)?];

        self.state = ClientState::AwaitProofReply {
            sealing,
            client_public: ephemeral.public().to_vec(),
            client_proof,
            session_key,
            scramble,
        };
        Ok(ClientStep::Send(out))
    }

    fn on_proof_success(
        &mut self,
        sealing: SealingKeyPair,
        client_public: &[u8],
        client_proof: &[u8],
        session_key: &[u8],
        scramble: &[u8],
        frames: &[Vec<u8>],
    ) -> Result<ClientStep> {
        let [_, sealed_m2] = frames else {
            return Err(Error::InvalidFrame(format!("proof reply has {} frames, expected 2", frames.len())));
        };

        let host_proof = sealing.open(sealed_m2)?;
        let expected = server_create_session_hash(client_public, client_proof, session_key);
        if !verify_proof(&expected, &host_proof) {
            return Err(Error::ProofMismatch);
        }

        self.cipher = Some(SessionCipher::from_session(session_key, scramble)?);
        self.state = ClientState::Established;
        tracing::debug!(identity = %self.credentials.identity(), "handshake proof verified");
        Ok(ClientStep::Established)
    }
}

impl ClientState {
    fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::AwaitInitReply { .. } => "key-exchange",
            Self::AwaitHandshakeReply { .. } => "handshake",
            Self::AwaitProofReply { .. } => "proof",
            Self::Established => "established",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("identity", &self.credentials.identity())
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ClientSession {
        ClientSession::new(Credentials::new("alice", "s3cret"), "127.0.0.1")
    }

    #[test]
    fn test_start_emits_init_request() {
        let mut session = session();
        assert_eq!(session.phase(), ClientPhase::Init);

        let frames = session.start();
        assert_eq!(frames.len(), 2);
        assert_eq!(classify_frames(&frames), MessageKind::InitRequest);
        assert_eq!(frames[1].len(), PUBLIC_KEY_LEN);
        assert_eq!(session.phase(), ClientPhase::KeyExchange);
    }

    #[test]
    fn test_failure_reply_is_terminal() {
        let mut session = session();
        session.start();

        let reply = vec![MessageKind::InitFailure.frame(), vec![0u8; 32], vec![0u8; 32]];
        let result = session.handle_reply(&reply);
        assert!(matches!(result, Err(Error::HandshakeRejected(MessageKind::InitFailure))));
        assert_eq!(session.phase(), ClientPhase::Failed);
        assert!(session.cipher().is_none());
    }

    #[test]
    fn test_out_of_order_reply_fails() {
        let mut session = session();
        session.start();

        let reply = vec![MessageKind::ProofSuccess.frame(), vec![0u8; 80]];
        let result = session.handle_reply(&reply);
        assert!(matches!(
            result,
            Err(Error::UnexpectedMessage {
                phase: "key-exchange",
                got: MessageKind::ProofSuccess
            })
        ));
    }

    #[test]
    fn test_reply_before_start_fails() {
        let mut session = session();
        let reply = vec![MessageKind::InitSuccess.frame(), vec![9u8; 32]];
        assert!(session.handle_reply(&reply).is_err());
        assert_eq!(session.phase(), ClientPhase::Failed);
    }

    #[test]
    fn test_init_reply_wrong_frame_count() {
        let mut session = session();
        session.start();
        let reply = vec![MessageKind::InitSuccess.frame()];
        assert!(matches!(session.handle_reply(&reply), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn test_init_success_produces_sealed_handshake() {
        let host_keys = SealingKeyPair::generate();
        let mut session = session();
        session.start();

        let reply = vec![MessageKind::InitSuccess.frame(), host_keys.public_key().to_vec()];
        let step = session.handle_reply(&reply).expect("handshake request");
        let ClientStep::Send(frames) = step else {
            panic!("expected frames to send");
        };

        assert_eq!(frames.len(), 4);
        assert_eq!(classify_frames(&frames), MessageKind::HandshakeRequest);
        assert_eq!(host_keys.open(&frames[1]).unwrap(), b"alice");
        assert_eq!(host_keys.open(&frames[3]).unwrap(), b"127.0.0.1");
        assert_eq!(session.phase(), ClientPhase::Proof);
    }

    #[test]
    fn test_restart_resets_state() {
        let mut session = session();
        session.start();
        let _ = session.handle_reply(&[MessageKind::ProtocolFailure.frame()]);
        assert_eq!(session.phase(), ClientPhase::Failed);

        session.start();
        assert_eq!(session.phase(), ClientPhase::KeyExchange);
    }
}
