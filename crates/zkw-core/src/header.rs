//! Message-type header tags.
//!
//! The first frame of every handshake or heartbeat message is a 4-byte tag:
//!
//! ```text
//! +------+-----------+-------+------+
//! | SOH  | direction | phase | BEL  |
//! | 0x01 | ENQ / ACK | code  | 0x07 |
//! +------+-----------+-------+------+
//! ```
//!
//! Any first frame that is not exactly one of the known tags marks an
//! ordinary application message.

/// Start-of-header marker.
pub const SOH: u8 = 0x01;
/// Request direction marker.
pub const ENQ: u8 = 0x05;
/// Response direction marker.
pub const ACK: u8 = 0x06;
/// Terminator.
pub const BEL: u8 = 0x07;

/// Tag length in bytes.
pub const TAG_LEN: usize = 4;

/// Phase codes (third tag byte).
pub mod phase {
    /// Heartbeat.
    pub const HEARTBEAT: u8 = 0x07;
    /// Handshake (identity + ephemeral) request.
    pub const HANDSHAKE_REQUEST: u8 = 0x08;
    /// Proof request.
    pub const PROOF_REQUEST: u8 = 0x09;
    /// Handshake success.
    pub const HANDSHAKE_SUCCESS: u8 = 0x0A;
    /// Handshake failure.
    pub const HANDSHAKE_FAILURE: u8 = 0x0B;
    /// Proof success.
    pub const PROOF_SUCCESS: u8 = 0x0C;
    /// Proof failure.
    pub const PROOF_FAILURE: u8 = 0x0D;
    /// Generic protocol failure.
    pub const PROTOCOL_FAILURE: u8 = 0x0E;
    /// Init (key exchange) request.
    pub const INIT_REQUEST: u8 = 0x10;
    /// Init success.
    pub const INIT_SUCCESS: u8 = 0x11;
    /// Init failure.
    pub const INIT_FAILURE: u8 = 0x12;
}

/// Classification of a received message by its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client asks to start a handshake.
    InitRequest,
    /// Host accepted the init request.
    InitSuccess,
    /// Host rejected the init request.
    InitFailure,
    /// Client sends identity and ephemeral.
    HandshakeRequest,
    /// Host sends salt and ephemeral.
    HandshakeSuccess,
    /// Host rejected the handshake request.
    HandshakeFailure,
    /// Client sends its proof.
    ProofRequest,
    /// Host sends its proof.
    ProofSuccess,
    /// Host rejected the client proof.
    ProofFailure,
    /// Host rejected a message outside any phase.
    ProtocolFailure,
    /// Client liveness check.
    HeartbeatRequest,
    /// Host liveness reply.
    HeartbeatReply,
    /// Anything else.
    Application,
}

impl MessageKind {
    /// The 4-byte tag for this kind, `None` for application messages.
    pub const fn tag(self) -> Option<[u8; TAG_LEN]> {
        let (direction, code) = match self {
            Self::InitRequest => (ENQ, phase::INIT_REQUEST),
            Self::InitSuccess => (ACK, phase::INIT_SUCCESS),
            Self::InitFailure => (ACK, phase::INIT_FAILURE),
            Self::HandshakeRequest => (ENQ, phase::HANDSHAKE_REQUEST),
            Self::HandshakeSuccess => (ACK, phase::HANDSHAKE_SUCCESS),
            Self::HandshakeFailure => (ACK, phase::HANDSHAKE_FAILURE),
            Self::ProofRequest => (ENQ, phase::PROOF_REQUEST),
            Self::ProofSuccess => (ACK, phase::PROOF_SUCCESS),
            Self::ProofFailure => (ACK, phase::PROOF_FAILURE),
            Self::ProtocolFailure => (ACK, phase::PROTOCOL_FAILURE),
            Self::HeartbeatRequest => (ENQ, phase::HEARTBEAT),
            Self::HeartbeatReply => (ACK, phase::HEARTBEAT),
            Self::Application => return None,
        };
        Some([SOH, direction, code, BEL])
    }

    /// Tag frame as an owned buffer.
    ///
    /// Application messages have no tag and yield an empty frame.
    pub fn frame(self) -> Vec<u8> {
        self.tag().map(|t| t.to_vec()).unwrap_or_default()
    }

    /// Whether this is one of the three client handshake requests.
    pub const fn is_handshake_request(self) -> bool {
        matches!(self, Self::InitRequest | Self::HandshakeRequest | Self::ProofRequest)
    }

    /// Whether this is a host reply to a handshake request.
    pub const fn is_handshake_reply(self) -> bool {
        matches!(
            self,
            Self::InitSuccess
                | Self::InitFailure
                | Self::HandshakeSuccess
                | Self::HandshakeFailure
                | Self::ProofSuccess
                | Self::ProofFailure
                | Self::ProtocolFailure
        )
    }

    /// Whether this is a host failure response.
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::InitFailure | Self::HandshakeFailure | Self::ProofFailure | Self::ProtocolFailure
        )
    }
}

/// Classify a message by its first frame.
pub fn classify(first_frame: &[u8]) -> MessageKind {
    let [SOH, direction, code, BEL] = first_frame else {
        return MessageKind::Application;
    };

    match (*direction, *code) {
        (ENQ, phase::INIT_REQUEST) => MessageKind::InitRequest,
        (ENQ, phase::HANDSHAKE_REQUEST) => MessageKind::HandshakeRequest,
        (ENQ, phase::PROOF_REQUEST) => MessageKind::ProofRequest,
        (ENQ, phase::HEARTBEAT) => MessageKind::HeartbeatRequest,
        (ACK, phase::INIT_SUCCESS) => MessageKind::InitSuccess,
        (ACK, phase::INIT_FAILURE) => MessageKind::InitFailure,
        (ACK, phase::HANDSHAKE_SUCCESS) => MessageKind::HandshakeSuccess,
        (ACK, phase::HANDSHAKE_FAILURE) => MessageKind::HandshakeFailure,
        (ACK, phase::PROOF_SUCCESS) => MessageKind::ProofSuccess,
        (ACK, phase::PROOF_FAILURE) => MessageKind::ProofFailure,
        (ACK, phase::PROTOCOL_FAILURE) => MessageKind::ProtocolFailure,
        (ACK, phase::HEARTBEAT) => MessageKind::HeartbeatReply,
        _ => MessageKind::Application,
    }
}

/// Classify a frame set by its first frame; an empty set is an application message.
pub fn classify_frames(frames: &[Vec<u8>]) -> MessageKind {
    frames
        .first()
        .map(|f| classify(f))
        .unwrap_or(MessageKind::Application)
}
