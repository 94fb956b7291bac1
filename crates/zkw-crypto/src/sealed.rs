//! Sealed frames for handshake payloads.
//!
//! Before a session key exists, each side publishes a throwaway X25519 public
//! key. Handshake payloads (identity, ephemerals, proofs) are then sealed to
//! the peer's key so a passive observer learns nothing from them.
//!
//! # Construction
//!
//! ```text
//! eph            = fresh X25519 keypair
//! shared         = X25519(eph.secret, recipient)
//! key            = HKDF-SHA256(ikm = shared, salt = eph.public | recipient, info = "zkw-sealed-frame")
//! sealed         = eph.public | ChaCha20-Poly1305(key, nonce = 0, plaintext)
//! ```
//!
//! The derived key is used for exactly one message, so the fixed nonce is safe.

use crate::{Error, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

/// X25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Bytes added to a plaintext by [`seal`] (ephemeral key + Poly1305 tag).
pub const SEAL_OVERHEAD: usize = PUBLIC_KEY_LEN + 16;

const SEAL_INFO: &[u8] = b"zkw-sealed-frame";

/// Length of a sealed frame carrying `plaintext_len` bytes.
pub const fn sealed_len(plaintext_len: usize) -> usize {
    plaintext_len + SEAL_OVERHEAD
}

/// Throwaway X25519 keypair for one handshake attempt.
pub struct SealingKeyPair {
    secret: Zeroizing<StaticSecret>,
    public: PublicKey,
}

impl SealingKeyPair {
    /// Generate a new keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = PublicKey::from(&secret);
        Self {
            secret: Zeroizing::new(secret),
            public,
        }
    }

    /// Public key to hand to the peer.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        self.public.as_bytes()
    }

    /// Open a frame sealed to this keypair.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidLength` if the frame is shorter than [`SEAL_OVERHEAD`]
    /// - `Error::KeyExchange` if the embedded ephemeral key is low-order
    /// - `Error::Decryption` if authentication fails
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(Error::InvalidLength {
                expected: SEAL_OVERHEAD,
                actual: sealed.len(),
            });
        }

        let (eph_bytes, ciphertext) = sealed.split_at(PUBLIC_KEY_LEN);
        let eph_public = public_key_from(eph_bytes)?;
        let shared = self.secret.diffie_hellman(&eph_public);
        let key = derive_key(&shared, eph_public.as_bytes(), self.public.as_bytes())?;

        ChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
            .decrypt(Nonce::from_slice(&[0u8; 12]), ciphertext)
            .map_err(|_| Error::Decryption("sealed frame authentication failed".into()))
    }
}

impl std::fmt::Debug for SealingKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingKeyPair")
            .field("public", &self.public.as_bytes())
            .finish_non_exhaustive()
    }
}

/// Seal `plaintext` to `recipient`'s X25519 public key.
///
/// # Errors
///
/// - `Error::InvalidLength` if `recipient` is not 32 bytes
/// - `Error::KeyExchange` if `recipient` is a low-order point
pub fn seal(recipient: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let recipient = public_key_from(recipient)?;
    let eph_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let eph_public = PublicKey::from(&eph_secret);
    let shared = eph_secret.diffie_hellman(&recipient);
    let key = derive_key(&shared, eph_public.as_bytes(), recipient.as_bytes())?;

    let ciphertext = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()))
        .encrypt(Nonce::from_slice(&[0u8; 12]), plaintext)
        .map_err(|_| Error::Encryption("sealed frame encryption failed".into()))?;

    let mut out = Vec::with_capacity(sealed_len(plaintext.len()));
    out.extend_from_slice(eph_public.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn public_key_from(bytes: &[u8]) -> Result<PublicKey> {
    let bytes: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| Error::InvalidLength {
        expected: PUBLIC_KEY_LEN,
        actual: bytes.len(),
    })?;
    Ok(PublicKey::from(bytes))
}

fn derive_key(shared: &SharedSecret, eph_public: &[u8], recipient: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    if !shared.was_contributory() {
        return Err(Error::KeyExchange("low-order public key".into()));
    }

    let mut salt = [0u8; 2 * PUBLIC_KEY_LEN];
    salt[..PUBLIC_KEY_LEN].copy_from_slice(eph_public);
    salt[PUBLIC_KEY_LEN..].copy_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(SEAL_INFO, okm.as_mut_slice())
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;
    Ok(okm)
}
