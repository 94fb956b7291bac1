//! Symmetric session cipher.
//!
//! AES-256-CBC with PKCS#7 padding, keyed by the SRP session key `K` with the
//! first 16 bytes of the scramble `u` as IV. Installed on both ends once the
//! proof exchange completes and used for every application frame afterwards.
//!
//! # Failure policy
//!
//! [`SessionCipher::encrypt`] and [`SessionCipher::decrypt`] fail open: a
//! cipher error is logged and the input is returned unchanged. Callers that
//! need to observe the error use [`SessionCipher::try_encrypt`] and
//! [`SessionCipher::try_decrypt`].

use crate::{Error, Result};
use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Session key length in bytes.
pub const KEY_LEN: usize = 32;

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// Per-session frame cipher.
#[derive(Clone)]
pub struct SessionCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
    iv: [u8; IV_LEN],
}

impl SessionCipher {
    /// Create a cipher from a 32-byte key and a 16-byte IV.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidLength` if either input has the wrong length.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| Error::InvalidLength {
            expected: KEY_LEN,
            actual: key.len(),
        })?;
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| Error::InvalidLength {
            expected: IV_LEN,
            actual: iv.len(),
        })?;

        Ok(Self {
            key: Zeroizing::new(key),
            iv,
        })
    }

    /// Create a cipher from the session key and the scramble `u`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidLength` if the key is not 32 bytes or the
    /// scramble is shorter than 16 bytes.
    pub fn from_session(session_key: &[u8], scramble: &[u8]) -> Result<Self> {
        let iv = scramble.get(..IV_LEN).ok_or(Error::InvalidLength {
            expected: IV_LEN,
            actual: scramble.len(),
        })?;
        Self::new(session_key, iv)
    }

    /// Encrypt a frame.
    pub fn try_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let encryptor = Aes256CbcEnc::new_from_slices(self.key.as_slice(), &self.iv)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    /// Decrypt a frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decryption` on bad length or bad padding.
    pub fn try_decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let decryptor = Aes256CbcDec::new_from_slices(self.key.as_slice(), &self.iv)
            .map_err(|e| Error::Decryption(e.to_string()))?;
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| Error::Decryption("invalid padding or length".into()))
    }

    /// Encrypt a frame, returning the input unchanged on failure.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        match self.try_encrypt(plaintext) {
            Ok(ciphertext) => ciphertext,
            Err(e) => {
                tracing::error!(error = %e, len = plaintext.len(), "frame encryption failed, sending input unchanged");
                plaintext.to_vec()
            }
        }
    }

    /// Decrypt a frame, returning the input unchanged on failure.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        match self.try_decrypt(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::error!(error = %e, len = ciphertext.len(), "frame decryption failed, passing input through");
                ciphertext.to_vec()
            }
        }
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionCipher { .. }")
    }
}
