// ==============================================================================
// crates/core/src/encryption.rs - Password-based packet encryption
// ==============================================================================

//! Shared-password encryption for the protocol's secured payloads.
//!
//! Every call derives a fresh key from the password with Argon2id and a random
//! salt, then seals the data with ChaCha20-Poly1305. The output is
//! self-contained:
//!
//! ```text
//! salt (16) || nonce (12) || ciphertext + tag
//! ```

use argon2::Argon2;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{thread_rng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::transport::EncryptionProvider;

// ============================================================================
// ENVELOPE CONSTANTS
// ============================================================================

pub const SALT_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;
pub const KEY_SIZE: usize = 32;
/// Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

const HEADER_SIZE: usize = SALT_SIZE + NONCE_SIZE;

// ============================================================================
// PASSWORD ENCRYPTION
// ============================================================================

/// [`EncryptionProvider`] keyed by a password shared with the server
pub struct PasswordEncryption {
    password: Zeroizing<String>,
    argon2: Argon2<'static>,
}

impl std::fmt::Debug for PasswordEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordEncryption").finish_non_exhaustive()
    }
}

impl PasswordEncryption {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: Zeroizing::new(password.into()),
            argon2: Argon2::default(),
        }
    }

    fn cipher_for(&self, salt: &[u8]) -> Result<ChaCha20Poly1305, CryptoError> {
        let mut key_bytes = Zeroizing::new([0u8; KEY_SIZE]);
        self.argon2
            .hash_password_into(self.password.as_bytes(), salt, &mut key_bytes[..])
            .map_err(|_| CryptoError::KeyDerivation)?;

        Ok(ChaCha20Poly1305::new(Key::from_slice(&key_bytes[..])))
    }
}

impl EncryptionProvider for PasswordEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut header = [0u8; HEADER_SIZE];
        thread_rng().fill_bytes(&mut header);
        let (salt, nonce_bytes) = header.split_at(SALT_SIZE);

        let cipher = self.cipher_for(salt)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(nonce_bytes), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut envelope = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        envelope.extend_from_slice(&header);
        envelope.extend_from_slice(&ciphertext);

        debug!("🔐 Sealed {} bytes into {} byte envelope", plaintext.len(), envelope.len());
        Ok(envelope)
    }

    fn decrypt(&self, envelope: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if envelope.len() < HEADER_SIZE + TAG_SIZE {
            return Err(CryptoError::MalformedEnvelope(envelope.len()));
        }

        let (salt, rest) = envelope.split_at(SALT_SIZE);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

        let cipher = self.cipher_for(salt)?;
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}
