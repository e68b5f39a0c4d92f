//! Optional symmetric encryption of wire frames.
//!
//! Every node of a cluster derives the same ChaCha20-Poly1305 key from a
//! shared password. Sealed frames are `nonce ‖ ciphertext`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::error::{Result, SyncError};

const KEY_CONTEXT: &str = "synckv-wire-v0 frame encryption";
const NONCE_LEN: usize = 12;

/// Password-derived cipher applied to every frame on the wire.
#[derive(Clone)]
pub struct WireCipher {
    key: [u8; 32],
}

impl WireCipher {
    /// Derive the cluster key from a shared password.
    pub fn from_password(password: &str) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, password.as_bytes()),
        }
    }

    /// Encrypt a frame under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| SyncError::Cipher(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| SyncError::Cipher(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt and authenticate a sealed frame.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(SyncError::Cipher("frame shorter than nonce".into()));
        }
        let cipher = ChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| SyncError::Cipher(e.to_string()))?;

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| SyncError::Cipher(e.to_string()))
    }
}

impl std::fmt::Debug for WireCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WireCipher(..)")
    }
}
