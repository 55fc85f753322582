//! Sealed client tokens.
//!
//! At login the user's credential is encrypted (ChaCha20-Poly1305, key derived
//! from the deployment secret with Argon2) and handed back to the client as an
//! opaque hex token. Later requests present the token; the server keeps no
//! plaintext secret between requests. Tokens expire after 20 minutes.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::UserCredential;
use crate::clock::Clock;
use crate::error::ScheduleError;

/// Token lifetime in minutes. Matches the portal's idle session timeout.
const TOKEN_LIFETIME_MINUTES: i64 = 20;

/// Fixed salt for deriving the sealing key from the deployment secret.
///
/// The key depends only on `SECRET_KEY`, so every replica with the same secret
/// opens the same tokens. Rotating `SECRET_KEY` invalidates every outstanding
/// token and clients have to log in again.
const KEY_SALT: &[u8] = b"schedule-exporter/credential-vault/v1";

/// ChaCha20-Poly1305 nonce length in bytes.
const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct SealedPayload {
    credential: UserCredential,
    issued_at: DateTime<Utc>,
}

pub struct CredentialVault {
    cipher: ChaCha20Poly1305,
    lifetime: Duration,
    clock: Arc<dyn Clock>,
}

impl CredentialVault {
    pub fn new(secret: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        if secret.is_empty() {
            return Err(anyhow!("SECRET_KEY must not be empty"));
        }

        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(secret.as_bytes(), KEY_SALT, &mut key)
            .map_err(|e| anyhow!("Failed to derive vault key: {}", e))?;

        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            lifetime: Duration::minutes(TOKEN_LIFETIME_MINUTES),
            clock,
        })
    }

    pub fn seal(&self, credential: &UserCredential) -> Result<String, ScheduleError> {
        let payload = SealedPayload {
            credential: credential.clone(),
            issued_at: self.clock.now(),
        };
        let plaintext = serde_json::to_vec(&payload)
            .map_err(|e| ScheduleError::Internal(format!("Failed to encode token: {}", e)))?;

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| ScheduleError::Internal("Failed to seal token".to_string()))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    /// Recover the credential from a token. Any tampering, foreign key or
    /// expiry yields `Unauthenticated`.
    pub fn open(&self, token: &str) -> Result<UserCredential, ScheduleError> {
        let sealed = hex::decode(token.trim()).map_err(|_| ScheduleError::Unauthenticated)?;
        if sealed.len() <= NONCE_LEN {
            return Err(ScheduleError::Unauthenticated);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ScheduleError::Unauthenticated)?;
        let payload: SealedPayload =
            serde_json::from_slice(&plaintext).map_err(|_| ScheduleError::Unauthenticated)?;

        if self.clock.now() >= payload.issued_at + self.lifetime {
            debug!(user = %payload.credential.user_id(), "Client token expired");
            return Err(ScheduleError::Unauthenticated);
        }
        Ok(payload.credential)
    }
}
