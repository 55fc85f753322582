//! Per-user portal sessions.
//!
//! Each user gets one slot guarded by its own async lock, so a login for one
//! user never blocks another, and concurrent `acquire` calls for the same user
//! share a single login.
//!
//! A pooled session is only handed to a caller presenting the password it was
//! opened with. Each slot keeps an Argon2 fingerprint of that password under a
//! per-process random salt; any other password goes to the portal.

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Session, SessionStatus, UserCredential};
use crate::api::{AcademicClient, ClientError};
use crate::clock::Clock;
use crate::error::{Result, ScheduleError};
use crate::retry::{with_backoff, RetryPolicy};

/// Argon2 memory cost (KiB) for password fingerprints. They never leave the
/// process, so this stays far below the password-storage default.
const FINGERPRINT_M_COST: u32 = 4096;

const FINGERPRINT_LEN: usize = 32;

type Fingerprint = [u8; FINGERPRINT_LEN];

struct Pooled {
    session: Session,
    fingerprint: Fingerprint,
}

type Slot = Arc<Mutex<Option<Pooled>>>;

pub struct SessionPool {
    client: Arc<dyn AcademicClient>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    slots: DashMap<String, Slot>,
    hasher: Argon2<'static>,
    salt: [u8; 16],
}

impl SessionPool {
    pub fn new(client: Arc<dyn AcademicClient>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            client,
            clock,
            retry,
            slots: DashMap::new(),
            hasher: Argon2::new(
                Algorithm::Argon2id,
                Version::V0x13,
                Params::new(FINGERPRINT_M_COST, 1, 1, Some(FINGERPRINT_LEN)).unwrap_or_default(),
            ),
            salt: rand::random(),
        }
    }

    fn fingerprint(&self, credential: &UserCredential) -> Result<Fingerprint> {
        let mut out = [0u8; FINGERPRINT_LEN];
        self.hasher
            .hash_password_into(credential.password().as_bytes(), &self.salt, &mut out)
            .map_err(|e| ScheduleError::Internal(format!("Failed to fingerprint credential: {}", e)))?;
        Ok(out)
    }

    fn slot(&self, user_id: &str) -> Slot {
        Arc::clone(self.slots.entry(user_id.to_string()).or_default().value())
    }

    fn existing_slot(&self, user_id: &str) -> Option<Slot> {
        self.slots.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the user's active session, logging in if there is none, it is
    /// about to expire, or it was opened with a different password.
    ///
    /// Auth failures (bad credentials, captcha, locked account) are returned
    /// on the first attempt. Transient login failures are retried with
    /// backoff.
    pub async fn acquire(&self, credential: &UserCredential) -> Result<Session> {
        let user_id = credential.user_id();
        let fingerprint = self.fingerprint(credential)?;
        let slot = self.slot(&user_id);
        let mut current = slot.lock().await;

        let now = self.clock.now();
        let mut same_secret = false;
        if let Some(pooled) = current.as_mut() {
            same_secret = pooled.fingerprint == fingerprint;
            if same_secret && pooled.session.is_usable_at(now) {
                return Ok(pooled.session.clone());
            }
            if !same_secret {
                debug!(user = %user_id, "Credential differs from pooled session, logging in");
            } else if pooled.session.status == SessionStatus::Active {
                pooled.session.status = SessionStatus::Expired;
                debug!(user = %user_id, "Session expired, renewing");
            }
        }

        let result = with_backoff(&self.retry, "login", || self.client.login(credential)).await;
        match result {
            Ok(mut session) => {
                session.status = SessionStatus::Active;
                info!(user = %user_id, expires_at = %session.expires_at, "Portal session established");
                *current = Some(Pooled {
                    session: session.clone(),
                    fingerprint,
                });
                Ok(session)
            }
            Err(ClientError::Auth(e)) => {
                // A rejected stranger's password leaves the holder's session alone.
                if let Some(previous) = current.as_mut().filter(|_| same_secret) {
                    previous.session.status = SessionStatus::Invalid;
                }
                warn!(user = %user_id, error = %e, "Portal login rejected");
                Err(e.into())
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "Portal login failed");
                Err(e.into())
            }
        }
    }

    /// Forcibly mark the user's session invalid so the next `acquire` logs in again.
    pub async fn invalidate(&self, user_id: &str) {
        let Some(slot) = self.existing_slot(user_id) else {
            return;
        };
        let mut current = slot.lock().await;
        if let Some(pooled) = current.as_mut() {
            pooled.session.status = SessionStatus::Invalid;
            info!(user = %user_id, "Session invalidated");
        }
    }

    /// Invalidate `stale` only if it is still the pooled session.
    ///
    /// A caller holding an old session must not evict a newer one that
    /// another caller just obtained.
    pub async fn retire(&self, stale: &Session) {
        let Some(slot) = self.existing_slot(&stale.user_id) else {
            return;
        };
        let mut current = slot.lock().await;
        match current.as_mut() {
            Some(pooled) if pooled.session.token == stale.token => {
                pooled.session.status = SessionStatus::Invalid;
                info!(user = %stale.user_id, "Session rejected by portal, invalidated");
            }
            _ => debug!(user = %stale.user_id, "Stale session already replaced"),
        }
    }

    /// Drop the user's session and close it on the portal.
    pub async fn logout(&self, user_id: &str) {
        let Some((_, slot)) = self.slots.remove(user_id) else {
            return;
        };
        let session = slot.lock().await.take().map(|pooled| pooled.session);
        if let Some(session) = session.filter(|s| s.status == SessionStatus::Active) {
            if let Err(e) = self.client.logout(&session).await {
                warn!(user = %user_id, error = %e, "Portal logout failed");
            }
        }
        info!(user = %user_id, "Logged out");
    }

    /// Status of the user's pooled session, if any. Expiry is evaluated now.
    pub async fn status(&self, user_id: &str) -> Option<SessionStatus> {
        let slot = self.existing_slot(user_id)?;
        let current = slot.lock().await;
        current.as_ref().map(|Pooled { session, .. }| {
            if session.status == SessionStatus::Active && session.is_expired_at(self.clock.now()) {
                SessionStatus::Expired
            } else {
                session.status
            }
        })
    }
}
