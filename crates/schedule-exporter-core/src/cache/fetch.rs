//! The fetch that backs a cache miss.
//!
//! Acquires a session, fetches the raw schedule (backing off on transient
//! portal errors), and on a session rejection invalidates the session and
//! tries exactly once more with a fresh one.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{AcademicClient, ClientError};
use crate::auth::{Session, SessionPool, UserCredential};
use crate::clock::Clock;
use crate::error::{Result, ScheduleError};
use crate::models::{RawScheduleData, ScheduleSnapshot, TermId};
use crate::retry::{with_backoff, RetryPolicy};

/// Cheap to clone; everything inside is shared.
#[derive(Clone)]
pub struct SnapshotFetcher {
    client: Arc<dyn AcademicClient>,
    sessions: Arc<SessionPool>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl SnapshotFetcher {
    pub fn new(
        client: Arc<dyn AcademicClient>,
        sessions: Arc<SessionPool>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            sessions,
            clock,
            retry,
        }
    }

    async fn fetch_raw(&self, session: &Session, term: TermId) -> Result<RawScheduleData, ClientError> {
        with_backoff(&self.retry, "fetch_schedule", || {
            self.client.fetch_schedule(session, term)
        })
        .await
    }

    /// Fetch a fresh snapshot, re-authenticating at most once.
    pub async fn fetch_with_reauth(
        &self,
        credential: &UserCredential,
        term: TermId,
    ) -> Result<ScheduleSnapshot> {
        let user_id = credential.user_id();
        let session = self.sessions.acquire(credential).await?;

        let raw = match self.fetch_raw(&session, term).await {
            Err(ClientError::SessionExpired) => {
                warn!(user = %user_id, term = %term, "Portal rejected session during fetch, re-authenticating");
                self.sessions.retire(&session).await;
                let fresh = self.sessions.acquire(credential).await?;
                match self.fetch_raw(&fresh, term).await {
                    Ok(raw) => raw,
                    Err(ClientError::SessionExpired) => {
                        self.sessions.retire(&fresh).await;
                        return Err(ScheduleError::SessionLost);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            other => other?,
        };

        let snapshot = ScheduleSnapshot::from_raw(&user_id, term, self.clock.now(), raw)?;
        debug!(user = %user_id, term = %term, sessions = snapshot.sessions.len(), "Schedule snapshot built");
        Ok(snapshot)
    }
}
