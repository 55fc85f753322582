//! Export orchestration.
//!
//! Each export is tracked as an [`ExportJob`] moving through
//! `Pending -> Fetching -> Converting -> Done`, or to `Failed` from any
//! non-terminal state. The coordinator owns the session pool, the schedule
//! cache and the credential vault; the server holds one behind an `Arc`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{AcademicClient, ClientError};
use crate::auth::{CredentialVault, Session, SessionPool, UserCredential};
use crate::cache::{CacheStore, Origin, ScheduleCache, SnapshotFetcher};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Result, ScheduleError};
use crate::export::{convert, ConvertError, ExportFormat, ExportedArtifact};
use crate::models::{ScheduleSnapshot, TermId};
use crate::retry::{with_backoff, RetryPolicy};

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Fetching,
    Converting,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Fetching)
            | (JobState::Fetching, JobState::Converting)
            | (JobState::Converting, JobState::Done) => true,
            (current, JobState::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Pending => "pending",
            JobState::Fetching => "fetching",
            JobState::Converting => "converting",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Record of one export request.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub request_id: Uuid,
    pub user_id: String,
    pub term_id: TermId,
    pub state: JobState,
    /// Set when the job failed.
    pub error: Option<ScheduleError>,
}

impl ExportJob {
    pub fn new(user_id: impl Into<String>, term_id: TermId) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_id: user_id.into(),
            term_id,
            state: JobState::Pending,
            error: None,
        }
    }

    pub fn advance(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ScheduleError::Internal(format!(
                "Illegal export job transition {} -> {}",
                self.state, next
            )));
        }
        debug!(
            request_id = %self.request_id,
            user = %self.user_id,
            term = %self.term_id,
            from = %self.state,
            to = %next,
            "Export job transition"
        );
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, error: ScheduleError) {
        if let Err(e) = self.advance(JobState::Failed) {
            warn!(request_id = %self.request_id, error = %e, "Failing a finished job");
            self.state = JobState::Failed;
        }
        self.error = Some(error);
    }
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub credential: UserCredential,
    pub term: TermId,
    pub format: ExportFormat,
    /// Drop any cached snapshot and fetch anew.
    pub force_refresh: bool,
    /// Replaces the portal's term start date for this export only.
    pub term_start: Option<NaiveDate>,
}

impl ExportRequest {
    pub fn new(credential: UserCredential, term: TermId, format: ExportFormat) -> Self {
        Self {
            credential,
            term,
            format,
            force_refresh: false,
            term_start: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub job: ExportJob,
    /// Present exactly when the job is `Done`.
    pub artifact: Option<ExportedArtifact>,
}

impl ExportOutcome {
    pub fn into_result(self) -> Result<ExportedArtifact> {
        match (self.artifact, self.job.error) {
            (Some(artifact), _) => Ok(artifact),
            (None, Some(error)) => Err(error),
            (None, None) => Err(ScheduleError::Internal(
                "Export finished without an artifact".to_string(),
            )),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct Coordinator {
    client: Arc<dyn AcademicClient>,
    sessions: Arc<SessionPool>,
    cache: ScheduleCache,
    fetcher: SnapshotFetcher,
    vault: CredentialVault,
    retry: RetryPolicy,
}

impl Coordinator {
    pub fn new(
        client: Arc<dyn AcademicClient>,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        vault: CredentialVault,
        ttl: chrono::Duration,
        retry: RetryPolicy,
    ) -> Self {
        let sessions = Arc::new(SessionPool::new(
            Arc::clone(&client),
            Arc::clone(&clock),
            retry.clone(),
        ));
        let cache = ScheduleCache::new(store, Arc::clone(&clock), ttl);
        let fetcher = SnapshotFetcher::new(
            Arc::clone(&client),
            Arc::clone(&sessions),
            clock,
            retry.clone(),
        );

        Self {
            client,
            sessions,
            cache,
            fetcher,
            vault,
            retry,
        }
    }

    /// Wire a coordinator from configuration with the system clock.
    pub fn from_config(config: &Config, client: Arc<dyn AcademicClient>) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let vault = CredentialVault::new(config.secret_key()?, Arc::clone(&clock))?;
        Ok(Self::new(
            client,
            config.open_store()?,
            clock,
            vault,
            config.cache_ttl(),
            config.retry_policy(),
        ))
    }

    pub fn sessions(&self) -> &SessionPool {
        &self.sessions
    }

    pub fn cache(&self) -> &ScheduleCache {
        &self.cache
    }

    /// Run one export to completion. Never panics on failure; the outcome's
    /// job carries the error.
    pub async fn export(&self, request: ExportRequest) -> ExportOutcome {
        let mut job = ExportJob::new(request.credential.user_id(), request.term);
        debug!(
            request_id = %job.request_id,
            user = %job.user_id,
            term = %job.term_id,
            format = %request.format,
            refresh = request.force_refresh,
            "Export requested"
        );

        let artifact = match self.run(&mut job, &request).await {
            Ok(artifact) => {
                info!(
                    request_id = %job.request_id,
                    user = %job.user_id,
                    term = %job.term_id,
                    bytes = artifact.bytes.len(),
                    "Export done"
                );
                Some(artifact)
            }
            Err(e) => {
                warn!(
                    request_id = %job.request_id,
                    user = %job.user_id,
                    term = %job.term_id,
                    kind = e.kind(),
                    error = %e,
                    "Export failed"
                );
                job.fail(e);
                None
            }
        };

        ExportOutcome { job, artifact }
    }

    async fn run(&self, job: &mut ExportJob, request: &ExportRequest) -> Result<ExportedArtifact> {
        self.sessions.acquire(&request.credential).await?;
        job.advance(JobState::Fetching)?;

        if request.force_refresh {
            self.cache.bust(&job.user_id, job.term_id).await;
        }
        let snapshot = self.snapshot(&request.credential, job.term_id).await?;
        job.advance(JobState::Converting)?;

        let artifact = match request.term_start {
            Some(term_start) => {
                let mut snapshot = ScheduleSnapshot::clone(&snapshot);
                snapshot.term_start = Some(term_start);
                convert(&snapshot, request.format)?
            }
            None => convert(&snapshot, request.format)?,
        };
        job.advance(JobState::Done)?;
        Ok(artifact)
    }

    /// Cached or freshly fetched snapshot.
    ///
    /// A fetch started by another request ran with that request's session; if
    /// it ended with the session lost, this caller tries once more on its own.
    async fn snapshot(
        &self,
        credential: &UserCredential,
        term: TermId,
    ) -> Result<Arc<ScheduleSnapshot>> {
        match self.lookup(credential, term).await {
            (Origin::Joined, Err(ScheduleError::SessionLost)) => {
                info!(
                    user = %credential.user_id(),
                    term = %term,
                    "Shared fetch lost its session, retrying"
                );
                self.lookup(credential, term).await.1
            }
            (_, result) => result,
        }
    }

    async fn lookup(
        &self,
        credential: &UserCredential,
        term: TermId,
    ) -> (Origin, Result<Arc<ScheduleSnapshot>>) {
        let fetcher = self.fetcher.clone();
        let owned = credential.clone();
        self.cache
            .lookup(&credential.user_id(), term, move || async move {
                fetcher.fetch_with_reauth(&owned, term).await
            })
            .await
    }

    /// Validate the credential against the portal and return a client token.
    ///
    /// A pooled session is reused only when the password matches the one it
    /// was opened with; otherwise the portal decides.
    pub async fn login(&self, credential: &UserCredential) -> Result<String> {
        self.sessions.acquire(credential).await?;
        self.vault.seal(credential)
    }

    /// First day of teaching for `term` as the portal reports it, served from
    /// the cached snapshot. `MissingTermStart` when the portal has none.
    pub async fn term_start(&self, credential: &UserCredential, term: TermId) -> Result<NaiveDate> {
        self.sessions.acquire(credential).await?;
        let snapshot = self.snapshot(credential, term).await?;
        snapshot
            .term_start
            .ok_or(ScheduleError::Convert(ConvertError::MissingTermStart))
    }

    /// Credential behind a client token.
    pub fn open_token(&self, token: &str) -> Result<UserCredential> {
        self.vault.open(token)
    }

    /// Terms the user has schedules for. Re-authenticates once if the portal
    /// rejects the session.
    pub async fn list_terms(&self, credential: &UserCredential) -> Result<BTreeSet<TermId>> {
        let session = self.sessions.acquire(credential).await?;

        match self.fetch_terms(&session).await {
            Err(ClientError::SessionExpired) => {
                warn!(user = %session.user_id, "Portal rejected session listing terms, re-authenticating");
                self.sessions.retire(&session).await;
                let fresh = self.sessions.acquire(credential).await?;
                match self.fetch_terms(&fresh).await {
                    Err(ClientError::SessionExpired) => {
                        self.sessions.retire(&fresh).await;
                        Err(ScheduleError::SessionLost)
                    }
                    other => other.map_err(ScheduleError::from),
                }
            }
            other => other.map_err(ScheduleError::from),
        }
    }

    async fn fetch_terms(&self, session: &Session) -> Result<BTreeSet<TermId>, ClientError> {
        with_backoff(&self.retry, "list_terms", || self.client.list_terms(session)).await
    }

    pub async fn logout(&self, user_id: &str) {
        self.sessions.logout(user_id).await;
    }
}
