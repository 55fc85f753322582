//! Shared fixtures for integration tests: a scripted portal double, a manual
//! clock and a fully wired coordinator.

#![allow(dead_code)]

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use tokio::sync::Semaphore;

use schedule_exporter_core::api::{AcademicClient, AuthError, ClientError};
use schedule_exporter_core::auth::{CredentialVault, Session, UserCredential};
use schedule_exporter_core::cache::{CacheEntry, CacheKey, CacheStore, MemoryStore};
use schedule_exporter_core::clock::{Clock, ManualClock};
use schedule_exporter_core::coordinator::Coordinator;
use schedule_exporter_core::models::{RawCourse, RawScheduleData, TermId};
use schedule_exporter_core::retry::RetryPolicy;

pub const PASSWORD: &str = "correct-horse";
pub const SESSION_MINUTES: i64 = 20;
pub const TTL_MINUTES: i64 = 30;

pub fn credential() -> UserCredential {
    UserCredential::new("alice", PASSWORD)
}

pub fn term() -> TermId {
    "2024-1".parse().unwrap()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, StdDuration::from_millis(1))
}

pub fn raw_schedule() -> RawScheduleData {
    RawScheduleData {
        term_start: NaiveDate::from_ymd_opt(2024, 9, 9),
        courses: vec![
            RawCourse {
                name: "Compilers".to_string(),
                course_id: Some("CS301".to_string()),
                class_id: Some("01".to_string()),
                day: 2,
                periods: vec![3, 4],
                weeks: (1..=16).collect(),
                location: Some("Room 101".to_string()),
                teachers: vec!["Ada".to_string()],
            },
            RawCourse {
                name: "Linear Algebra".to_string(),
                course_id: Some("MA201".to_string()),
                class_id: None,
                day: 4,
                periods: vec![1, 2],
                weeks: vec![1, 3, 5, 7],
                location: None,
                teachers: vec![],
            },
        ],
    }
}

// ============================================================================
// Portal double
// ============================================================================

/// Deterministic `AcademicClient`. Failures are scripted per call and
/// consumed in order; once the script is empty calls succeed.
pub struct FakeAcademicClient {
    clock: Arc<ManualClock>,
    login_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    list_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    login_script: Mutex<VecDeque<ClientError>>,
    fetch_script: Mutex<VecDeque<ClientError>>,
    list_script: Mutex<VecDeque<ClientError>>,
    schedule: Mutex<RawScheduleData>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeAcademicClient {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            login_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            login_script: Mutex::new(VecDeque::new()),
            fetch_script: Mutex::new(VecDeque::new()),
            list_script: Mutex::new(VecDeque::new()),
            schedule: Mutex::new(raw_schedule()),
            gate: Mutex::new(None),
        }
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn script_logins(&self, errors: impl IntoIterator<Item = ClientError>) {
        self.login_script.lock().unwrap().extend(errors);
    }

    pub fn script_fetches(&self, errors: impl IntoIterator<Item = ClientError>) {
        self.fetch_script.lock().unwrap().extend(errors);
    }

    pub fn script_lists(&self, errors: impl IntoIterator<Item = ClientError>) {
        self.list_script.lock().unwrap().extend(errors);
    }

    pub fn set_schedule(&self, schedule: RawScheduleData) {
        *self.schedule.lock().unwrap() = schedule;
    }

    /// Block every fetch until the returned semaphore gets a permit. A
    /// single permit releases all blocked fetches one after another.
    pub fn hold_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn next_failure(script: &Mutex<VecDeque<ClientError>>) -> Option<ClientError> {
        script.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl AcademicClient for FakeAcademicClient {
    async fn login(&self, credential: &UserCredential) -> Result<Session, ClientError> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = Self::next_failure(&self.login_script) {
            return Err(err);
        }
        if credential.password() != PASSWORD {
            return Err(ClientError::Auth(AuthError::BadCredentials));
        }
        Ok(Session::new(
            credential.user_id(),
            format!("portal-token-{}", n),
            self.clock.now(),
            Duration::minutes(SESSION_MINUTES),
        ))
    }

    async fn list_terms(&self, _session: &Session) -> Result<BTreeSet<TermId>, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::next_failure(&self.list_script) {
            return Err(err);
        }
        Ok(["2023-2", "2024-1"].iter().map(|t| t.parse().unwrap()).collect())
    }

    async fn fetch_schedule(
        &self,
        _session: &Session,
        _term: TermId,
    ) -> Result<RawScheduleData, ClientError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if let Some(err) = Self::next_failure(&self.fetch_script) {
            return Err(err);
        }
        Ok(self.schedule.lock().unwrap().clone())
    }

    async fn logout(&self, _session: &Session) -> Result<(), ClientError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Store whose backend is permanently down.
pub struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &CacheKey) -> anyhow::Result<Option<CacheEntry>> {
        Err(anyhow!("cache backend unreachable"))
    }

    async fn put(&self, _key: &CacheKey, _entry: &CacheEntry) -> anyhow::Result<()> {
        Err(anyhow!("cache backend unreachable"))
    }

    async fn remove(&self, _key: &CacheKey) -> anyhow::Result<()> {
        Err(anyhow!("cache backend unreachable"))
    }
}

/// Memory store whose first read is answered only once `release` gets a
/// permit, with whatever the store held when the read began.
pub struct StaleFirstReadStore {
    inner: MemoryStore,
    reads: AtomicUsize,
    pub release: Semaphore,
}

impl StaleFirstReadStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            reads: AtomicUsize::new(0),
            release: Semaphore::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for StaleFirstReadStore {
    async fn get(&self, key: &CacheKey) -> anyhow::Result<Option<CacheEntry>> {
        let seen = self.inner.get(key).await?;
        if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
            let _permit = self.release.acquire().await?;
        }
        Ok(seen)
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> anyhow::Result<()> {
        self.inner.put(key, entry).await
    }

    async fn remove(&self, key: &CacheKey) -> anyhow::Result<()> {
        self.inner.remove(key).await
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub client: Arc<FakeAcademicClient>,
    pub coordinator: Arc<Coordinator>,
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

pub fn harness_with_store(store: Arc<dyn CacheStore>) -> Harness {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap()));
    let client = Arc::new(FakeAcademicClient::new(Arc::clone(&clock)));
    let vault = CredentialVault::new("test-secret", clock.clone()).unwrap();
    let coordinator = Coordinator::new(
        client.clone(),
        store,
        clock.clone(),
        vault,
        Duration::minutes(TTL_MINUTES),
        fast_retry(),
    );

    Harness {
        clock,
        client,
        coordinator: Arc::new(coordinator),
    }
}

/// Let spawned tasks run until they block.
pub async fn settle() {
    tokio::time::sleep(StdDuration::from_millis(50)).await;
}
