//! Academic portal access.
//!
//! `AcademicClient` is the capability the rest of the core depends on: log
//! in, enumerate terms, fetch a term's schedule. `PortalClient` implements it
//! over HTTP against a JSON portal gateway; tests substitute their own double.
//!
//! Error contract:
//! - `ClientError::Auth` - terminal, never retried
//! - `ClientError::SessionExpired` - re-authenticate, then try again once
//! - `ClientError::Remote` - transient (except `InvalidResponse`), back off and retry

pub mod client;
pub mod error;

use std::collections::BTreeSet;

use async_trait::async_trait;

pub use client::PortalClient;
pub use error::{AuthError, ClientError, RemoteError};

use crate::auth::{Session, UserCredential};
use crate::models::{RawScheduleData, TermId};

#[async_trait]
pub trait AcademicClient: Send + Sync {
    /// Authenticate and open a new portal session.
    async fn login(&self, credential: &UserCredential) -> Result<Session, ClientError>;

    /// Terms the user has schedule data for.
    async fn list_terms(&self, session: &Session) -> Result<BTreeSet<TermId>, ClientError>;

    async fn fetch_schedule(
        &self,
        session: &Session,
        term: TermId,
    ) -> Result<RawScheduleData, ClientError>;

    /// Close the portal session. Best effort.
    async fn logout(&self, _session: &Session) -> Result<(), ClientError> {
        Ok(())
    }
}
