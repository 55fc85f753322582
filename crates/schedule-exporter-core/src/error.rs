//! Error taxonomy surfaced by the core to its callers.
//!
//! Every variant is `Clone` because a single fetch outcome is shared by all
//! callers waiting on it.

use thiserror::Error;

use crate::api::{AuthError, ClientError, RemoteError};
use crate::export::ConvertError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The portal rejected the session again right after re-authenticating.
    #[error("Portal session could not be re-established")]
    SessionLost,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Missing, invalid or expired access token")]
    Unauthenticated,

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ClientError> for ScheduleError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Auth(e) => ScheduleError::Auth(e),
            ClientError::SessionExpired => ScheduleError::SessionLost,
            ClientError::Remote(e) => ScheduleError::Remote(e),
        }
    }
}

impl ScheduleError {
    /// Short machine-readable name, used in logs and job records.
    pub fn kind(&self) -> &'static str {
        match self {
            ScheduleError::Auth(AuthError::BadCredentials) => "bad_credentials",
            ScheduleError::Auth(AuthError::CaptchaRequired) => "captcha_required",
            ScheduleError::Auth(AuthError::AccountLocked) => "account_locked",
            ScheduleError::Remote(RemoteError::Timeout) => "remote_timeout",
            ScheduleError::Remote(RemoteError::Unavailable(_)) => "remote_unavailable",
            ScheduleError::Remote(RemoteError::RateLimited) => "rate_limited",
            ScheduleError::Remote(RemoteError::InvalidResponse(_)) => "invalid_response",
            ScheduleError::SessionLost => "session_lost",
            ScheduleError::Validation(_) => "validation",
            ScheduleError::Unauthenticated => "unauthenticated",
            ScheduleError::Convert(_) => "convert",
            ScheduleError::Internal(_) => "internal",
        }
    }

    /// Transient failures may succeed if the client tries again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScheduleError::SessionLost)
            || matches!(self, ScheduleError::Remote(e) if e.is_retryable())
    }
}

pub type Result<T, E = ScheduleError> = std::result::Result<T, E>;
