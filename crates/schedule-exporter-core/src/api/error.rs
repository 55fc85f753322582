use thiserror::Error;

/// Login failures that no amount of retrying will fix.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("Wrong username or password")]
    BadCredentials,

    #[error("Portal requires an interactive captcha challenge")]
    CaptchaRequired,

    #[error("Account is locked")]
    AccountLocked,
}

/// Transient or malformed responses from the portal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Portal request timed out")]
    Timeout,

    #[error("Portal unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited by portal - please wait before retrying")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Malformed payloads will not fix themselves; everything else might.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::InvalidResponse(_))
    }
}

/// Everything an [`AcademicClient`](super::AcademicClient) call can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Portal session is no longer valid")]
    SessionExpired,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Remote(e) if e.is_retryable())
    }

    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a failed response to an authenticated data request.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 | 403 => ClientError::SessionExpired,
            429 => RemoteError::RateLimited.into(),
            500..=599 => RemoteError::Unavailable(format!("Status {}: {}", status, truncated)).into(),
            _ => RemoteError::InvalidResponse(format!("Status {}: {}", status, truncated)).into(),
        }
    }

    /// Classify a failed response to a login request.
    pub fn from_login_status(status: reqwest::StatusCode, body: &str) -> Self {
        let captcha = body.to_ascii_lowercase().contains("captcha");
        match status.as_u16() {
            401 => AuthError::BadCredentials.into(),
            423 => AuthError::AccountLocked.into(),
            403 | 428 if captcha => AuthError::CaptchaRequired.into(),
            403 => AuthError::BadCredentials.into(),
            _ => match Self::from_status(status, body) {
                // A 401/403 was handled above; anything left is remote trouble.
                ClientError::SessionExpired => AuthError::BadCredentials.into(),
                other => other,
            },
        }
    }

    /// Classify a transport-level failure (no response received).
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout.into()
        } else if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string()).into()
        } else {
            RemoteError::Unavailable(err.to_string()).into()
        }
    }
}
