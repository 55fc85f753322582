//! HTTP client for a JSON academic portal gateway.
//!
//! Endpoints (relative to the configured base URL):
//! - `POST login` (form `username`, `password`) -> `{token, expires_in_secs}`
//! - `GET terms` -> `["2024-1", ...]`
//! - `GET schedule?term=2024-1` -> `RawScheduleData`
//! - `POST logout`
//!
//! Retrying is left to the caller; this client only classifies failures.

use std::collections::BTreeSet;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{header, Client, Response};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};

use super::{AcademicClient, ClientError, RemoteError};
use crate::auth::{Session, UserCredential};
use crate::models::{RawScheduleData, TermId};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// Portal schedule pages are slow; 30s fails fast enough to leave room for retries.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Session lifetime assumed when the portal does not report one.
/// Matches the portal's 20 minute idle timeout.
const DEFAULT_SESSION_LIFETIME_SECS: i64 = 20 * 60;

/// Upper bound on a portal-reported session lifetime.
const MAX_SESSION_LIFETIME_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    expires_in_secs: Option<i64>,
}

/// Portal client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct PortalClient {
    client: Client,
    base_url: String,
}

impl PortalClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build portal HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Check if response is successful, returning a classified error if not.
    async fn check_response(response: Response) -> Result<Response, ClientError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::from_status(status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(&session.token)
            .query(query)
            .send()
            .await
            .map_err(|e| ClientError::from_transport(&e))?;

        let response = Self::check_response(response).await?;

        response.json().await.map_err(|e| {
            ClientError::from(RemoteError::InvalidResponse(format!(
                "Failed to parse JSON response from {}: {}",
                url, e
            )))
        })
    }
}

#[async_trait]
impl AcademicClient for PortalClient {
    async fn login(&self, credential: &UserCredential) -> Result<Session, ClientError> {
        let response = self
            .client
            .post(self.url("login"))
            .header(header::ACCEPT, "application/json")
            .form(&[
                ("username", credential.username()),
                ("password", credential.password()),
            ])
            .send()
            .await
            .map_err(|e| ClientError::from_transport(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_login_status(status, &body));
        }

        let auth: LoginResponse = response.json().await.map_err(|e| {
            RemoteError::InvalidResponse(format!("Failed to parse login response: {}", e))
        })?;

        let lifetime = auth
            .expires_in_secs
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::seconds(secs.min(MAX_SESSION_LIFETIME_SECS)))
            .unwrap_or_else(|| Duration::seconds(DEFAULT_SESSION_LIFETIME_SECS));

        debug!(user = %credential.user_id(), lifetime_secs = lifetime.num_seconds(), "Portal login succeeded");
        Ok(Session::new(credential.user_id(), auth.token, Utc::now(), lifetime))
    }

    async fn list_terms(&self, session: &Session) -> Result<BTreeSet<TermId>, ClientError> {
        let raw: Vec<String> = self.get(session, "terms", &[]).await?;
        raw.iter()
            .map(|t| {
                t.parse::<TermId>()
                    .map_err(|e| ClientError::from(RemoteError::InvalidResponse(e.to_string())))
            })
            .collect()
    }

    async fn fetch_schedule(
        &self,
        session: &Session,
        term: TermId,
    ) -> Result<RawScheduleData, ClientError> {
        let data: RawScheduleData = self
            .get(session, "schedule", &[("term", term.to_string())])
            .await?;
        debug!(user = %session.user_id, term = %term, courses = data.courses.len(), "Schedule response received");
        Ok(data)
    }

    async fn logout(&self, session: &Session) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.url("logout"))
            .bearer_auth(&session.token)
            .send()
            .await
            .map_err(|e| ClientError::from_transport(&e))?;

        if !response.status().is_success() {
            warn!(user = %session.user_id, status = %response.status(), "Portal logout rejected");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AuthError;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> Session {
        Session::new("alice", "tok-1", Utc::now(), Duration::minutes(20))
    }

    #[tokio::test]
    async fn test_login_returns_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains("username=Alice"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"token": "abc", "expires_in_secs": 600})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = PortalClient::new(server.uri()).unwrap();
        let session = client
            .login(&UserCredential::new("Alice", "pw"))
            .await
            .unwrap();

        assert_eq!(session.user_id, "alice");
        assert_eq!(session.token, "abc");
        assert_eq!(session.expires_at - session.issued_at, Duration::seconds(600));
    }

    #[tokio::test]
    async fn test_login_caps_reported_lifetime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"token": "abc", "expires_in_secs": i64::MAX})),
            )
            .mount(&server)
            .await;

        let client = PortalClient::new(server.uri()).unwrap();
        let session = client
            .login(&UserCredential::new("alice", "pw"))
            .await
            .unwrap();

        assert_eq!(
            session.expires_at - session.issued_at,
            Duration::seconds(MAX_SESSION_LIFETIME_SECS)
        );
    }

    #[tokio::test]
    async fn test_login_classifies_auth_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(403).set_body_string(r#"{"error":"captcha_required"}"#))
            .mount(&server)
            .await;

        let client = PortalClient::new(server.uri()).unwrap();
        let err = client
            .login(&UserCredential::new("alice", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Auth(AuthError::CaptchaRequired));
    }

    #[tokio::test]
    async fn test_fetch_schedule_sends_bearer_and_term() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schedule"))
            .and(query_param("term", "2024-1"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "term_start": "2024-09-09",
                "courses": [
                    {"name": "Compilers", "day": 2, "periods": [3, 4], "weeks": [1, 2]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = PortalClient::new(format!("{}/", server.uri())).unwrap();
        let raw = client
            .fetch_schedule(&session(), "2024-1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(raw.courses.len(), 1);
        assert_eq!(raw.courses[0].name, "Compilers");
    }

    #[tokio::test]
    async fn test_fetch_schedule_maps_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schedule"))
            .and(query_param("term", "2024-1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/schedule"))
            .and(query_param("term", "2024-2"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/schedule"))
            .and(query_param("term", "2024-3"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = PortalClient::new(server.uri()).unwrap();
        let s = session();
        assert_eq!(
            client.fetch_schedule(&s, "2024-1".parse().unwrap()).await,
            Err(ClientError::SessionExpired)
        );
        assert!(matches!(
            client.fetch_schedule(&s, "2024-2".parse().unwrap()).await,
            Err(ClientError::Remote(RemoteError::Unavailable(msg))) if msg.contains("maintenance")
        ));
        assert_eq!(
            client.fetch_schedule(&s, "2024-3".parse().unwrap()).await,
            Err(ClientError::Remote(RemoteError::RateLimited))
        );
    }

    #[tokio::test]
    async fn test_list_terms_rejects_malformed_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/terms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["2024-1", "spring"])))
            .mount(&server)
            .await;

        let client = PortalClient::new(server.uri()).unwrap();
        let err = client.list_terms(&session()).await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(RemoteError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_list_terms_parses_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/terms"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!(["2024-1", "2023-2", "2024-1"])),
            )
            .mount(&server)
            .await;

        let client = PortalClient::new(server.uri()).unwrap();
        let terms: Vec<String> = client
            .list_terms(&session())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(terms, vec!["2023-2", "2024-1"]);
    }
}
