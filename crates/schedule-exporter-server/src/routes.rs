//! HTTP routes.
//!
//! - `POST /login`    - validate portal credentials, return a bearer token
//! - `GET  /schedule` - export a term's schedule as iCalendar or JSON
//! - `GET  /terms`    - list terms with schedule data
//! - `GET  /term_start` - first day of teaching the portal reports for a term
//! - `POST /logout`   - close the portal session
//! - `GET  /healthz`  - liveness probe

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use schedule_exporter_core::auth::UserCredential;
use schedule_exporter_core::coordinator::{Coordinator, ExportRequest};
use schedule_exporter_core::export::ExportFormat;
use schedule_exporter_core::models::{TermId, MAX_YEAR, MIN_YEAR};
use schedule_exporter_core::ScheduleError;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/terms", get(terms))
        .route("/term_start", get(term_start))
        .route("/schedule", get(schedule))
        .with_state(state)
}

/// Credential sealed in the request's bearer token.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<UserCredential, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError(ScheduleError::Unauthenticated))?;

    Ok(state.coordinator.open_token(token)?)
}

fn parse_flag(name: &str, value: Option<&str>) -> Result<bool, ApiError> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(other) => Err(ApiError::validation(format!(
            "{} must be true or false, got '{}'",
            name, other
        ))),
    }
}

fn parse_term(value: Option<&str>) -> Result<TermId, ApiError> {
    Ok(value
        .ok_or_else(|| ApiError::validation("term is required"))?
        .parse()?)
}

/// `YYYY-MM-DD` within the years a term identifier may name.
fn parse_term_start(value: &str) -> Result<NaiveDate, ApiError> {
    let invalid = || ApiError::validation(format!("term_start must be YYYY-MM-DD, got '{}'", value));
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
    if !(i32::from(MIN_YEAR)..=i32::from(MAX_YEAR)).contains(&date.year()) {
        return Err(ApiError::validation(format!(
            "term_start year must be between {} and {}, got '{}'",
            MIN_YEAR, MAX_YEAR, value
        )));
    }
    Ok(date)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct TokenBody {
    token: String,
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginBody>, JsonRejection>,
) -> Result<Json<TokenBody>, ApiError> {
    let Json(body) = payload.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    if body.username.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }

    let credential = UserCredential::new(body.username, body.password);
    let token = state.coordinator.login(&credential).await?;
    Ok(Json(TokenBody { token }))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let credential = authorize(&state, &headers)?;
    state.coordinator.logout(&credential.user_id()).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct TermsBody {
    terms: Vec<TermId>,
}

async fn terms(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<TermsBody>, ApiError> {
    let credential = authorize(&state, &headers)?;
    let terms = state.coordinator.list_terms(&credential).await?;
    Ok(Json(TermsBody {
        terms: terms.into_iter().collect(),
    }))
}

#[derive(Deserialize)]
struct TermQuery {
    term: Option<String>,
}

#[derive(Serialize)]
struct TermStartBody {
    term: TermId,
    term_start: NaiveDate,
}

async fn term_start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TermQuery>,
) -> Result<Json<TermStartBody>, ApiError> {
    let credential = authorize(&state, &headers)?;
    let term = parse_term(query.term.as_deref())?;
    let term_start = state.coordinator.term_start(&credential, term).await?;
    Ok(Json(TermStartBody { term, term_start }))
}

#[derive(Deserialize)]
struct ScheduleQuery {
    term: Option<String>,
    format: Option<String>,
    refresh: Option<String>,
    term_start: Option<String>,
}

async fn schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ScheduleQuery>,
) -> Result<Response, ApiError> {
    let credential = authorize(&state, &headers)?;

    let term = parse_term(query.term.as_deref())?;

    let format = match query.format.as_deref() {
        Some(format) => format.parse().map_err(ApiError::validation)?,
        None => ExportFormat::from_accept(
            headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()),
        ),
    };

    let term_start = query.term_start.as_deref().map(parse_term_start).transpose()?;

    let request = ExportRequest {
        credential,
        term,
        format,
        force_refresh: parse_flag("refresh", query.refresh.as_deref())?,
        term_start,
    };

    let outcome = state.coordinator.export(request).await;
    let request_id = outcome.job.request_id;
    let artifact = outcome.into_result()?;

    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, artifact.content_type.to_string())],
        artifact.bytes,
    )
        .into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert("x-request-id", value);
    }
    Ok(response)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    use schedule_exporter_core::api::{AcademicClient, AuthError, ClientError, RemoteError};
    use schedule_exporter_core::auth::{CredentialVault, Session};
    use schedule_exporter_core::cache::MemoryStore;
    use schedule_exporter_core::clock::{Clock, SystemClock};
    use schedule_exporter_core::models::{RawCourse, RawScheduleData};
    use schedule_exporter_core::retry::RetryPolicy;

    /// Portal stand-in. The username selects the behaviour of data calls.
    struct StubClient;

    #[async_trait]
    impl AcademicClient for StubClient {
        async fn login(&self, credential: &UserCredential) -> Result<Session, ClientError> {
            if credential.password() != "pw" {
                return Err(ClientError::Auth(AuthError::BadCredentials));
            }
            Ok(Session::new(
                credential.user_id(),
                "portal-token",
                Utc::now(),
                chrono::Duration::minutes(20),
            ))
        }

        async fn list_terms(&self, _session: &Session) -> Result<BTreeSet<TermId>, ClientError> {
            Ok(["2024-1".parse().unwrap()].into_iter().collect())
        }

        async fn fetch_schedule(
            &self,
            session: &Session,
            _term: TermId,
        ) -> Result<RawScheduleData, ClientError> {
            match session.user_id.as_str() {
                "down" => Err(RemoteError::Unavailable("Status 503".into()).into()),
                "slow" => Err(RemoteError::Timeout.into()),
                user => Ok(RawScheduleData {
                    term_start: NaiveDate::from_ymd_opt(2024, 9, 9).filter(|_| user != "undated"),
                    courses: vec![RawCourse {
                        name: "Compilers".to_string(),
                        course_id: None,
                        class_id: None,
                        day: 1,
                        periods: vec![1, 2],
                        weeks: vec![1, 2],
                        location: None,
                        teachers: vec![],
                    }],
                }),
            }
        }
    }

    fn app() -> Router {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let vault = CredentialVault::new("test-secret", Arc::clone(&clock)).unwrap();
        let coordinator = Coordinator::new(
            Arc::new(StubClient),
            Arc::new(MemoryStore::new()),
            clock,
            vault,
            chrono::Duration::minutes(30),
            RetryPolicy::new(1, Duration::from_millis(1)),
        );
        router(AppState {
            coordinator: Arc::new(coordinator),
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    async fn token_for(app: &Router, username: &str) -> String {
        let request = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(format!(
                r#"{{"username":"{}","password":"pw"}}"#,
                username
            )))
            .unwrap();
        let (status, _, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        value["token"].as_str().unwrap().to_string()
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap()
    }

    fn detail(body: &[u8]) -> String {
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        value["detail"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = app();
        let request = Request::get("/healthz").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_schedule_as_calendar() {
        let app = app();
        let token = token_for(&app, "alice").await;

        let (status, headers, body) =
            send(&app, get("/schedule?term=2024-1&format=ics", &token)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/calendar; charset=utf-8");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"schedule-alice-2024-1.ics\""
        );
        assert!(headers.contains_key("x-request-id"));
        let ics = String::from_utf8(body).unwrap();
        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 2);
    }

    #[tokio::test]
    async fn test_schedule_format_follows_accept_header() {
        let app = app();
        let token = token_for(&app, "alice").await;

        let mut request = get("/schedule?term=2024-1", &token);
        request
            .headers_mut()
            .insert(header::ACCEPT, HeaderValue::from_static("text/calendar"));
        let (_, headers, _) = send(&app, request).await;
        assert_eq!(headers[header::CONTENT_TYPE], "text/calendar; charset=utf-8");

        let (_, headers, body) = send(&app, get("/schedule?term=2024-1", &token)).await;
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["classes"][0]["time"], serde_json::json!(["08:00", "09:40"]));
    }

    #[tokio::test]
    async fn test_schedule_requires_token() {
        let app = app();

        let request = Request::get("/schedule?term=2024-1").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!detail(&body).is_empty());

        let (status, _, _) = send(&app, get("/schedule?term=2024-1", "forged")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_schedule_validation_errors() {
        let app = app();
        let token = token_for(&app, "alice").await;

        for uri in [
            "/schedule",
            "/schedule?term=2024-7",
            "/schedule?term=2024-1&format=pdf",
            "/schedule?term=2024-1&term_start=next-monday",
            "/schedule?term=2024-1&term_start=%2B262142-12-28",
            "/schedule?term=2024-1&term_start=1850-09-02",
            "/schedule?term=2024-1&refresh=maybe",
        ] {
            let (status, _, _) = send(&app, get(uri, &token)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_portal_failures_map_to_gateway_errors() {
        let app = app();

        let token = token_for(&app, "down").await;
        let (status, _, body) = send(&app, get("/schedule?term=2024-1", &token)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(detail(&body).contains("unavailable"));

        let token = token_for(&app, "slow").await;
        let (status, _, _) = send(&app, get("/schedule?term=2024-1", &token)).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_login_with_bad_password() {
        let app = app();
        let request = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"username":"alice","password":"nope"}"#))
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(detail(&body), "Wrong username or password");
    }

    #[tokio::test]
    async fn test_terms_and_logout() {
        let app = app();
        let token = token_for(&app, "alice").await;

        let (status, _, body) = send(&app, get("/terms", &token)).await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["terms"], serde_json::json!(["2024-1"]));

        let request = Request::post("/logout")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_malformed_login_body_is_validation_error() {
        let app = app();

        for body in [r#"{"username":"alice""#, r#"{"username":"alice"}"#, "alice:pw"] {
            let request = Request::post("/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap();
            let (status, headers, body) = send(&app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(headers[header::CONTENT_TYPE], "application/json");
            assert!(!detail(&body).is_empty());
        }
    }

    #[tokio::test]
    async fn test_term_start() {
        let app = app();
        let token = token_for(&app, "alice").await;

        let (status, _, body) = send(&app, get("/term_start?term=2024-1", &token)).await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, serde_json::json!({"term": "2024-1", "term_start": "2024-09-09"}));

        let (status, _, _) = send(&app, get("/term_start", &token)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let token = token_for(&app, "undated").await;
        let (status, _, body) = send(&app, get("/term_start?term=2024-1", &token)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(detail(&body).contains("Term start date is unknown"));

        let request = Request::get("/term_start?term=2024-1").body(Body::empty()).unwrap();
        let (status, _, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
