//! Mapping of core errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use schedule_exporter_core::api::RemoteError;
use schedule_exporter_core::ScheduleError;

/// Error returned by handlers; renders as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub ScheduleError);

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError(ScheduleError::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ScheduleError::Auth(_) | ScheduleError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ScheduleError::Validation(_) => StatusCode::BAD_REQUEST,
            ScheduleError::Remote(RemoteError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ScheduleError::Remote(RemoteError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
            ScheduleError::Remote(RemoteError::Unavailable(_))
            | ScheduleError::Remote(RemoteError::InvalidResponse(_))
            | ScheduleError::SessionLost => StatusCode::BAD_GATEWAY,
            ScheduleError::Convert(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ScheduleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self.0 {
            ScheduleError::Internal(message) => {
                error!(error = %message, "Internal error while serving request");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schedule_exporter_core::api::AuthError;
    use schedule_exporter_core::export::ConvertError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ScheduleError::Auth(AuthError::BadCredentials), StatusCode::UNAUTHORIZED),
            (ScheduleError::Auth(AuthError::CaptchaRequired), StatusCode::UNAUTHORIZED),
            (ScheduleError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (ScheduleError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (ScheduleError::Remote(RemoteError::Timeout), StatusCode::GATEWAY_TIMEOUT),
            (
                ScheduleError::Remote(RemoteError::Unavailable("503".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (ScheduleError::Remote(RemoteError::RateLimited), StatusCode::TOO_MANY_REQUESTS),
            (ScheduleError::SessionLost, StatusCode::BAD_GATEWAY),
            (
                ScheduleError::Convert(ConvertError::MissingTermStart),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ScheduleError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response = ApiError(ScheduleError::Internal("db password leaked".into())).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["detail"], "Internal server error");
    }
}
