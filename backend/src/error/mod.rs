use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

/// Why a credential was refused. Kept for logs; callers see a generic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidToken,
    ExpiredToken,
    RevokedToken,
    InvalidRefreshToken,
    SessionInactive,
    UserNotFound,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::InvalidToken => "invalid_token",
            AuthFailure::ExpiredToken => "expired_token",
            AuthFailure::RevokedToken => "revoked_token",
            AuthFailure::InvalidRefreshToken => "invalid_refresh_token",
            AuthFailure::SessionInactive => "session_inactive",
            AuthFailure::UserNotFound => "user_not_found",
        }
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("authentication failed: {0}")]
    Unauthorized(AuthFailure),
    #[error("session expired")]
    SessionExpired,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error: {0:#}")]
    InternalServerError(anyhow::Error),
}

impl AppError {
    /// Infrastructure failures may succeed on retry; credential failures never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::InternalServerError(_))
    }

    /// Authentication-class failures, including an expired session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AppError::Unauthorized(_) | AppError::SessionExpired)
    }

    pub fn auth_failure(&self) -> Option<AuthFailure> {
        match self {
            AppError::Unauthorized(failure) => Some(*failure),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, code, details) = match self {
            AppError::Unauthorized(failure) => {
                tracing::debug!(reason = %failure, "Rejected credential");
                (
                    StatusCode::UNAUTHORIZED,
                    "Please log in again".to_string(),
                    "UNAUTHORIZED".to_string(),
                    None,
                )
            }
            AppError::SessionExpired => {
                tracing::debug!(reason = "session_expired", "Rejected credential");
                (
                    StatusCode::UNAUTHORIZED,
                    "Please log in again".to_string(),
                    "UNAUTHORIZED".to_string(),
                    None,
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND".to_string(), None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg, "FORBIDDEN".to_string(), None),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                msg,
                "BAD_REQUEST".to_string(),
                None,
            ),
            AppError::InternalServerError(err) => {
                tracing::error!("Internal server error: {:?}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                    "RETRYABLE".to_string(),
                    Some(serde_json::json!({ "retryable": true })),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code,
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalServerError(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            _ => AppError::InternalServerError(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn credential_failures_share_one_generic_response() {
        for err in [
            AppError::Unauthorized(AuthFailure::InvalidToken),
            AppError::Unauthorized(AuthFailure::RevokedToken),
            AppError::Unauthorized(AuthFailure::SessionInactive),
            AppError::SessionExpired,
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let json = response_json(response).await;
            assert_eq!(json["error"], "Please log in again");
            assert_eq!(json["code"], "UNAUTHORIZED");
            assert!(json["details"].is_null());
        }
    }

    #[tokio::test]
    async fn app_error_into_response_maps_status_and_body() {
        let response = AppError::BadRequest("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_json(response).await;
        assert_eq!(json["error"], "bad");
        assert_eq!(json["code"], "BAD_REQUEST");

        let response = AppError::Forbidden("denied".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = response_json(response).await;
        assert_eq!(json["code"], "FORBIDDEN");

        let response = AppError::NotFound("missing".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_json(response).await;
        assert_eq!(json["error"], "missing");
    }

    #[tokio::test]
    async fn infrastructure_errors_are_retryable_and_opaque() {
        let err = AppError::InternalServerError(anyhow::anyhow!("redis timed out"));
        assert!(err.is_retryable());
        assert!(!err.is_auth_failure());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = response_json(response).await;
        assert_eq!(json["error"], "Service temporarily unavailable");
        assert_eq!(json["details"]["retryable"], true);
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
