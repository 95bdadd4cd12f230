use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::PoolError;
use shared::cache::is_retryable;
use shared::DomainError;
use std::fmt;

/// Error returned by every handler. Renders as
/// `{"error": "<message>", "retryable": <bool>}`.
#[derive(Debug, thiserror::Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Logs `e` with `context` and hides it behind a generic 500.
    pub fn from_db<E: fmt::Display>(context: &str) -> impl FnOnce(E) -> Self + '_ {
        move |e| {
            tracing::error!("{context}: {e}");
            Self::internal("internal server error")
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retryable = is_retryable(self.status.as_u16());
        (
            self.status,
            Json(serde_json::json!({"error": self.message, "retryable": retryable})),
        )
            .into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidTransition { .. } => Self::conflict(e.to_string()),
            DomainError::PermissionDenied(msg) => Self::forbidden(msg),
            DomainError::Validation(msg) => Self::unprocessable(msg),
            DomainError::UnknownValue { .. } => Self::bad_request(e.to_string()),
        }
    }
}

impl From<DieselError> for ApiError {
    fn from(e: DieselError) -> Self {
        match e {
            DieselError::NotFound => Self::not_found("record not found"),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::conflict(format!("duplicate record: {}", info.message()))
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Self::conflict(format!("referenced record missing or in use: {}", info.message()))
            }
            DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
                Self::bad_request(format!("value rejected: {}", info.message()))
            }
            other => Self::from_db("database error")(other),
        }
    }
}

impl From<bb8::RunError<PoolError>> for ApiError {
    fn from(e: bb8::RunError<PoolError>) -> Self {
        Self::from_db("connection pool error")(e)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::from_db("stored json could not be decoded")(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        (status, serde_json::from_slice(&bytes).expect("body should be json"))
    }

    #[tokio::test]
    async fn domain_errors_map_to_statuses() {
        let (status, json) = body(DomainError::denied("needs executive").into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "needs executive");
        assert_eq!(json["retryable"], false);

        let (status, json) = body(
            DomainError::InvalidTransition {
                from: "sent/approved".to_string(),
                action: "cancel".to_string(),
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["retryable"], true);

        let (status, _) = body(DomainError::validation("bad").into()).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn display_carries_status_and_message() {
        let err = ApiError::conflict("order number taken");
        assert_eq!(err.to_string(), "409 Conflict: order number taken");
        let err: anyhow::Error = err.into();
        assert!(err.to_string().starts_with("409"));
    }

    #[tokio::test]
    async fn not_found_is_404() {
        let (status, json) = body(DieselError::NotFound.into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "record not found");
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let (status, json) = body(DieselError::RollbackTransaction.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "internal server error");
    }
}
