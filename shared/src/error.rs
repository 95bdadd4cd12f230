use thiserror::Error;

/// Errors raised by business rules. The service maps each variant onto an
/// HTTP status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("cannot {action} an order that is {from}")]
    InvalidTransition { from: String, action: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown {kind} value '{value}'")]
    UnknownValue { kind: &'static str, value: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        DomainError::PermissionDenied(msg.into())
    }
}
