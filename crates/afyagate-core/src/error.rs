use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, UssdError>;

#[derive(Debug, Error)]
pub enum UssdError {
    #[error("invalid gateway request: {0}")]
    InvalidRequest(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("illegal menu input: {0}")]
    IllegalInput(String),

    #[error("otp code does not match")]
    OtpInvalid,

    #[error("otp code expired")]
    OtpExpired,

    #[error("otp attempts exceeded")]
    OtpAttemptsExceeded,

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("collaborator call failed: {0}")]
    Collaborator(String),

    #[error("collaborator call timed out: {0}")]
    CollaboratorTimeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub operation: String,
    pub trace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl UssdError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::IllegalInput(_) => "ILLEGAL_INPUT",
            Self::OtpInvalid => "OTP_INVALID",
            Self::OtpExpired => "OTP_EXPIRED",
            Self::OtpAttemptsExceeded => "OTP_ATTEMPTS_EXCEEDED",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::Collaborator(_) => "COLLABORATOR_FAILURE",
            Self::CollaboratorTimeout(_) => "COLLABORATOR_TIMEOUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Sqlite(_) => "STORE_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_payload(&self, operation: impl Into<String>) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            operation: operation.into(),
            trace_id: Uuid::new_v4().to_string(),
            details: None,
        }
    }
}
