use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure of the external balance read. Always captured into the cached
/// record, never propagated past the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("RPC node timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error: {0}")]
    Http(u16),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No healthy RPC provider available")]
    NoHealthyProvider,

    #[error("Balance read aborted: {0}")]
    Aborted(String),
}

/// A malformed owner/token identifier. This is a caller bug, not a runtime
/// condition, so it is returned immediately and never stored in the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid address identifier {input:?}: {reason}")]
pub struct InvalidKeyError {
    pub input: String,
    pub reason: &'static str,
}

/// A write aimed at a record whose fetch has not resolved yet. Only the fetch
/// itself may settle a RUNNING record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Balance {key} has a fetch in flight")]
pub struct FetchInFlight {
    pub key: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid amount {0:?}")]
    InvalidAmount(String),

    #[error("Amount {amount:?} has more than {decimals} fractional digits")]
    TooPrecise { amount: String, decimals: u8 },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Internal server error")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Internal(_) => "INTERNAL_SERVER_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
        }
    }
}

impl From<InvalidKeyError> for AppError {
    fn from(err: InvalidKeyError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<FetchInFlight> for AppError {
    fn from(err: FetchInFlight) -> Self {
        Self::Conflict(err.to_string())
    }
}

impl From<FormatError> for AppError {
    fn from(err: FormatError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            tracing::error!(error = %detail, "Request failed");
        }
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: self.error_type().to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}
