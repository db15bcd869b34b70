use std::any::Any;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::{Channel, IdentityField};

/// Why an inbound request was not trusted. Rendered as a bare status plus a
/// short error code; nothing about the secret or the expected value leaks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("signature header is missing")]
    MissingSignature,
    #[error("signature does not match request body")]
    InvalidSignature,
    #[error("subscription verification parameters are missing")]
    MissingVerificationParams,
    #[error("subscription mode or verify token mismatch")]
    VerificationMismatch,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingSignature | Self::MissingVerificationParams => StatusCode::BAD_REQUEST,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::VerificationMismatch => StatusCode::FORBIDDEN,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::MissingSignature => "missing_signature",
            Self::InvalidSignature => "invalid_signature",
            Self::MissingVerificationParams => "missing_parameters",
            Self::VerificationMismatch => "verification_failed",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.code() }))).into_response()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("lead with {field} = {external_id} not found after insert conflict")]
    ConflictWinnerMissing {
        field: IdentityField,
        external_id: String,
    },
    #[error("corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("platform responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("refusing to call platform with user id {0:?}")]
    InvalidId(String),
    #[error("invalid endpoint url: {0}")]
    Endpoint(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("persistence failed for {channel} user {external_user_id}: {source}")]
    Persistence {
        channel: Channel,
        external_user_id: String,
        #[source]
        source: StoreError,
    },
    #[error("property search failed: {0}")]
    Search(#[source] StoreError),
}

/// Errors surfaced by webhook handlers before any event is processed. All of
/// them are the caller's fault and map to a 4xx.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(&'static str),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            Self::Rejected(rejection) => rejection.into_response(),
            Self::MalformedPayload(_) | Self::UnexpectedShape(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "malformed_payload" })),
            )
                .into_response(),
        }
    }
}

/// Response for a handler that panicked. Installed through `CatchPanicLayer`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error" })),
    )
        .into_response()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}
