//! Error types for the REST mapping layer.
//!
//! # Design
//! HTTP failures are keyed by status code into a closed set of variants so
//! callers can match on "the record does not exist" or "slow down" without
//! inspecting numbers. Every HTTP variant carries the full [`ErrorResponse`]
//! for debugging. 401 and 403 display a fixed "access denied" text; the
//! server's own message stays available in [`ErrorResponse::message`].

use std::fmt;

use thiserror::Error;

use crate::http::HttpResponse;

/// Safe display text for 401/403 responses.
pub const ACCESS_DENIED: &str = "access denied";

/// Details captured from an HTTP response with status >= 400.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Message extracted from the body (`detail`, raw JSON or raw text).
    pub message: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Canonical reason phrase for `status`, empty if unknown.
    pub reason: String,
    pub url: String,
}

impl ErrorResponse {
    pub fn from_response(response: &HttpResponse) -> Self {
        let reason = reason_phrase(response.status);
        let message = extract_message(&response.body).unwrap_or_else(|| reason.clone());
        Self {
            message,
            status: response.status,
            headers: response.headers.clone(),
            reason,
            url: response.url.clone(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {} {}: {}", self.status, self.reason, self.message)
    }
}

/// Errors returned by clients, resources and managers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(ErrorResponse),

    #[error("access denied")]
    Unauthorized(ErrorResponse),

    #[error("access denied")]
    Forbidden(ErrorResponse),

    #[error("not found: {0}")]
    NotFound(ErrorResponse),

    #[error("unprocessable entity: {0}")]
    UnprocessableEntity(ErrorResponse),

    /// 429. Never retried; backoff is up to the caller.
    #[error("rate limited: {0}")]
    RateLimited(ErrorResponse),

    #[error("server error: {0}")]
    ServerError(ErrorResponse),

    /// Any other status >= 400.
    #[error("{0}")]
    Http(ErrorResponse),

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid value for field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("schema `{schema}` has no field `{field}`")]
    UnknownField { schema: String, field: String },

    #[error("unknown schema `{0}`")]
    UnknownSchema(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ApiError {
    /// Build the typed error for a response with status >= 400.
    pub fn from_response(response: &HttpResponse) -> Self {
        let details = ErrorResponse::from_response(response);
        match response.status {
            400 => ApiError::BadRequest(details),
            401 => ApiError::Unauthorized(details),
            403 => ApiError::Forbidden(details),
            404 => ApiError::NotFound(details),
            422 => ApiError::UnprocessableEntity(details),
            429 => ApiError::RateLimited(details),
            500 => ApiError::ServerError(details),
            _ => ApiError::Http(details),
        }
    }

    /// The response details, for HTTP errors.
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            ApiError::BadRequest(r)
            | ApiError::Unauthorized(r)
            | ApiError::Forbidden(r)
            | ApiError::NotFound(r)
            | ApiError::UnprocessableEntity(r)
            | ApiError::RateLimited(r)
            | ApiError::ServerError(r)
            | ApiError::Http(r) => Some(r),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    /// Message safe to show to end users. Fixed for 401/403.
    pub fn message(&self) -> String {
        match self {
            ApiError::Unauthorized(_) | ApiError::Forbidden(_) => ACCESS_DENIED.to_string(),
            other => match other.response() {
                Some(r) => r.message.clone(),
                None => other.to_string(),
            },
        }
    }
}

fn reason_phrase(status: u16) -> String {
    ureq::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

/// `detail` from a JSON object, otherwise the compact JSON, otherwise raw text.
fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(detail)) => Some(detail.clone()),
            _ => Some(serde_json::Value::Object(map).to_string()),
        },
        Ok(other) => Some(other.to_string()),
        Err(_) => Some(trimmed.to_string()),
    }
}
