//! Clients that send requests with (or without) credentials.
//!
//! # Design
//! [`ApiClient`] is the capability every resource and manager needs:
//! `send` a request relative to the base URL and `unwrap_response` into a
//! body or a typed error. The three variants differ only in what they put on
//! the [`Session`] (or, for [`NoAuthClient`], in the warning they emit), so
//! the shared behavior lives in default methods.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpResponse, RequestOptions};
use crate::transport::{Session, Transport};

pub const DEFAULT_TOKEN_KEYWORD: &str = "Token";

/// Sends requests relative to a base URL and interprets the responses.
pub trait ApiClient: Send + Sync {
    fn session(&self) -> &Session;

    fn base_url(&self) -> &str {
        self.session().base_url()
    }

    fn send(
        &self,
        relative_path: &str,
        method: HttpMethod,
        options: RequestOptions,
    ) -> Result<HttpResponse, ApiError> {
        self.session().request(method, relative_path, options)
    }

    /// Body of a successful response, or the typed error for status >= 400.
    ///
    /// Returns `None` for 204 and for empty bodies. With `parse_json` unset
    /// the raw text comes back as a JSON string.
    fn unwrap_response(
        &self,
        response: HttpResponse,
        parse_json: bool,
    ) -> Result<Option<Value>, ApiError> {
        unwrap_response(response, parse_json)
    }
}

pub(crate) fn unwrap_response(
    response: HttpResponse,
    parse_json: bool,
) -> Result<Option<Value>, ApiError> {
    if !response.is_success() {
        return Err(ApiError::from_response(&response));
    }
    if response.status == 204 || response.body.trim().is_empty() {
        return Ok(None);
    }
    if !parse_json {
        return Ok(Some(Value::String(response.body)));
    }
    serde_json::from_str(&response.body)
        .map(Some)
        .map_err(|e| ApiError::Deserialization(e.to_string()))
}

/// Unauthenticated access. Warns on anything but GET.
#[derive(Debug)]
pub struct NoAuthClient {
    session: Session,
}

impl NoAuthClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Ok(Self::with_session(Session::connect(base_url)?))
    }

    pub fn with_transport(base_url: &str, transport: impl Transport + 'static) -> Result<Self, ApiError> {
        Ok(Self::with_session(Session::new(base_url, transport)?))
    }

    pub fn with_session(session: Session) -> Self {
        Self { session }
    }
}

impl ApiClient for NoAuthClient {
    fn session(&self) -> &Session {
        &self.session
    }

    fn send(
        &self,
        relative_path: &str,
        method: HttpMethod,
        options: RequestOptions,
    ) -> Result<HttpResponse, ApiError> {
        if !method.is_safe() {
            tracing::warn!(
                method = %method,
                path = relative_path,
                "sending a non-GET request with no authentication"
            );
        }
        self.session.request(method, relative_path, options)
    }
}

/// Token access: `Authorization: <keyword> <token>` on every request.
#[derive(Debug)]
pub struct TokenAuthClient {
    session: Session,
}

impl TokenAuthClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        Ok(Self::with_session(Session::connect(base_url)?, token, DEFAULT_TOKEN_KEYWORD))
    }

    pub fn with_transport(
        base_url: &str,
        token: &str,
        transport: impl Transport + 'static,
    ) -> Result<Self, ApiError> {
        Ok(Self::with_session(
            Session::new(base_url, transport)?,
            token,
            DEFAULT_TOKEN_KEYWORD,
        ))
    }

    /// Wrap `session` using `keyword` as the header prefix (e.g. `Bearer`).
    pub fn with_session(mut session: Session, token: &str, keyword: &str) -> Self {
        if !session.base_url().starts_with("https") {
            tracing::warn!(
                base_url = session.base_url(),
                "using token authentication over an unencrypted connection"
            );
        }
        session.set_default_header("Authorization", format!("{keyword} {token}"));
        Self { session }
    }
}

impl ApiClient for TokenAuthClient {
    fn session(&self) -> &Session {
        &self.session
    }
}

/// HTTP basic authentication on every request.
#[derive(Debug)]
pub struct BasicAuthClient {
    session: Session,
}

impl BasicAuthClient {
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, ApiError> {
        Ok(Self::with_session(Session::connect(base_url)?, username, password))
    }

    pub fn with_transport(
        base_url: &str,
        username: &str,
        password: &str,
        transport: impl Transport + 'static,
    ) -> Result<Self, ApiError> {
        Ok(Self::with_session(
            Session::new(base_url, transport)?,
            username,
            password,
        ))
    }

    pub fn with_session(mut session: Session, username: &str, password: &str) -> Self {
        let credentials = STANDARD.encode(format!("{username}:{password}"));
        session.set_default_header("Authorization", format!("Basic {credentials}"));
        Self { session }
    }
}

impl ApiClient for BasicAuthClient {
    fn session(&self) -> &Session {
        &self.session
    }
}
