//! Blocking request execution.
//!
//! # Design
//! [`Transport`] is the only place that touches the network. [`Session`]
//! sits on top of it and owns everything shared between requests: the base
//! URL, default headers (credentials live here) and the transport itself.
//! Auth clients wrap a session; resources and managers share the client.

use std::fmt;

use url::Url;

use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, RequestOptions};

const CONTENT_TYPE: &str = "content-type";

/// Executes one HTTP request and returns the response as data.
///
/// Implementations must return responses with status >= 400 as `Ok`; status
/// interpretation happens in [`ApiClient::unwrap_response`](crate::auth::ApiClient::unwrap_response).
pub trait Transport: Send + Sync {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;
}

/// [`Transport`] backed by a shared `ureq::Agent` (connection reuse,
/// redirects, default timeouts).
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }

    /// Use a preconfigured agent. It must not turn 4xx/5xx into errors.
    pub fn with_agent(agent: ureq::Agent) -> Self {
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let result = match method {
            HttpMethod::Get => with_headers(self.agent.get(url.as_str()), &headers).call(),
            HttpMethod::Delete => with_headers(self.agent.delete(url.as_str()), &headers).call(),
            HttpMethod::Post => send_body(with_headers(self.agent.post(url.as_str()), &headers), body),
            HttpMethod::Put => send_body(with_headers(self.agent.put(url.as_str()), &headers), body),
            HttpMethod::Patch => {
                send_body(with_headers(self.agent.patch(url.as_str()), &headers), body)
            }
        };
        let mut response = result.map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn send_body(
    builder: ureq::RequestBuilder<ureq::typestate::WithBody>,
    body: Option<String>,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    match body {
        Some(body) => builder.send(body.as_bytes()),
        None => builder.send_empty(),
    }
}

/// Base URL, default headers and transport shared by every request of a client.
pub struct Session {
    base_url: String,
    root: Url,
    headers: Vec<(String, String)>,
    transport: Box<dyn Transport>,
}

impl Session {
    pub fn new(base_url: &str, transport: impl Transport + 'static) -> Result<Self, ApiError> {
        let root = Url::parse(base_url)?;
        if root.cannot_be_a_base() {
            return Err(ApiError::Config(format!("`{base_url}` cannot be a base url")));
        }
        Ok(Self {
            base_url: base_url.to_string(),
            root,
            headers: Vec::new(),
            transport: Box::new(transport),
        })
    }

    /// Session on a fresh [`UreqTransport`].
    pub fn connect(base_url: &str) -> Result<Self, ApiError> {
        Self::new(base_url, UreqTransport::new())
    }

    /// The base URL exactly as given.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set a header sent with every request, replacing any previous value.
    pub fn set_default_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        upsert_header(&mut self.headers, name.into(), value.into());
    }

    pub fn default_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Resolve `relative_path` against the base URL (URL-join semantics).
    pub fn url_for(&self, relative_path: &str) -> Result<Url, ApiError> {
        Ok(self.root.join(relative_path)?)
    }

    /// Turn a relative path and options into a request, without sending it.
    pub fn build_request(
        &self,
        method: HttpMethod,
        relative_path: &str,
        options: RequestOptions,
    ) -> Result<HttpRequest, ApiError> {
        let mut url = self.url_for(relative_path)?;
        if !options.params.is_empty() {
            url.query_pairs_mut().extend_pairs(
                options
                    .params
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            );
        }

        let mut headers = self.headers.clone();
        for (name, value) in options.headers {
            upsert_header(&mut headers, name, value);
        }

        let body = if let Some(json) = options.json {
            let body =
                serde_json::to_string(&json).map_err(|e| ApiError::Serialization(e.to_string()))?;
            default_header(&mut headers, CONTENT_TYPE, "application/json");
            Some(body)
        } else if let Some(data) = options.data {
            let body = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(data.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            default_header(&mut headers, CONTENT_TYPE, "application/x-www-form-urlencoded");
            Some(body)
        } else {
            None
        };

        Ok(HttpRequest {
            method,
            url: url.into(),
            headers,
            body,
        })
    }

    pub fn request(
        &self,
        method: HttpMethod,
        relative_path: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, ApiError> {
        let request = self.build_request(method, relative_path, options)?;
        tracing::debug!(method = %request.method, url = %request.url, "sending request");
        self.transport.execute(request)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // headers may carry credentials
        f.debug_struct("Session")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn upsert_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
    headers.push((name, value));
}

fn default_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)) {
        headers.push((name.to_string(), value.to_string()));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Replays queued responses in order and records every request.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedTransport {
        requests: Arc<Mutex<Vec<HttpRequest>>>,
        responses: Arc<Mutex<VecDeque<(u16, String)>>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn push(&self, status: u16, body: &str) -> &Self {
            self.responses
                .lock()
                .unwrap()
                .push_back((status, body.to_string()));
            self
        }

        pub(crate) fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
            self.push(status, &body.to_string())
        }

        pub(crate) fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
            let url = request.url.clone();
            self.requests.lock().unwrap().push(request);
            let (status, body) = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ApiError::Transport(format!("no scripted response for {url}")))?;
            Ok(HttpResponse {
                status,
                headers: vec![(CONTENT_TYPE.to_string(), "application/json".to_string())],
                body,
                url,
            })
        }
    }
}
