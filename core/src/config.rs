//! Client configuration from serde data or the environment.
//!
//! # Design
//! [`ClientConfig`] is plain data: it deserializes from any serde format and
//! [`ClientConfig::from_env`] fills it from `RESTCLI_*` variables. Turning it
//! into a live client is a separate step: [`ClientConfig::connect`] over
//! ureq, or [`ClientConfig::connect_with`] over any [`Transport`].

use std::env;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::{ApiClient, BasicAuthClient, NoAuthClient, TokenAuthClient, DEFAULT_TOKEN_KEYWORD};
use crate::error::ApiError;
use crate::transport::{Session, Transport, UreqTransport};

pub const ENV_BASE_URL: &str = "RESTCLI_BASE_URL";
pub const ENV_TOKEN: &str = "RESTCLI_TOKEN";
pub const ENV_TOKEN_KEYWORD: &str = "RESTCLI_TOKEN_KEYWORD";
pub const ENV_USERNAME: &str = "RESTCLI_USERNAME";
pub const ENV_PASSWORD: &str = "RESTCLI_PASSWORD";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Token {
        token: String,
        #[serde(default = "default_keyword")]
        keyword: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

fn default_keyword() -> String {
    DEFAULT_TOKEN_KEYWORD.to_string()
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            base_url: base_url.into(),
            auth,
        }
    }

    /// Read the configuration from `RESTCLI_*` environment variables.
    ///
    /// A token takes precedence over basic credentials; neither means no auth.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ApiError> {
        let base_url = lookup(ENV_BASE_URL)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::Config(format!("{ENV_BASE_URL} is not set")))?;

        let auth = match (lookup(ENV_TOKEN), lookup(ENV_USERNAME)) {
            (Some(token), _) => AuthConfig::Token {
                token,
                keyword: lookup(ENV_TOKEN_KEYWORD).unwrap_or_else(default_keyword),
            },
            (None, Some(username)) => {
                let password = lookup(ENV_PASSWORD)
                    .ok_or_else(|| ApiError::Config(format!("{ENV_USERNAME} set without {ENV_PASSWORD}")))?;
                AuthConfig::Basic { username, password }
            }
            (None, None) => AuthConfig::None,
        };

        Ok(Self { base_url, auth })
    }

    /// Build the client on a fresh [`UreqTransport`].
    pub fn connect(&self) -> Result<Arc<dyn ApiClient>, ApiError> {
        self.connect_with(UreqTransport::new())
    }

    pub fn connect_with(&self, transport: impl Transport + 'static) -> Result<Arc<dyn ApiClient>, ApiError> {
        let session = Session::new(&self.base_url, transport)?;
        let client: Arc<dyn ApiClient> = match &self.auth {
            AuthConfig::None => Arc::new(NoAuthClient::with_session(session)),
            AuthConfig::Token { token, keyword } => {
                Arc::new(TokenAuthClient::with_session(session, token, keyword))
            }
            AuthConfig::Basic { username, password } => {
                Arc::new(BasicAuthClient::with_session(session, username, password))
            }
        };
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::http::{HttpMethod, RequestOptions};
    use crate::transport::testing::ScriptedTransport;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn base_url_is_required() {
        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn no_credentials_means_no_auth() {
        let config = ClientConfig::from_lookup(lookup(&[(ENV_BASE_URL, "http://localhost:8000")])).unwrap();
        assert_eq!(config.auth, AuthConfig::None);
    }

    #[test]
    fn token_wins_over_basic() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://api.example.com"),
            (ENV_TOKEN, "abc"),
            (ENV_USERNAME, "admin"),
            (ENV_PASSWORD, "pw"),
        ]))
        .unwrap();
        assert_eq!(
            config.auth,
            AuthConfig::Token {
                token: "abc".to_string(),
                keyword: "Token".to_string()
            }
        );
    }

    #[test]
    fn username_without_password_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "http://localhost:8000"),
            (ENV_USERNAME, "admin"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn deserializes_tagged_auth() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url": "http://localhost:8000", "auth": {"type": "token", "token": "abc"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.auth,
            AuthConfig::Token {
                token: "abc".to_string(),
                keyword: "Token".to_string()
            }
        );

        let config: ClientConfig = serde_json::from_str(r#"{"base_url": "http://localhost:8000"}"#).unwrap();
        assert_eq!(config.auth, AuthConfig::None);
    }

    #[test]
    fn connect_builds_matching_client() {
        let transport = ScriptedTransport::new();
        transport.push(200, "{}");
        let config = ClientConfig::new(
            "http://localhost:8000",
            AuthConfig::Basic {
                username: "admin".to_string(),
                password: "password123".to_string(),
            },
        );
        let client = config.connect_with(transport.clone()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");

        client.send("questions/", HttpMethod::Get, RequestOptions::new()).unwrap();
        assert!(transport.requests()[0]
            .header("authorization")
            .unwrap()
            .starts_with("Basic "));
    }
}
