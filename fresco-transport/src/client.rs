//! JSON REST client whose calls resolve to outcomes.

use std::time::Duration;

use fresco_core::{ConfigError, Outcome};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::call::outcome_call;

/// Failure to build a [`RestClient`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid transport configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Connection settings for a [`RestClient`].
#[derive(Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Scheme and host, optionally with a path prefix. Trailing slashes are ignored.
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub user_agent: String,
    /// Sent as `Authorization: Bearer ...` when set.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("base_url", &self.base_url)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("user_agent", &self.user_agent)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            user_agent: concat!("fresco/", env!("CARGO_PKG_VERSION")).to_string(),
            bearer_token: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "base_url".to_string(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "base_url".to_string(),
                value: self.base_url.clone(),
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// A JSON-over-HTTP client.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "bearer_token".to_string(),
                    value: "[REDACTED]".to_string(),
                    reason: e.to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Outcome<T> {
        outcome_call(self.client.get(self.url(path)).send()).await
    }

    pub async fn get_json_with_query<T, Q>(&self, path: &str, query: &Q) -> Outcome<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        outcome_call(self.client.get(self.url(path)).query(query).send()).await
    }

    pub async fn post_json<T, B>(&self, path: &str, body: &B) -> Outcome<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        outcome_call(self.client.post(self.url(path)).json(body).send()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fresco_core::ApiError;
    use serde::Deserialize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Echo {
        ok: bool,
    }

    /// Read headers, then as many body bytes as `content-length` announces.
    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let body_len = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    /// Serve one canned response and hand back the raw request.
    async fn serve_once(body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = tx.send(read_request(&mut socket).await);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        (format!("http://{}", addr), rx)
    }

    #[test]
    fn test_validate() {
        assert!(TransportConfig::new("https://api.example.com").validate().is_ok());
        assert!(matches!(
            TransportConfig::new("  ").validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
        assert!(matches!(
            TransportConfig::new("ftp://example.com").validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            TransportConfig::new("http://localhost").with_timeout_ms(0).validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = TransportConfig::new("http://localhost").with_bearer_token("secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_url_joining() {
        let client = RestClient::new(TransportConfig::new("http://localhost:8080/api/")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/api");
        assert_eq!(client.url("/balances"), "http://localhost:8080/api/balances");
        assert_eq!(client.url("balances"), "http://localhost:8080/api/balances");
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            RestClient::new(TransportConfig::new("localhost")),
            Err(TransportError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_get_json_with_query_and_headers() {
        let (base, request) = serve_once(r#"{"ok":true}"#).await;
        let client = RestClient::new(
            TransportConfig::new(base)
                .with_user_agent("fresco-test")
                .with_bearer_token("t0ken"),
        )
        .unwrap();

        let outcome: Outcome<Echo> = client
            .get_json_with_query("/prices", &[("currency", "EUR")])
            .await;
        assert_eq!(outcome, Ok(Echo { ok: true }));

        let raw = request.await.unwrap().to_lowercase();
        assert!(raw.starts_with("get /prices?currency=eur "));
        assert!(raw.contains("user-agent: fresco-test"));
        assert!(raw.contains("authorization: bearer t0ken"));
    }

    #[tokio::test]
    async fn test_post_json_sends_body() {
        let (base, request) = serve_once(r#"{"ok":true}"#).await;
        let client = RestClient::new(TransportConfig::new(base)).unwrap();

        let outcome: Outcome<Echo> = client
            .post_json("orders", &serde_json::json!({"amount": 5}))
            .await;
        assert_eq!(outcome, Ok(Echo { ok: true }));

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /orders "));
        assert!(raw.contains(r#"{"amount":5}"#));
    }

    #[tokio::test]
    async fn test_get_json_unreachable_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = RestClient::new(TransportConfig::new(format!("http://{}", addr))).unwrap();

        let outcome: Outcome<Echo> = client.get_json("anything").await;
        assert!(matches!(outcome, Err(ApiError::Network { .. })));
    }
}
