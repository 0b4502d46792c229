//! Turning HTTP calls into outcomes.
//!
//! Transport failures never escape as errors of their own: a call resolves
//! to `Ok(value)` or to one of the three [`ApiError`] classes.

use std::future::Future;

use fresco_core::{ApiError, Outcome};
use reqwest::Response;
use serde::de::DeserializeOwned;

/// Classify a transport failure.
///
/// Connect, timeout, request and body errors are `Network`. An error that
/// carries a status is `Http`. Everything else is `Unknown`.
pub fn classify_reqwest_error(error: &reqwest::Error) -> ApiError {
    if let Some(status) = error.status() {
        return ApiError::http(status.as_u16(), error.to_string());
    }
    if error.is_connect() || error.is_timeout() || error.is_request() || error.is_body() {
        ApiError::network(error.to_string())
    } else {
        ApiError::unknown(error.to_string())
    }
}

/// Decode a response: 2xx bodies as JSON, anything else as `Http`.
///
/// A non-2xx body that cannot be read is replaced by a note naming the
/// read error.
pub async fn decode_response<T: DeserializeOwned>(response: Response) -> Outcome<T> {
    let status = response.status();
    if !status.is_success() {
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read error response body"
                );
                format!("<unreadable body: {}>", e)
            }
        };
        tracing::debug!(status = status.as_u16(), "Non-success response");
        return Err(ApiError::http(status.as_u16(), body));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| classify_reqwest_error(&e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::unknown(format!("malformed response body: {}", e)))
}

/// Await a request and map its result into an [`Outcome`].
///
/// ```ignore
/// let balance: Outcome<Balance> = outcome_call(client.get(url).send()).await;
/// ```
pub async fn outcome_call<T, F>(request: F) -> Outcome<T>
where
    T: DeserializeOwned,
    F: Future<Output = reqwest::Result<Response>>,
{
    match request.await {
        Ok(response) => decode_response(response).await,
        Err(e) => {
            let error = classify_reqwest_error(&e);
            tracing::debug!(
                url = e.url().map(|u| u.as_str()).unwrap_or("-"),
                error = %error,
                "Request failed"
            );
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        value: u32,
    }

    fn http_response(status_line: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        )
    }

    async fn serve_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_success_decodes_json() {
        let url = serve_once(http_response("200 OK", r#"{"value":42}"#)).await;
        let client = reqwest::Client::new();

        let outcome: Outcome<Payload> = outcome_call(client.get(&url).send()).await;
        assert_eq!(outcome, Ok(Payload { value: 42 }));
    }

    #[tokio::test]
    async fn test_non_success_is_http_error() {
        let url = serve_once(http_response("404 Not Found", r#"{"error":"missing"}"#)).await;
        let client = reqwest::Client::new();

        let outcome: Outcome<Payload> = outcome_call(client.get(&url).send()).await;
        assert_eq!(outcome, Err(ApiError::http(404, r#"{"error":"missing"}"#)));
    }

    #[tokio::test]
    async fn test_truncated_error_body_is_noted() {
        let truncated = concat!(
            "HTTP/1.1 500 Internal Server Error\r\n",
            "Content-Length: 100\r\n",
            "Connection: close\r\n\r\n",
            "partial"
        );
        let url = serve_once(truncated.to_string()).await;
        let client = reqwest::Client::new();

        let outcome: Outcome<Payload> = outcome_call(client.get(&url).send()).await;
        match outcome {
            Err(ApiError::Http { code, body }) => {
                assert_eq!(code, 500);
                assert!(body.starts_with("<unreadable body:"), "body was {:?}", body);
            }
            other => panic!("expected Http error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_unknown() {
        let url = serve_once(http_response("200 OK", "not json")).await;
        let client = reqwest::Client::new();

        let outcome: Outcome<Payload> = outcome_call(client.get(&url).send()).await;
        assert!(matches!(outcome, Err(ApiError::Unknown { .. })));
    }

    #[tokio::test]
    async fn test_refused_connection_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = reqwest::Client::new();

        let outcome: Outcome<Payload> =
            outcome_call(client.get(format!("http://{}", addr)).send()).await;
        assert!(matches!(outcome, Err(ApiError::Network { .. })));
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let outcome: Outcome<Payload> =
            outcome_call(client.get(format!("http://{}", addr)).send()).await;
        let error = outcome.unwrap_err();
        assert!(error.is_transient());
        assert!(matches!(error, ApiError::Network { .. }));
    }
}
