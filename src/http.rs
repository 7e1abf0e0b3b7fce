//! Outbound HTTP client shared by the provider integrations.
//!
//! Every call carries a timeout. Failures are retried with exponential backoff
//! up to a fixed number of attempts and then surface as [`AppError::Network`].
//! Idempotent methods are retried on timeouts, refused connections and server
//! errors. A POST is only retried when the connection could not be opened,
//! since a provider that already received it may have created a media
//! container or a post.

use std::time::Duration;

use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::config::HttpSettings;
use crate::error::AppError;

/// HTTP client with built-in retry and timeout support.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    max_attempts: usize,
    base_backoff: Duration,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn from_settings(settings: &HttpSettings) -> Result<Self, AppError> {
        Self::builder()
            .timeout(settings.timeout)
            .max_attempts(settings.max_attempts)
            .base_backoff(settings.base_backoff)
            .build()
    }

    pub fn get<U: reqwest::IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.request(Method::GET, url)
    }

    pub fn post<U: reqwest::IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.request(Method::POST, url)
    }

    /// Execute the provided request builder with retry semantics.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, AppError> {
        let attempts = self.max_attempts.max(1);

        for attempt in 0..attempts {
            let request = builder
                .try_clone()
                .ok_or_else(|| AppError::Internal("request body cannot be cloned".into()))?
                .build()
                .map_err(|e| AppError::Internal(format!("invalid request: {e}")))?;

            let method = request.method().clone();
            let path = request.url().path().to_string();
            debug!(attempt = attempt + 1, %method, %path, "sending provider request");

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt = attempt + 1, %method, %path, %status, "provider responded");

                    if status.is_server_error() && is_idempotent(&method) && attempt + 1 < attempts
                    {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }

                    return Ok(response);
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, %method, %path, error = %err, "provider request failed");

                    if attempt + 1 < attempts && should_retry_error(&method, &err) {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }

                    return Err(AppError::Network(describe(&err)));
                }
            }
        }

        Err(AppError::Network(
            "provider request exhausted retries without a response".into(),
        ))
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = retry_number.saturating_sub(1).min(8) as u32;
        self.base_backoff.saturating_mul(1u32 << shift)
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    max_attempts: usize,
    base_backoff: Duration,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
        }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configure the total number of attempts (initial try + retries).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn build(self) -> Result<HttpClient, AppError> {
        let client = ReqwestClient::builder()
            .timeout(self.timeout)
            .user_agent(concat!("social-publisher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(HttpClient {
            client,
            max_attempts: self.max_attempts.max(1),
            base_backoff: self.base_backoff,
        })
    }
}

/// Read a provider response as JSON. Non-JSON bodies come back as a JSON string
/// so error messages can still be surfaced verbatim.
pub async fn read_json(response: Response) -> Result<(StatusCode, serde_json::Value), AppError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AppError::Network(format!("failed to read provider response: {e}")))?;

    let value = serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body));
    Ok((status, value))
}

fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD)
}

fn should_retry_error(method: &Method, err: &reqwest::Error) -> bool {
    if is_idempotent(method) {
        err.is_timeout() || err.is_connect() || err.is_request()
    } else {
        // Nothing reached the provider.
        err.is_connect() && !err.is_timeout()
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "provider request timed out".into()
    } else if err.is_connect() {
        "could not connect to provider".into()
    } else {
        format!("provider request failed: {err}")
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_with_defaults() -> HttpClient {
        HttpClient::builder()
            .base_backoff(Duration::from_millis(10))
            .max_attempts(3)
            .build()
            .expect("http client")
    }

    #[tokio::test]
    async fn retries_server_errors_for_get() {
        let server = MockServer::start().await;
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        Mock::given(method("GET"))
            .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
                if attempts_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(500)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .expect(3)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response = client.send(client.get(server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_server_errors_for_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response = client.send(client.post(server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn timed_out_post_is_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;

        let client = HttpClient::builder()
            .timeout(Duration::from_millis(50))
            .max_attempts(3)
            .base_backoff(Duration::from_millis(5))
            .build()
            .unwrap();

        let err = client.send(client.post(server.uri())).await.unwrap_err();
        assert!(matches!(err, AppError::Network(ref m) if m.contains("timed out")));

        // Let the delayed responses settle before counting.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn connection_failures_become_network_errors() {
        // Reserve a port, then close it so nothing is listening.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_with_defaults();
        let err = client
            .send(client.get(format!("http://{addr}")))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Network(_)));
    }

    #[tokio::test]
    async fn timeouts_become_network_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = HttpClient::builder()
            .timeout(Duration::from_millis(50))
            .max_attempts(2)
            .base_backoff(Duration::from_millis(5))
            .build()
            .unwrap();

        let err = client.send(client.get(server.uri())).await.unwrap_err();
        assert!(matches!(err, AppError::Network(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn read_json_keeps_plain_text_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad things"))
            .mount(&server)
            .await;

        let client = client_with_defaults();
        let response = client.send(client.get(server.uri())).await.unwrap();
        let (status, body) = read_json(response).await.unwrap();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::Value::String("bad things".into()));
    }

    #[test]
    fn backoff_doubles_per_retry() {
        let client = HttpClient::builder()
            .base_backoff(Duration::from_millis(100))
            .build()
            .unwrap();
        assert_eq!(client.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(client.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(client.backoff_delay(3), Duration::from_millis(400));
    }
}
