//! Upstream illustration and story generation services
//!
//! [`HttpGenerationBackend`] posts JSON to the configured URLs. Its failures
//! are mapped onto the error taxonomy by [`classify_backend_error`], which is
//! the classifier the routes hand to the retry executor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use taleweaver_common::error::ErrorKind;
use taleweaver_domain::{
    ImageGenerationRequest, ImageGenerationResponse, StoryGenerationRequest,
    StoryGenerationResponse,
};
use thiserror::Error;
use tracing::debug;

use crate::config::BackendsConfig;

/// Used when an upstream 429 carries no usable `Retry-After`
const DEFAULT_UPSTREAM_RETRY_AFTER: Duration = Duration::from_secs(1);
const MAX_ERROR_BODY_CHARS: usize = 512;

/// A generation call that did not produce a result
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend responded with {status}: {body}")]
    Status { status: u16, retry_after: Option<Duration>, body: String },

    #[error("backend timed out: {0}")]
    Timeout(String),

    #[error("could not connect to backend: {0}")]
    Connect(String),

    #[error("invalid backend response: {0}")]
    Decode(String),

    #[error("backend request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Map a backend failure onto the error taxonomy
pub fn classify_backend_error(err: &BackendError, dependency: &str) -> ErrorKind {
    match err {
        BackendError::Status { status, retry_after, .. } => match *status {
            429 => ErrorKind::RateLimited {
                retry_after: retry_after.unwrap_or(DEFAULT_UPSTREAM_RETRY_AFTER),
            },
            400 => ErrorKind::BadRequest,
            422 => ErrorKind::Validation,
            401 => ErrorKind::Unauthenticated,
            403 => ErrorKind::Forbidden,
            502 => ErrorKind::BadGateway,
            504 => ErrorKind::GatewayTimeout,
            500..=599 => ErrorKind::Dependency { dependency: dependency.to_string() },
            _ => ErrorKind::Internal,
        },
        BackendError::Timeout(_) => ErrorKind::GatewayTimeout,
        BackendError::Connect(_) | BackendError::Decode(_) => ErrorKind::BadGateway,
        BackendError::Transport(_) => ErrorKind::Dependency { dependency: dependency.to_string() },
    }
}

/// The generation services the routes call
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate_image(
        &self,
        request: &ImageGenerationRequest,
    ) -> Result<ImageGenerationResponse, BackendError>;

    async fn generate_story(
        &self,
        request: &StoryGenerationRequest,
    ) -> Result<StoryGenerationResponse, BackendError>;
}

/// JSON-over-HTTP generation services
#[derive(Debug, Clone)]
pub struct HttpGenerationBackend {
    client: Client,
    image_url: String,
    story_url: String,
}

impl HttpGenerationBackend {
    /// # Errors
    /// Returns `BackendError::Transport` if the HTTP client cannot be built.
    pub fn new(config: &BackendsConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            image_url: config.image_url.clone(),
            story_url: config.story_url.clone(),
        })
    }

    async fn post_json<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, BackendError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        debug!(%url, "sending generation request");
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        debug!(%url, %status, "received generation response");

        if !status.is_success() {
            let retry_after = parse_retry_after(status, response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                retry_after,
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        response.json::<Resp>().await.map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn generate_image(
        &self,
        request: &ImageGenerationRequest,
    ) -> Result<ImageGenerationResponse, BackendError> {
        self.post_json(&self.image_url, request).await
    }

    async fn generate_story(
        &self,
        request: &StoryGenerationRequest,
    ) -> Result<StoryGenerationResponse, BackendError> {
        self.post_json(&self.story_url, request).await
    }
}

/// `Retry-After` in delta-seconds; HTTP dates are not honoured
fn parse_retry_after(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const DEP: &str = "image-gen";

    fn request() -> ImageGenerationRequest {
        ImageGenerationRequest {
            character_name: "Pip".to_string(),
            description: "a small fox with a lantern".to_string(),
            art_style: None,
        }
    }

    fn backend(server: &MockServer, timeout_ms: u64) -> HttpGenerationBackend {
        HttpGenerationBackend::new(&BackendsConfig {
            image_url: format!("{}/v1/images", server.uri()),
            story_url: format!("{}/v1/stories", server.uri()),
            request_timeout_ms: timeout_ms,
        })
        .unwrap()
    }

    async fn failure_for(template: ResponseTemplate) -> BackendError {
        let server = MockServer::start().await;
        Mock::given(method("POST")).and(path("/v1/images")).respond_with(template).mount(&server).await;
        backend(&server, 2_000).generate_image(&request()).await.unwrap_err()
    }

    #[tokio::test]
    async fn test_success_decodes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images"))
            .and(body_partial_json(serde_json::json!({"character_name": "Pip"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"image_url": "https://cdn.example/pip.png"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = backend(&server, 2_000).generate_image(&request()).await.unwrap();
        assert_eq!(response.image_url, "https://cdn.example/pip.png");
        assert_eq!(response.revised_prompt, None);
    }

    #[tokio::test]
    async fn test_429_with_retry_after_is_rate_limited() {
        let err = failure_for(ResponseTemplate::new(429).insert_header("Retry-After", "17")).await;
        assert_eq!(
            classify_backend_error(&err, DEP),
            ErrorKind::RateLimited { retry_after: Duration::from_secs(17) }
        );
    }

    #[tokio::test]
    async fn test_status_classification() {
        let cases = [
            (400, ErrorKind::BadRequest),
            (422, ErrorKind::Validation),
            (401, ErrorKind::Unauthenticated),
            (403, ErrorKind::Forbidden),
            (500, ErrorKind::Dependency { dependency: DEP.to_string() }),
            (502, ErrorKind::BadGateway),
            (503, ErrorKind::Dependency { dependency: DEP.to_string() }),
            (504, ErrorKind::GatewayTimeout),
        ];
        for (status, expected) in cases {
            let err = failure_for(ResponseTemplate::new(status).set_body_string("nope")).await;
            assert_eq!(classify_backend_error(&err, DEP), expected, "status {status}");
        }
    }

    #[tokio::test]
    async fn test_slow_backend_is_gateway_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let err = backend(&server, 50).generate_image(&request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)), "{err:?}");
        assert_eq!(classify_backend_error(&err, DEP), ErrorKind::GatewayTimeout);
    }

    #[tokio::test]
    async fn test_connection_refused_is_bad_gateway() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let backend = HttpGenerationBackend::new(&BackendsConfig {
            image_url: format!("http://127.0.0.1:{port}/v1/images"),
            story_url: format!("http://127.0.0.1:{port}/v1/stories"),
            request_timeout_ms: 2_000,
        })
        .unwrap();

        let err = backend.generate_image(&request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Connect(_)), "{err:?}");
        assert_eq!(classify_backend_error(&err, DEP), ErrorKind::BadGateway);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_gateway() {
        let err = failure_for(ResponseTemplate::new(200).set_body_string("<html>")).await;
        assert!(matches!(err, BackendError::Decode(_)));
        assert_eq!(classify_backend_error(&err, DEP), ErrorKind::BadGateway);
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "30".parse().unwrap());
        assert_eq!(
            parse_retry_after(StatusCode::TOO_MANY_REQUESTS, &headers),
            Some(Duration::from_secs(30))
        );
        assert_eq!(parse_retry_after(StatusCode::BAD_GATEWAY, &headers), None);

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(StatusCode::TOO_MANY_REQUESTS, &headers), None);

        let err = BackendError::Status { status: 429, retry_after: None, body: String::new() };
        assert_eq!(
            classify_backend_error(&err, DEP),
            ErrorKind::RateLimited { retry_after: DEFAULT_UPSTREAM_RETRY_AFTER }
        );
    }
}
