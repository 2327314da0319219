//!
//! Upstream chat-completions client.
//!
//! Sends one normalized request to `{base_url}/v1/chat/completions` with the
//! configured bearer key. There are no retries at this level; the stream
//! fallback in the relay decides whether a second call is made.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use reqwest::Client;

use crate::chat::ChatRequest;
use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};

/* --- constants ------------------------------------------------------------------------------ */

/** Content type header for JSON requests */
const CONTENT_TYPE_JSON: &str = "application/json";

/** Bearer token prefix */
const BEARER_PREFIX: &str = "Bearer ";

/* --- types ----------------------------------------------------------------------------------- */

///
/// HTTP client bound to one upstream endpoint and credential.
pub struct UpstreamClient {
    /** pooled HTTP client */
    http_client: Client,
    /** full chat-completions URL */
    url: String,
    /** bearer credential */
    api_key: Option<String>,
}

/* --- start of code -------------------------------------------------------------------------- */

impl UpstreamClient {
    ///
    /// Create an upstream client with the configured timeouts.
    ///
    /// The overall timeout also bounds reading a streamed body.
    ///
    /// # Arguments
    ///  * `config` - upstream section of the configuration
    ///
    /// # Returns
    ///  * Configured client
    ///  * `ProxyError::Http` if the HTTP client cannot be built
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ProxyError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            url: config.chat_completions_url(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
        })
    }

    /// Endpoint requests are sent to
    pub fn url(&self) -> &str {
        &self.url
    }

    ///
    /// Send one chat request upstream.
    ///
    /// The response is returned whatever its status; only transport failures
    /// (DNS, refused connection, timeout) are errors.
    ///
    /// # Arguments
    ///  * `request` - normalized request, serialized as the upstream payload
    ///
    /// # Returns
    ///  * Upstream response with headers read and body not yet consumed
    ///  * `ProxyError::MissingCredential` if no key is configured
    ///  * `ProxyError::UpstreamUnavailable` on transport failure
    pub async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let api_key = self.api_key.as_deref().ok_or(ProxyError::MissingCredential)?;

        tracing::debug!(
            "Forwarding to {}: model={} messages={} stream={} max_tokens={}",
            self.url,
            request.model,
            request.messages.len(),
            request.stream,
            request.max_tokens
        );

        let response = self
            .http_client
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, format!("{}{}", BEARER_PREFIX, api_key))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_JSON)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Upstream request to {} failed: {}", self.url, e);
                ProxyError::UpstreamUnavailable(e.to_string())
            })?;

        tracing::debug!("Upstream answered {}", response.status());
        Ok(response)
    }
}

/* --- tests ------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatMessage, Role};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage { role: Role::User, content: "hi".to_string() }],
            stream: false,
            max_tokens: 512,
            temperature: 0.7,
        }
    }

    fn upstream_config(base_url: &str) -> UpstreamConfig {
        UpstreamConfig {
            base_url: base_url.to_string(),
            api_key: Some("sk-test".to_string()),
            ..UpstreamConfig::default()
        }
    }

    #[tokio::test]
    async fn test_send_posts_payload_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_json(json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false,
                "max_tokens": 512,
                "temperature": 0.7
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&upstream_config(&format!("{}/", server.uri()))).unwrap();
        let response = client.send(&request()).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_status_is_not_a_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let client = UpstreamClient::new(&upstream_config(&server.uri())).unwrap();
        let response = client.send(&request()).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_maps_to_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = UpstreamClient::new(&upstream_config(&format!("http://{}", addr))).unwrap();
        let err = client.send(&request()).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnavailable(_)));
        assert!(err.to_string().starts_with("Upstream request failed: "));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let mut config = upstream_config("http://127.0.0.1:9");
        config.api_key = None;

        let client = UpstreamClient::new(&config).unwrap();
        assert!(matches!(client.send(&request()).await, Err(ProxyError::MissingCredential)));
    }
}
