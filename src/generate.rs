//! Text generation backend used by the assistant features.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;
use url::{Host, Url};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generation failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("COHERE_API_KEY is not set")]
    MissingApiKey,
    #[error("model returned no text")]
    EmptyResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError>;
}

pub struct CohereGenerator {
    http: Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct CohereChatResponse {
    #[serde(default)]
    text: Option<String>,
}

impl CohereGenerator {
    pub fn from_config(config: &Config) -> Result<Self, GenerateError> {
        let api_key = config
            .cohere_api_key
            .clone()
            .ok_or(GenerateError::MissingApiKey)?;
        let mut builder = Client::builder().timeout(Duration::from_secs(60));
        if is_loopback(&config.cohere_api_base) {
            builder = builder.no_proxy();
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            api_base: config.cohere_api_base.clone(),
            api_key,
            model: config.cohere_model.clone(),
        })
    }
}

fn is_loopback(api_base: &str) -> bool {
    match Url::parse(api_base).ok().and_then(|url| url.host().map(|host| host.to_owned())) {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[async_trait]
impl TextGenerator for CohereGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError> {
        let url = format!("{}/v1/chat", self.api_base);
        debug!(model = %self.model, max_tokens = request.max_tokens, "requesting generation");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "message": request.prompt,
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: CohereChatResponse = response.json().await?;
        payload
            .text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(GenerateError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request_body, serve_once};
    use serde_json::Value;

    fn generator(api_base: &str) -> CohereGenerator {
        let api_base = api_base.to_string();
        let config = Config::from_lookup(move |key| match key {
            "COHERE_API_KEY" => Some("co-key".to_string()),
            "COHERE_API_BASE" => Some(api_base.clone()),
            _ => None,
        });
        CohereGenerator::from_config(&config).expect("generator")
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "Summarize: hi".to_string(),
            max_tokens: 300,
            temperature: 0.3,
        }
    }

    #[tokio::test]
    async fn posts_chat_request_and_returns_trimmed_text() {
        let (base_url, server) =
            serve_once(200, r#"{"text":"  Plans for dinner.  ","generation_id":"g1"}"#).await;
        let text = generator(&base_url)
            .generate(&request())
            .await
            .expect("generation");
        assert_eq!(text, "Plans for dinner.");

        let raw = server.await.expect("server task");
        assert!(raw.starts_with("POST /v1/chat HTTP/1.1\r\n"), "{raw}");
        assert!(raw.to_lowercase().contains("authorization: bearer co-key"));
        let body: Value = serde_json::from_str(request_body(&raw)).expect("json body");
        assert_eq!(body["model"], "command-r");
        assert_eq!(body["message"], "Summarize: hi");
        assert_eq!(body["max_tokens"], 300);
        let temperature = body["temperature"].as_f64().expect("temperature");
        assert!((temperature - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let (base_url, _server) = serve_once(429, r#"{"message":"rate limited"}"#).await;
        let err = generator(&base_url)
            .generate(&request())
            .await
            .expect_err("rate limited");
        match err {
            GenerateError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("rate limited"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_or_missing_text_is_empty_response() {
        for payload in [r#"{"text":"   "}"#, r#"{"generation_id":"g2"}"#] {
            let (base_url, _server) = serve_once(200, payload).await;
            let err = generator(&base_url)
                .generate(&request())
                .await
                .expect_err("no text");
            assert!(matches!(err, GenerateError::EmptyResponse), "{payload}");
        }
    }

    #[test]
    fn only_local_bases_count_as_loopback() {
        assert!(is_loopback("http://127.0.0.1:8080"));
        assert!(is_loopback("http://localhost:9000"));
        assert!(is_loopback("http://[::1]:9000"));
        assert!(!is_loopback("https://api.cohere.com"));
        assert!(!is_loopback("not a url"));
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let config = Config::from_lookup(|_| None);
        assert!(matches!(
            CohereGenerator::from_config(&config),
            Err(GenerateError::MissingApiKey)
        ));
    }
}
