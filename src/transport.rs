//! HTTP transport used by the endpoint resolver.
//!
//! The resolver only knows about candidate base URLs and this trait; the production
//! transport is `reqwest`, tests script responses in memory.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, header};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("connection failed: {0}")]
    Connect(String),
}

impl TransportError {
    /// Refused or unresolvable hosts are `Connect`; everything else stays `Http`.
    fn from_send(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Http(err)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer_token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request. Non-2xx statuses are returned as responses, only failures to
    /// get a response at all are errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Where requests go: straight to the desktop service ports, or through a local proxy
/// that forwards the same `/v0/*` paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    Direct { base_urls: Vec<String> },
    Proxied { proxy_url: String },
}

impl TransportMode {
    pub fn candidates(&self) -> Vec<String> {
        match self {
            TransportMode::Direct { base_urls } => base_urls.clone(),
            TransportMode::Proxied { proxy_url } => vec![proxy_url.clone()],
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransportMode::Direct { .. } => "direct",
            TransportMode::Proxied { .. } => "proxied",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.candidates().join(", "))
    }
}

#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// System proxy variables are ignored: every candidate is a service on this machine.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method, &request.url)
            .bearer_auth(&request.bearer_token)
            .header(header::CONTENT_TYPE, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(TransportError::from_send)?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}
