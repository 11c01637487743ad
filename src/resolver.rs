use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::api::ApiError;
use crate::transport::{HttpRequest, Transport, TransportError};

const ERROR_BODY_PREVIEW: usize = 200;

/// Why a single candidate did not produce a usable response.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("{url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("{url} returned status {status}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("no candidate endpoints configured")]
    NoCandidates,
}

/// Tries one logical call against every candidate base URL in order, once.
#[derive(Clone)]
pub struct EndpointResolver {
    candidates: Vec<String>,
    transport: Arc<dyn Transport>,
}

impl EndpointResolver {
    pub fn new(candidates: Vec<String>, transport: Arc<dyn Transport>) -> Self {
        let candidates = candidates
            .into_iter()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect();
        Self {
            candidates,
            transport,
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Vec<(String, String)>,
        token: &str,
    ) -> Result<T, ApiError> {
        let body = self.request(Method::GET, path, query, None, token).await?;
        decode(path, &body)
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        payload: Value,
        token: &str,
    ) -> Result<T, ApiError> {
        let body = self
            .request(Method::POST, path, Vec::new(), Some(payload), token)
            .await?;
        decode(path, &body)
    }

    /// Returns the raw body of the first 2xx response.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<Value>,
        token: &str,
    ) -> Result<String, ApiError> {
        let mut last_error = None;
        let mut rejection = None;

        for base_url in &self.candidates {
            let url = format!("{base_url}{path}");
            let request = HttpRequest {
                method: method.clone(),
                url: url.clone(),
                query: query.clone(),
                body: body.clone(),
                bearer_token: token.to_string(),
            };

            debug!(%method, %url, "calling chat service");
            match self.transport.send(request).await {
                Ok(response) if response.is_success() => {
                    debug!(%url, status = response.status, "chat service responded");
                    return Ok(response.body);
                }
                Ok(response) => {
                    debug!(%url, status = response.status, "candidate returned error status");
                    if matches!(response.status, 401 | 403) {
                        rejection = Some((response.status, response.body.clone()));
                    }
                    last_error = Some(AttemptError::Status {
                        url,
                        status: response.status,
                        body: preview(&response.body),
                    });
                }
                Err(source) => {
                    debug!(%url, error = %source, "candidate unreachable");
                    last_error = Some(AttemptError::Transport { url, source });
                }
            }
        }

        if let Some((status, body)) = rejection {
            return Err(ApiError::AuthenticationRejected { status, body });
        }
        Err(ApiError::ServiceUnreachable {
            last_error: Box::new(last_error.unwrap_or(AttemptError::NoCandidates)),
        })
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &str) -> Result<T, ApiError> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|source| ApiError::Decode {
        path: path.to_string(),
        source,
    })
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_BODY_PREVIEW {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(ERROR_BODY_PREVIEW).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, ok_json, refused, status};
    use serde_json::json;

    const CANDIDATES: [&str; 4] = [
        "http://localhost:23373",
        "http://127.0.0.1:23373",
        "http://localhost:23374",
        "http://127.0.0.1:23374",
    ];

    fn resolver(transport: Arc<ScriptedTransport>) -> EndpointResolver {
        EndpointResolver::new(
            CANDIDATES.iter().map(|url| url.to_string()).collect(),
            transport,
        )
    }

    #[tokio::test]
    async fn returns_the_only_successful_candidate_in_any_position() {
        for winner in 0..CANDIDATES.len() {
            let transport = ScriptedTransport::new(move |request| {
                if request.url.starts_with(CANDIDATES[winner]) {
                    ok_json(json!({"winner": winner}))
                } else if winner % 2 == 0 {
                    refused()
                } else {
                    status(502, "bad gateway")
                }
            });
            let value: Value = resolver(transport.clone())
                .get("/v0/get-accounts", Vec::new(), "token")
                .await
                .expect("one candidate succeeds");
            assert_eq!(value, json!({"winner": winner}));
            assert_eq!(transport.requests().len(), winner + 1);
        }
    }

    #[tokio::test]
    async fn all_failures_become_service_unreachable() {
        let transport = ScriptedTransport::new(|request| {
            if request.url.contains("23374") {
                status(500, "boom")
            } else {
                refused()
            }
        });
        let err = resolver(transport.clone())
            .get::<Value>("/v0/get-accounts", Vec::new(), "token")
            .await
            .expect_err("every candidate fails");

        match err {
            ApiError::ServiceUnreachable { last_error } => {
                assert!(matches!(*last_error, AttemptError::Status { status: 500, .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(transport.requests().len(), CANDIDATES.len());
        assert!(ApiError::ServiceUnreachable {
            last_error: Box::new(AttemptError::NoCandidates)
        }
        .to_string()
        .contains("API enabled"));
    }

    #[tokio::test]
    async fn rejected_token_is_reported_after_full_pass() {
        let transport = ScriptedTransport::new(|request| {
            if request.url.starts_with(CANDIDATES[0]) {
                status(401, "{\"error\":\"invalid token\"}")
            } else {
                refused()
            }
        });
        let err = resolver(transport.clone())
            .get::<Value>("/v0/get-accounts", Vec::new(), "stale")
            .await
            .expect_err("token rejected");
        assert!(matches!(err, ApiError::AuthenticationRejected { status: 401, .. }));
        assert_eq!(transport.requests().len(), CANDIDATES.len());
    }

    #[tokio::test]
    async fn requests_carry_token_query_and_body() {
        let transport = ScriptedTransport::new(|_| ok_json(json!({"success": true})));
        let _: Value = resolver(transport.clone())
            .post("/v0/send-message", json!({"chatID": "c1", "text": "hi"}), "secret")
            .await
            .expect("post");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].url, "http://localhost:23373/v0/send-message");
        assert_eq!(requests[0].bearer_token, "secret");
        assert_eq!(requests[0].body, Some(json!({"chatID": "c1", "text": "hi"})));
    }

    #[tokio::test]
    async fn empty_candidate_list_is_unreachable() {
        let transport = ScriptedTransport::new(|_| ok_json(json!([])));
        let resolver = EndpointResolver::new(vec!["  ".trim().to_string()], transport.clone());
        let err = resolver
            .get::<Value>("/v0/get-accounts", Vec::new(), "token")
            .await
            .expect_err("nothing to call");
        assert!(matches!(err, ApiError::ServiceUnreachable { .. }));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn long_error_bodies_are_shortened() {
        let body = "x".repeat(500);
        assert_eq!(preview(&body).len(), ERROR_BODY_PREVIEW + 3);
    }
}
