use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Arguments of a `get_sources` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalArgs {
    pub question: String,
    /// Any further arguments the model supplied, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RetrievalArgs {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            extra: Map::new(),
        }
    }

    /// Extracts the typed arguments; `question` must be a string.
    pub fn from_arguments(arguments: &Map<String, Value>) -> Result<Self, String> {
        let question = match arguments.get("question") {
            Some(Value::String(question)) => question.clone(),
            Some(other) => return Err(format!("'question' must be a string, got {other}")),
            None => return Err("missing required argument 'question'".to_string()),
        };
        let extra = arguments
            .iter()
            .filter(|(key, _)| key.as_str() != "question")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Ok(Self { question, extra })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("retrieval request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("retrieval API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("retrieval response could not be decoded: {0}")]
    Decode(String),
    #[error("retrieval failed: {0}")]
    Failed(String),
}

/// Knowledge retrieval capability. The returned text is opaque to callers.
///
/// Retrying and caching are up to the implementation.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, args: &RetrievalArgs) -> Result<String, RetrievalError>;
}

#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    result: String,
}

/// Retriever backed by an HTTP endpoint that accepts the call arguments as a
/// JSON body and answers with `{"result": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    timeout: Option<Duration>,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key: None,
            timeout: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, args: &RetrievalArgs) -> Result<String, RetrievalError> {
        let mut request = self.client.post(&self.url).json(args);
        if let Some(api_key) = &self.api_key {
            request = request.header("api-key", api_key);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(RetrievalError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RetrievalError::Api { status, body });
        }

        let body: RetrievalResponse = response
            .json()
            .await
            .map_err(|err| RetrievalError::Decode(err.to_string()))?;
        debug!(bytes = body.result.len(), "retrieval returned sources");
        Ok(body.result)
    }
}
