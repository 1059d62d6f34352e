use std::env;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::llm::functions::FunctionDeclaration;
use crate::llm::messages::Message;
use crate::llm::provider::{
    ChoiceMessage, Completion, CompletionClient, CompletionError, FunctionCallMode,
};
use crate::llm::retry::{RetryPolicy, retry_with_backoff};

/// Environment variable holding the Azure OpenAI key.
pub const API_KEY_ENV: &str = "AZURE_OPENAI_KEY";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    messages: &'a [Message],
    #[serde(skip_serializing_if = "no_functions")]
    functions: &'a [FunctionDeclaration],
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCallMode>,
    temperature: f32,
}

fn no_functions(functions: &&[FunctionDeclaration]) -> bool {
    functions.is_empty()
}

impl<'a> ChatCompletionRequest<'a> {
    fn new(
        messages: &'a [Message],
        functions: &'a [FunctionDeclaration],
        mode: FunctionCallMode,
        temperature: f32,
    ) -> Self {
        Self {
            messages,
            functions,
            function_call: (!functions.is_empty()).then_some(mode),
            temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

/// Request body exactly as it is sent to the deployment.
pub fn completion_request_json(
    messages: &[Message],
    functions: &[FunctionDeclaration],
    mode: FunctionCallMode,
    temperature: f32,
) -> Value {
    serde_json::to_value(ChatCompletionRequest::new(
        messages,
        functions,
        mode,
        temperature,
    ))
    .unwrap_or(Value::Null)
}

pub fn completions_url(endpoint: &str, deployment: &str, api_version: &str) -> String {
    format!(
        "{}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
        endpoint.trim_end_matches('/')
    )
}

/// Chat-completions client for one Azure OpenAI deployment.
#[derive(Debug, Clone)]
pub struct AzureOpenAiClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    temperature: f32,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl AzureOpenAiClient {
    pub fn new(config: &OrchestratorConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: completions_url(&config.endpoint, &config.deployment, &config.api_version),
            api_key: api_key.into(),
            temperature: config.temperature,
            timeout: config.timeout,
            retry: config.completion_retry,
        }
    }

    /// Builds a client with the key taken from `AZURE_OPENAI_KEY`.
    pub fn from_env(config: &OrchestratorConfig) -> Result<Self, CompletionError> {
        let api_key = env::var(API_KEY_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or(CompletionError::MissingApiKey {
                key_env: API_KEY_ENV,
            })?;
        Ok(Self::new(config, api_key))
    }

    /// Sends one request without retrying.
    pub async fn send_once(
        &self,
        messages: &[Message],
        functions: &[FunctionDeclaration],
        mode: FunctionCallMode,
    ) -> Result<Completion, CompletionError> {
        let payload = ChatCompletionRequest::new(messages, functions, mode, self.temperature);
        let mut request = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(CompletionError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Decode(err.to_string()))?;
        let message = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(CompletionError::EmptyResponse)?;
        let (prompt_tokens, completion_tokens) = body
            .usage
            .map(|usage| {
                (
                    usage.prompt_tokens.unwrap_or_default(),
                    usage.completion_tokens.unwrap_or_default(),
                )
            })
            .unwrap_or_default();

        debug!(
            mode = mode.as_str(),
            prompt_tokens,
            completion_tokens,
            function_call = message.function_call.is_some(),
            "chat completion received"
        );

        Ok(Completion {
            message,
            prompt_tokens,
            completion_tokens,
        })
    }
}

#[async_trait]
impl CompletionClient for AzureOpenAiClient {
    async fn complete(
        &self,
        messages: &[Message],
        functions: &[FunctionDeclaration],
        mode: FunctionCallMode,
    ) -> Result<Completion, CompletionError> {
        retry_with_backoff(&self.retry, "chat_completion", move || {
            self.send_once(messages, functions, mode)
        })
        .await
    }
}
