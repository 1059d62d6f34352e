use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::llm::functions::FunctionDeclaration;
use crate::llm::messages::{FunctionCall, Message};
use crate::llm::retry::Transient;

/// Whether the model may answer with a function-call directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionCallMode {
    Auto,
    None,
}

impl FunctionCallMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::None => "none",
        }
    }
}

/// Message of the first choice in a chat-completions response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
}

impl ChoiceMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            function_call: None,
        }
    }

    pub fn function_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            content: None,
            function_call: Some(FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            }),
        }
    }

    /// Converts the reply into the assistant message appended to the conversation.
    pub fn into_message(self) -> Message {
        match self.function_call {
            Some(call) => Message::assistant_function_call(call),
            None => Message::assistant(self.content),
        }
    }
}

/// One completion call's reply and its token usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub message: ChoiceMessage,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("{key_env} is not set in the environment")]
    MissingApiKey { key_env: &'static str },
    #[error("chat completion request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("chat completion API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("chat completion response could not be decoded: {0}")]
    Decode(String),
    #[error("chat completion response did not contain any choice")]
    EmptyResponse,
}

impl Transient for CompletionError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Request(source) => is_retryable_request_error(source),
            Self::Api { status, .. } => is_retryable_status(*status),
            Self::MissingApiKey { .. } | Self::Decode(_) | Self::EmptyResponse => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn is_retryable_request_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Chat-completion capability used by the orchestrator.
///
/// Implementations apply their own retry policy; every call is independent
/// of the previous ones given its message list.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        functions: &[FunctionDeclaration],
        mode: FunctionCallMode,
    ) -> Result<Completion, CompletionError>;
}
