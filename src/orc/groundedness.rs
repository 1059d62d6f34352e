use std::sync::Arc;

use async_trait::async_trait;

use crate::config::OrchestratorConfig;
use crate::llm::azure::AzureOpenAiClient;
use crate::llm::messages::Message;
use crate::llm::provider::{CompletionError, FunctionCallMode};
use crate::llm::retry::{RetryPolicy, Transient, retry_with_backoff};

#[derive(Debug, thiserror::Error)]
pub enum GroundednessError {
    #[error("groundedness scoring failed: {0}")]
    Completion(#[from] CompletionError),
    #[error("groundedness response had no content")]
    EmptyScore,
}

impl Transient for GroundednessError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Completion(err) => err.is_transient(),
            Self::EmptyScore => false,
        }
    }
}

/// Scores how well an answer is supported by its sources.
///
/// The raw reply is returned; callers decide whether it is a usable score.
#[async_trait]
pub trait GroundednessEvaluator: Send + Sync {
    async fn score(&self, answer: &str, sources: &str) -> Result<String, GroundednessError>;
}

/// Parses an evaluator reply. Only plain non-negative integers count.
pub fn parse_score(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Substitutes `{{answer}}` and `{{sources}}` in one pass, so placeholder
/// text inside the substituted values is left alone.
pub fn render_prompt(template: &str, answer: &str, sources: &str) -> String {
    let mut rendered = String::with_capacity(template.len() + answer.len() + sources.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        rendered.push_str(&rest[..start]);
        let after = &rest[start..];
        if let Some(tail) = after.strip_prefix("{{answer}}") {
            rendered.push_str(answer);
            rest = tail;
        } else if let Some(tail) = after.strip_prefix("{{sources}}") {
            rendered.push_str(sources);
            rest = tail;
        } else {
            rendered.push_str("{{");
            rest = &after[2..];
        }
    }
    rendered.push_str(rest);
    rendered
}

/// Evaluator that asks the chat deployment to grade the answer.
#[derive(Debug, Clone)]
pub struct LlmGroundednessEvaluator {
    client: Arc<AzureOpenAiClient>,
    template: String,
    retry: RetryPolicy,
}

impl LlmGroundednessEvaluator {
    pub fn new(client: Arc<AzureOpenAiClient>, config: &OrchestratorConfig) -> Self {
        Self {
            client,
            template: config.groundedness_prompt.clone(),
            retry: config.groundedness_retry,
        }
    }
}

#[async_trait]
impl GroundednessEvaluator for LlmGroundednessEvaluator {
    async fn score(&self, answer: &str, sources: &str) -> Result<String, GroundednessError> {
        let messages = vec![Message::user(render_prompt(&self.template, answer, sources))];
        let client = &self.client;
        let messages = &messages;

        retry_with_backoff(&self.retry, "groundedness", move || async move {
            client
                .send_once(messages, &[], FunctionCallMode::None)
                .await
                .map_err(GroundednessError::from)
                .and_then(|completion| {
                    completion
                        .message
                        .content
                        .map(|content| content.trim().to_string())
                        .filter(|content| !content.is_empty())
                        .ok_or(GroundednessError::EmptyScore)
                })
        })
        .await
    }
}
