use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::config::OrchestratorConfig;
use crate::llm::functions::{FunctionDeclaration, GET_SOURCES, default_declarations};
use crate::llm::messages::Message;
use crate::llm::provider::{
    ChoiceMessage, Completion, CompletionClient, CompletionError, FunctionCallMode,
};
use crate::orc::dispatch::{DispatchError, FunctionCallRequest, FunctionDispatchTable, FunctionKind};
use crate::orc::groundedness::{GroundednessEvaluator, parse_score};
use crate::orc::history::{ChatTurn, history_to_messages};

/// Prefix of the answer returned when the RAG round fails.
pub const ERROR_ANSWER: &str = "Sorry, something went wrong while generating the answer.";
/// Answer returned when the groundedness score is below the threshold.
pub const UNGROUNDED_ANSWER: &str = "I'm sorry, I could not find enough information in the knowledge base to give a reliable answer to your question.";

/// Outcome of one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerResult {
    pub prompt: String,
    pub answer: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groundedness_score: Option<u32>,
    pub error: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("the model returned no answer content")]
    EmptyAnswer,
}

/// Token counts summed over every completion call of a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    fn record(&mut self, completion: &Completion) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(completion.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(completion.completion_tokens);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalMetadata {
    pub search_query: String,
    pub sources: String,
}

/// Successful RAG round: the full conversation and what was retrieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagRound {
    pub conversation: Vec<Message>,
    pub answer: String,
    pub retrieval: Option<RetrievalMetadata>,
}

/// Sources of the retrieval call that produced the final answer, if the
/// message before the last one is a `get_sources` result.
pub fn retrieved_sources(conversation: &[Message]) -> Option<&str> {
    match conversation.iter().rev().nth(1)? {
        Message::Function { name, content } if name == GET_SOURCES => Some(content),
        _ => None,
    }
}

/// Answers one user turn.
pub struct Orchestrator {
    config: OrchestratorConfig,
    functions: Vec<FunctionDeclaration>,
    completion: Arc<dyn CompletionClient>,
    dispatch: FunctionDispatchTable,
    evaluator: Arc<dyn GroundednessEvaluator>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        completion: Arc<dyn CompletionClient>,
        dispatch: FunctionDispatchTable,
        evaluator: Arc<dyn GroundednessEvaluator>,
    ) -> Self {
        Self {
            config,
            functions: default_declarations(),
            completion,
            dispatch,
            evaluator,
        }
    }

    /// Replaces the declarations offered to the model.
    pub fn with_functions(mut self, functions: Vec<FunctionDeclaration>) -> Self {
        self.functions = functions;
        self
    }

    /// Runs the turn. Failures are reported inside the result, never raised.
    #[tracing::instrument(skip_all, fields(turns = history.len()))]
    pub async fn get_answer(&self, history: &[ChatTurn]) -> AnswerResult {
        let prompt = self.config.system_prompt.clone();
        let mut conversation = Vec::with_capacity(history.len() + 4);
        conversation.push(Message::system(prompt.clone()));
        conversation.extend(history_to_messages(history));

        let mut usage = TokenUsage::default();
        let mut result = AnswerResult {
            prompt,
            answer: String::new(),
            prompt_tokens: 0,
            completion_tokens: 0,
            search_query: None,
            sources: None,
            groundedness_score: None,
            error: false,
        };

        match self.rag_round(conversation, &mut usage).await {
            Ok(round) => {
                result.answer = round.answer;
                if let Some(retrieval) = round.retrieval {
                    result.search_query = Some(retrieval.search_query);
                    result.sources = Some(retrieval.sources);
                }
                if let Some(sources) = retrieved_sources(&round.conversation) {
                    if let Some(score) = self.quality_gate(&result.answer, sources).await {
                        if score < self.config.groundedness_threshold {
                            result.answer = UNGROUNDED_ANSWER.to_string();
                        }
                        result.groundedness_score = Some(score);
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "error when executing RAG flow");
                result.answer = format!("{ERROR_ANSWER} RAG flow: {err}");
                result.error = true;
            }
        }

        result.prompt_tokens = usage.prompt_tokens;
        result.completion_tokens = usage.completion_tokens;
        result
    }

    /// First completion, optional function round, final answer.
    ///
    /// `usage` is updated as calls complete so tokens spent before a failure
    /// are still reported.
    pub async fn rag_round(
        &self,
        mut conversation: Vec<Message>,
        usage: &mut TokenUsage,
    ) -> Result<RagRound, RagError> {
        let first = self
            .completion
            .complete(&conversation, &self.functions, FunctionCallMode::Auto)
            .await?;
        usage.record(&first);

        let mut retrieval = None;
        match first.message {
            ChoiceMessage {
                function_call: Some(call),
                ..
            } => {
                let request = FunctionCallRequest::parse(&call)?;
                let capability = self.dispatch.resolve(&request.name)?;
                let output = self.dispatch.invoke(capability, &request.arguments).await?;
                info!(function = %request.name, "function call completed");

                conversation.push(Message::assistant_function_call(call));
                conversation.push(Message::function_result(
                    request.name,
                    output.result.clone(),
                ));

                let second = self
                    .completion
                    .complete(&conversation, &self.functions, FunctionCallMode::None)
                    .await?;
                usage.record(&second);
                conversation.push(second.message.into_message());

                if output.kind == FunctionKind::GetSources {
                    retrieval = output.search_query.map(|search_query| RetrievalMetadata {
                        search_query,
                        sources: output.result,
                    });
                }
            }
            reply => conversation.push(reply.into_message()),
        }

        // An empty string is a valid answer; only null content is not.
        let answer = conversation
            .last()
            .and_then(Message::content_text)
            .ok_or(RagError::EmptyAnswer)?
            .to_string();

        Ok(RagRound {
            conversation,
            answer,
            retrieval,
        })
    }

    /// Scores the answer. `None` when the score is unavailable.
    async fn quality_gate(&self, answer: &str, sources: &str) -> Option<u32> {
        match self.evaluator.score(answer, sources).await {
            Ok(reply) => {
                let score = parse_score(&reply);
                match score {
                    Some(score) => info!(score, "groundedness"),
                    None => error!(reply = %reply, "could not calculate groundedness"),
                }
                score
            }
            Err(err) => {
                error!(error = %err, "could not calculate groundedness");
                None
            }
        }
    }
}
