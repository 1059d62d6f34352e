//! Answer orchestration for one retrieval-augmented chat turn.
//!
//! [`answer::Orchestrator`] sequences the completion client, the function
//! dispatch table and the groundedness evaluator, and always produces an
//! [`answer::AnswerResult`].

pub mod answer;
pub mod dispatch;
pub mod groundedness;
pub mod history;
pub mod retrieval;

pub use answer::{AnswerResult, Orchestrator, TokenUsage};
pub use dispatch::{FunctionDispatchTable, FunctionKind};
pub use history::ChatTurn;
