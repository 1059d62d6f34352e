//! Chat-completions plumbing.
//!
//! Typed protocol messages, function declarations, the retrying Azure OpenAI
//! client, and the backoff policy shared with the groundedness evaluator.

/// Azure OpenAI chat-completions client.
pub mod azure;
/// Function declaration schemas offered to the model.
pub mod functions;
/// Role-tagged protocol messages.
pub mod messages;
/// Provider-agnostic completion contract and errors.
pub mod provider;
/// Randomized exponential backoff.
pub mod retry;
