//! Retrieval-augmented answer orchestration over Azure OpenAI chat completions.

pub mod commands;
pub mod config;
pub mod llm;
pub mod logging;
pub mod orc;
