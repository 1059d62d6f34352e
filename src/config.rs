use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::llm::retry::RetryPolicy;

pub const DEFAULT_API_VERSION: &str = "2023-06-01-preview";
pub const DEFAULT_GROUNDEDNESS_THRESHOLD: u32 = 3;
/// Sampling temperature for the answer flow. Kept deterministic.
pub const FLOW_TEMPERATURE: f32 = 0.0;

pub const QUESTION_ANSWERING_PROMPT: &str = include_str!("../prompts/question_answering.prompt");
pub const GROUNDEDNESS_PROMPT: &str = include_str!("../prompts/groundedness.prompt");

/// Settings for one answer turn, built once and shared by the clients and
/// the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub temperature: f32,
    pub groundedness_threshold: u32,
    pub system_prompt: String,
    pub groundedness_prompt: String,
    pub completion_retry: RetryPolicy,
    pub groundedness_retry: RetryPolicy,
    pub timeout: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn new(endpoint: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            deployment: deployment.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            temperature: FLOW_TEMPERATURE,
            groundedness_threshold: DEFAULT_GROUNDEDNESS_THRESHOLD,
            system_prompt: QUESTION_ANSWERING_PROMPT.to_string(),
            groundedness_prompt: GROUNDEDNESS_PROMPT.to_string(),
            completion_retry: RetryPolicy::completion(),
            groundedness_retry: RetryPolicy::groundedness(),
            timeout: None,
        }
    }
}

/// Endpoint of an Azure OpenAI resource.
pub fn resource_endpoint(resource: &str) -> String {
    format!("https://{}.openai.azure.com", resource.trim())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub resource: Option<String>,
    pub endpoint: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub retrieval_url: Option<String>,
    pub groundedness_threshold: Option<u32>,
    pub timeout: Option<u64>,
    pub system_prompt_file: Option<PathBuf>,
    pub groundedness_prompt_file: Option<PathBuf>,
    pub functions_file: Option<PathBuf>,
    pub output: Option<String>,
    pub show_usage: Option<bool>,
}

impl ProfileConfig {
    fn validate(&self, name: &str) -> Result<(), String> {
        if let Some(output) = &self.output {
            if output != "text" && output != "json" {
                return Err(format!(
                    "Invalid profile output '{output}' in profile '{name}'. Supported values: text, json."
                ));
            }
        }
        if self.resource.is_some() && self.endpoint.is_some() {
            return Err(format!(
                "Profile '{name}' sets both resource and endpoint; keep only one."
            ));
        }
        if self.timeout == Some(0) {
            return Err(format!("Profile '{name}' timeout must be greater than zero."));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    profiles: Option<HashMap<String, ProfileConfig>>,
}

fn read_config_file(path: &Path) -> Result<HashMap<String, ProfileConfig>, String> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read config file '{}': {err}", path.display()))?;

    let config: ConfigFile = toml::from_str(&raw)
        .map_err(|err| format!("Failed to parse config file '{}': {err}", path.display()))?;

    config.profiles.ok_or_else(|| {
        format!(
            "Config file '{}' does not contain a [profiles] section.",
            path.display()
        )
    })
}

pub fn load_profile(name: &str) -> Result<ProfileConfig, String> {
    load_profile_from(&config_path()?, name)
}

pub fn load_profile_from(path: &Path, name: &str) -> Result<ProfileConfig, String> {
    let profiles = read_config_file(path)?;
    let profile = profiles.get(name).cloned().ok_or_else(|| {
        format!(
            "Profile '{}' not found in config file '{}'.",
            name,
            path.display()
        )
    })?;
    profile.validate(name)?;
    Ok(profile)
}

/// Checks the config file and returns its path.
///
/// With a profile name only that profile must exist; every profile is
/// validated either way.
pub fn validate_config(profile: Option<&str>) -> Result<PathBuf, String> {
    let path = config_path()?;
    validate_config_at(&path, profile)?;
    Ok(path)
}

pub fn validate_config_at(path: &Path, profile: Option<&str>) -> Result<(), String> {
    let profiles = read_config_file(path)?;
    if let Some(name) = profile {
        if !profiles.contains_key(name) {
            return Err(format!(
                "Profile '{}' not found in config file '{}'.",
                name,
                path.display()
            ));
        }
    }

    let mut names: Vec<_> = profiles.keys().collect();
    names.sort();
    for name in names {
        profiles[name].validate(name)?;
    }
    Ok(())
}

/// Reads a prompt template override.
pub fn read_prompt_file(path: &Path) -> Result<String, String> {
    fs::read_to_string(path)
        .map_err(|err| format!("Failed to read prompt file '{}': {err}", path.display()))
}

pub fn config_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var("ORC_CONFIG") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let trimmed = xdg.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed).join("orc").join("config.toml"));
        }
    }

    let home = env::var("HOME").map_err(|_| {
        "Cannot resolve config path: set ORC_CONFIG or HOME/XDG_CONFIG_HOME.".to_string()
    })?;
    Ok(PathBuf::from(home)
        .join(".config")
        .join("orc")
        .join("config.toml"))
}
