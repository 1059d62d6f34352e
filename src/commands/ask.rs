use std::env;
use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, ValueEnum};
use owo_colors::{OwoColorize, Stream};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{
    self, DEFAULT_API_VERSION, OrchestratorConfig, ProfileConfig, read_prompt_file,
    resource_endpoint,
};
use crate::llm::azure::{API_KEY_ENV, AzureOpenAiClient, completion_request_json, completions_url};
use crate::llm::functions::{FunctionDeclaration, default_declarations, load_declarations};
use crate::llm::messages::Message;
use crate::llm::provider::FunctionCallMode;
use crate::logging::Verbosity;
use crate::orc::answer::{AnswerResult, Orchestrator};
use crate::orc::dispatch::FunctionDispatchTable;
use crate::orc::groundedness::LlmGroundednessEvaluator;
use crate::orc::history::{ChatTurn, TurnRole, history_to_messages};
use crate::orc::retrieval::HttpRetriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    Text,
    Json,
}

impl OutputMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct AskArgs {
    /// Question appended to the history as the final user turn.
    pub prompt: Option<String>,
    /// JSON array of {"role", "content"} turns.
    #[arg(long, value_name = "FILE")]
    pub history: Option<PathBuf>,
    #[arg(long)]
    pub profile: Option<String>,
    /// Azure OpenAI resource name.
    #[arg(long, conflicts_with = "endpoint")]
    pub resource: Option<String>,
    #[arg(long)]
    pub endpoint: Option<String>,
    #[arg(long)]
    pub deployment: Option<String>,
    #[arg(long)]
    pub api_version: Option<String>,
    #[arg(long)]
    pub retrieval_url: Option<String>,
    /// Per-request timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
    #[arg(long, value_name = "FILE")]
    pub system_prompt: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub groundedness_prompt: Option<PathBuf>,
    #[arg(long, value_name = "FILE")]
    pub functions: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub output: Option<OutputMode>,
    /// Shorthand for --output json.
    #[arg(long)]
    pub json: bool,
    /// Also write the JSON result to this file.
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,
    /// Print the first request instead of sending it.
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub show_usage: bool,
    #[arg(short, long)]
    pub verbose: bool,
    #[arg(short, long)]
    pub quiet: bool,
}

impl AskArgs {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}

#[derive(Debug)]
struct ResolvedAsk {
    config: OrchestratorConfig,
    retrieval_url: Option<String>,
    functions: Vec<FunctionDeclaration>,
    output: OutputMode,
    show_usage: bool,
    history: Vec<ChatTurn>,
}

pub async fn run(args: AskArgs) -> Result<(), String> {
    let resolved = resolve(&args)?;
    let api_key_present = env_value(API_KEY_ENV).is_some();
    debug!(
        endpoint = %resolved.config.endpoint,
        deployment = %resolved.config.deployment,
        api_version = %resolved.config.api_version,
        api_key_present,
        retrieval_url_present = resolved.retrieval_url.is_some(),
        turns = resolved.history.len(),
        "resolved ask configuration"
    );

    if args.dry_run {
        let body = dry_run_json(&resolved, api_key_present);
        let rendered = serde_json::to_string(&body)
            .map_err(|err| format!("Failed to serialize dry-run request: {err}"))?;
        println!("{rendered}");
        if let Some(path) = &args.save {
            save_output(path, &rendered)?;
        }
        if resolved.show_usage && !args.quiet {
            eprintln!("usage: unavailable latency_ms=0 (dry-run)");
        }
        return Ok(());
    }

    let ResolvedAsk {
        config,
        retrieval_url,
        functions,
        output,
        show_usage,
        history,
    } = resolved;

    let retrieval_url = retrieval_url.ok_or_else(|| {
        "No retrieval endpoint provided. Use --retrieval-url or set ORC_RETRIEVAL_URL.".to_string()
    })?;
    let client = Arc::new(AzureOpenAiClient::from_env(&config).map_err(|err| err.to_string())?);

    let mut retriever = HttpRetriever::new(retrieval_url).with_timeout(config.timeout);
    if let Some(key) = env_value("ORC_RETRIEVAL_KEY") {
        retriever = retriever.with_api_key(key);
    }
    let dispatch = FunctionDispatchTable::builder()
        .retrieval(Arc::new(retriever))
        .build();
    let evaluator = Arc::new(LlmGroundednessEvaluator::new(client.clone(), &config));
    let orchestrator =
        Orchestrator::new(config, client, dispatch, evaluator).with_functions(functions);

    let started = Instant::now();
    let result = orchestrator.get_answer(&history).await;
    let latency_ms = started.elapsed().as_millis();

    let json_result = serde_json::to_string(&result)
        .map_err(|err| format!("Failed to serialize answer: {err}"))?;
    match output {
        OutputMode::Json => println!("{json_result}"),
        OutputMode::Text => println!("{}", result.answer),
    }
    if let Some(path) = &args.save {
        save_output(path, &json_result)?;
    }
    if show_usage && !args.quiet {
        eprintln!("{}", usage_line(&result, latency_ms));
    }

    if result.error {
        return Err("The answer could not be generated.".to_string());
    }
    Ok(())
}

fn usage_line(result: &AnswerResult, latency_ms: u128) -> String {
    let score = result
        .groundedness_score
        .map(|score| format!(" groundedness={score}"))
        .unwrap_or_default();
    format!(
        "{} prompt_tokens={} completion_tokens={} latency_ms={latency_ms}{score}",
        "usage:".if_supports_color(Stream::Stderr, |text| text.dimmed()),
        result.prompt_tokens,
        result.completion_tokens,
    )
}

fn dry_run_json(resolved: &ResolvedAsk, api_key_present: bool) -> Value {
    let config = &resolved.config;
    let mut messages = vec![Message::system(config.system_prompt.clone())];
    messages.extend(history_to_messages(&resolved.history));

    let mut request = completion_request_json(
        &messages,
        &resolved.functions,
        FunctionCallMode::Auto,
        config.temperature,
    );
    if let Value::Object(map) = &mut request {
        map.insert(
            "timeout_secs".to_string(),
            json!(config.timeout.map(|timeout| timeout.as_secs())),
        );
    }

    json!({
        "dry_run": true,
        "url": completions_url(&config.endpoint, &config.deployment, &config.api_version),
        "deployment": config.deployment,
        "api_version": config.api_version,
        "api_key_present": api_key_present,
        "retrieval_url": resolved.retrieval_url,
        "groundedness_threshold": config.groundedness_threshold,
        "messages": messages,
        "request": request,
        "output": resolved.output.as_str(),
    })
}

fn resolve(args: &AskArgs) -> Result<ResolvedAsk, String> {
    let profile = match &args.profile {
        Some(name) => config::load_profile(name)?,
        None => ProfileConfig::default(),
    };

    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| args.resource.as_deref().map(resource_endpoint))
        .or_else(|| env_value("AZURE_OPENAI_ENDPOINT"))
        .or_else(|| env_value("AZURE_OPENAI_RESOURCE").map(|resource| resource_endpoint(&resource)))
        .or_else(|| profile.endpoint.clone())
        .or_else(|| profile.resource.as_deref().map(resource_endpoint))
        .ok_or_else(|| {
            "No Azure OpenAI endpoint provided. Use --resource/--endpoint or set AZURE_OPENAI_RESOURCE."
                .to_string()
        })?;

    let deployment = args
        .deployment
        .clone()
        .or_else(|| env_value("AZURE_OPENAI_CHATGPT_DEPLOYMENT"))
        .or_else(|| profile.deployment.clone())
        .ok_or_else(|| {
            "No deployment provided. Use --deployment or set AZURE_OPENAI_CHATGPT_DEPLOYMENT."
                .to_string()
        })?;

    let mut config = OrchestratorConfig::new(endpoint, deployment);
    config.api_version = args
        .api_version
        .clone()
        .or_else(|| env_value("AZURE_OPENAI_API_VERSION"))
        .or_else(|| profile.api_version.clone())
        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
    // Set per deployment profile only, never per call.
    if let Some(threshold) = profile.groundedness_threshold {
        config.groundedness_threshold = threshold;
    }
    config.timeout = resolve_timeout(args.timeout, profile.timeout)?;
    if let Some(path) = args
        .system_prompt
        .as_deref()
        .or(profile.system_prompt_file.as_deref())
    {
        config.system_prompt = read_prompt_file(path)?;
    }
    if let Some(path) = args
        .groundedness_prompt
        .as_deref()
        .or(profile.groundedness_prompt_file.as_deref())
    {
        config.groundedness_prompt = read_prompt_file(path)?;
    }

    let functions = match args.functions.as_deref().or(profile.functions_file.as_deref()) {
        Some(path) => load_declarations(path)?,
        None => default_declarations(),
    };

    let output = if args.json {
        OutputMode::Json
    } else if let Some(output) = args.output {
        output
    } else {
        match profile.output.as_deref() {
            Some("json") => OutputMode::Json,
            _ => OutputMode::Text,
        }
    };

    Ok(ResolvedAsk {
        config,
        retrieval_url: args
            .retrieval_url
            .clone()
            .or_else(|| env_value("ORC_RETRIEVAL_URL"))
            .or_else(|| profile.retrieval_url.clone()),
        functions,
        output,
        show_usage: args.show_usage || profile.show_usage.unwrap_or(false),
        history: read_history(args)?,
    })
}

fn resolve_timeout(cli: Option<u64>, profile: Option<u64>) -> Result<Option<Duration>, String> {
    let env_timeout = match env_value("ORC_TIMEOUT") {
        Some(raw) => Some(raw.parse::<u64>().ok().filter(|secs| *secs > 0).ok_or_else(|| {
            format!("Invalid ORC_TIMEOUT '{raw}'. Expected a positive number of seconds.")
        })?),
        None => None,
    };
    match cli.or(env_timeout).or(profile) {
        Some(0) => Err("Timeout must be greater than zero.".to_string()),
        secs => Ok(secs.map(Duration::from_secs)),
    }
}

fn read_history(args: &AskArgs) -> Result<Vec<ChatTurn>, String> {
    let mut history = if let Some(path) = &args.history {
        let raw = fs::read_to_string(path).map_err(|err| {
            format!("Failed to read history file '{}': {err}", path.display())
        })?;
        parse_history(&raw)
            .map_err(|err| format!("Failed to parse history file '{}': {err}", path.display()))?
    } else if args.prompt.is_none() && !io::stdin().is_terminal() {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .map_err(|err| format!("Failed to read stdin: {err}"))?;
        history_from_stdin(&raw)?
    } else {
        Vec::new()
    };

    if let Some(prompt) = &args.prompt {
        history.push(ChatTurn::user(prompt.clone()));
    }

    match history.last() {
        Some(turn) if turn.role == TurnRole::User => Ok(history),
        Some(_) => Err("The last history turn must come from the user.".to_string()),
        None => Err(
            "No question provided. Pass a prompt, use --history FILE, or pipe input on stdin."
                .to_string(),
        ),
    }
}

fn parse_history(raw: &str) -> Result<Vec<ChatTurn>, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Stdin holds either a JSON history array or a plain-text question.
fn history_from_stdin(raw: &str) -> Result<Vec<ChatTurn>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return parse_history(trimmed).map_err(|err| format!("Failed to parse history from stdin: {err}"));
    }
    Ok(vec![ChatTurn::user(trimmed)])
}

fn save_output(path: &Path, contents: &str) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create output directory '{}': {err}",
                parent.display()
            )
        })?;
    }
    fs::write(path, format!("{contents}\n"))
        .map_err(|err| format!("Failed to write output file '{}': {err}", path.display()))
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
