use std::sync::Arc;

use orc::config::OrchestratorConfig;
use orc::llm::azure::AzureOpenAiClient;
use orc::llm::functions::default_declarations;
use orc::llm::messages::Message;
use orc::llm::provider::{CompletionClient, CompletionError, FunctionCallMode};
use orc::llm::retry::RetryPolicy;
use orc::orc::answer::Orchestrator;
use orc::orc::dispatch::FunctionDispatchTable;
use orc::orc::groundedness::{
    GroundednessError, GroundednessEvaluator, LlmGroundednessEvaluator,
};
use orc::orc::history::ChatTurn;
use orc::orc::retrieval::{HttpRetriever, RetrievalArgs, RetrievalError, Retriever};
use reqwest::StatusCode;
use serde_json::{Value, json};
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, method, path, query_param,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMPLETIONS_PATH: &str = "/openai/deployments/chat/chat/completions";
const API_KEY: &str = "test-azure-key";

fn config(server: &MockServer) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new(server.uri(), "chat");
    config.system_prompt = "You answer questions about company policies.".to_string();
    config.completion_retry = RetryPolicy::immediate(3);
    config.groundedness_retry = RetryPolicy::immediate(2);
    config
}

fn text_completion(content: &str, prompt_tokens: u64, completion_tokens: u64) -> Value {
    json!({
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens
        }
    })
}

fn function_call_completion(arguments: &str) -> Value {
    json!({
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "function_call": {"name": "get_sources", "arguments": arguments}
            },
            "finish_reason": "function_call"
        }],
        "usage": {"prompt_tokens": 100, "completion_tokens": 12, "total_tokens": 112}
    })
}

#[tokio::test]
async fn completion_request_carries_key_version_and_functions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(query_param("api-version", "2023-06-01-preview"))
        .and(header("api-key", API_KEY))
        .and(body_partial_json(json!({
            "messages": [{"role": "user", "content": "What is policy X?"}],
            "functions": [{"name": "get_sources"}],
            "function_call": "auto",
            "temperature": 0.0
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(function_call_completion(r#"{"question":"policy X"}"#)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config(&server), API_KEY);
    let completion = client
        .complete(
            &[Message::user("What is policy X?")],
            &default_declarations(),
            FunctionCallMode::Auto,
        )
        .await
        .expect("completion should succeed");

    let call = completion
        .message
        .function_call
        .expect("reply should be a function call");
    assert_eq!(call.name, "get_sources");
    assert_eq!(call.arguments, r#"{"question":"policy X"}"#);
    assert_eq!(completion.message.content, None);
    assert_eq!((completion.prompt_tokens, completion.completion_tokens), (100, 12));
}

#[tokio::test]
async fn missing_usage_counts_as_zero_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}]
        })))
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config(&server), API_KEY);
    let completion = client
        .complete(&[Message::user("Hi")], &[], FunctionCallMode::None)
        .await
        .expect("completion should succeed");

    assert_eq!(completion.message.content.as_deref(), Some("Hello!"));
    assert_eq!((completion.prompt_tokens, completion.completion_tokens), (0, 0));
}

#[tokio::test]
async fn server_errors_are_retried_until_attempts_run_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config(&server), API_KEY);
    let err = client
        .complete(&[Message::user("Hi")], &[], FunctionCallMode::None)
        .await
        .expect_err("every attempt fails");

    assert!(matches!(
        err,
        CompletionError::Api { status, ref body } if status == StatusCode::SERVICE_UNAVAILABLE && body == "overloaded"
    ));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config(&server), API_KEY);
    let err = client
        .complete(&[Message::user("Hi")], &[], FunctionCallMode::None)
        .await
        .expect_err("401 is permanent");

    assert!(matches!(err, CompletionError::Api { status, .. } if status == StatusCode::UNAUTHORIZED));
}

#[tokio::test]
async fn transient_failure_recovers_on_a_later_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("Hello!", 5, 2)))
        .expect(1)
        .mount(&server)
        .await;

    let client = AzureOpenAiClient::new(&config(&server), API_KEY);
    let completion = client
        .complete(&[Message::user("Hi")], &[], FunctionCallMode::None)
        .await
        .expect("third attempt should succeed");

    assert_eq!(completion.message.content.as_deref(), Some("Hello!"));
}

#[tokio::test]
async fn http_retriever_posts_arguments_and_reads_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/retrieval"))
        .and(header("api-key", "retrieval-key"))
        .and(body_partial_json(json!({"question": "What is policy X?", "top": 3})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": "Policy X text"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut args = RetrievalArgs::new("What is policy X?");
    args.extra.insert("top".to_string(), json!(3));
    let retriever = HttpRetriever::new(format!("{}/api/retrieval", server.uri()))
        .with_api_key("retrieval-key");

    let result = retriever.retrieve(&args).await.expect("retrieval should succeed");
    assert_eq!(result, "Policy X text");
}

#[tokio::test]
async fn http_retriever_reports_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/retrieval"))
        .respond_with(ResponseTemplate::new(500).set_body_string("index offline"))
        .mount(&server)
        .await;

    let retriever = HttpRetriever::new(format!("{}/api/retrieval", server.uri()));
    let err = retriever
        .retrieve(&RetrievalArgs::new("q"))
        .await
        .expect_err("server error should fail");

    assert!(matches!(err, RetrievalError::Api { ref body, .. } if body == "index offline"));
}

#[tokio::test]
async fn evaluator_renders_prompt_without_functions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(body_string_contains("Policy X text"))
        .and(body_string_contains("Approval is required."))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_completion(" 4\n", 50, 1)))
        .expect(1)
        .mount(&server)
        .await;

    let config = config(&server);
    let client = Arc::new(AzureOpenAiClient::new(&config, API_KEY));
    let evaluator = LlmGroundednessEvaluator::new(client, &config);

    let reply = evaluator
        .score("Approval is required.", "Policy X text")
        .await
        .expect("scoring should succeed");
    assert_eq!(reply, "4");

    let requests = server.received_requests().await.expect("recording is on");
    let body: Value = serde_json::from_slice(&requests[0].body).expect("request body is JSON");
    assert!(body.get("functions").is_none());
    assert!(body.get("function_call").is_none());
}

/// Mounts retrieval plus both completion rounds of a `get_sources` turn.
async fn mount_rag_round(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/retrieval"))
        .and(body_partial_json(json!({"question": "What is policy X?"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": "Policy X requires prior approval."})),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(body_partial_json(json!({"function_call": "auto"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(function_call_completion(r#"{"question":"What is policy X?"}"#)),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .and(body_partial_json(json!({"function_call": "none"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(text_completion("You need approval before travelling.", 240, 30)),
        )
        .expect(1)
        .mount(server)
        .await;
}

fn http_orchestrator(server: &MockServer, config: OrchestratorConfig) -> Orchestrator {
    let client = Arc::new(AzureOpenAiClient::new(&config, API_KEY));
    let retriever = Arc::new(HttpRetriever::new(format!("{}/api/retrieval", server.uri())));
    let dispatch = FunctionDispatchTable::builder().retrieval(retriever).build();
    let evaluator = Arc::new(LlmGroundednessEvaluator::new(client.clone(), &config));
    Orchestrator::new(config, client, dispatch, evaluator)
}

#[tokio::test]
async fn evaluator_retries_rate_limits_under_its_own_policy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("4", 50, 1)))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.completion_retry = RetryPolicy::immediate(1);
    config.groundedness_retry = RetryPolicy::immediate(4);
    let client = Arc::new(AzureOpenAiClient::new(&config, API_KEY));
    let evaluator = LlmGroundednessEvaluator::new(client, &config);

    let reply = evaluator
        .score("Approval is required.", "Policy X text")
        .await
        .expect("second attempt should succeed");

    assert_eq!(reply, "4");
    let requests = server.received_requests().await.expect("recording is on");
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn evaluator_gives_up_after_its_attempt_ceiling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(4)
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.completion_retry = RetryPolicy::immediate(1);
    config.groundedness_retry = RetryPolicy::immediate(4);
    let client = Arc::new(AzureOpenAiClient::new(&config, API_KEY));
    let evaluator = LlmGroundednessEvaluator::new(client, &config);

    let err = evaluator
        .score("Approval is required.", "Policy X text")
        .await
        .expect_err("every attempt fails");

    assert!(matches!(
        err,
        GroundednessError::Completion(CompletionError::Api { status, .. })
            if status == StatusCode::SERVICE_UNAVAILABLE
    ));
}

#[tokio::test]
async fn full_turn_over_http_reports_grounded_answer() {
    let server = MockServer::start().await;
    mount_rag_round(&server).await;
    // Scoring requests carry no function_call field.
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("5", 60, 1)))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = http_orchestrator(&server, config(&server));
    let result = orchestrator
        .get_answer(&[ChatTurn::user("What is policy X?")])
        .await;

    assert!(!result.error, "unexpected failure: {}", result.answer);
    assert_eq!(result.answer, "You need approval before travelling.");
    assert_eq!(result.search_query.as_deref(), Some("What is policy X?"));
    assert_eq!(result.sources.as_deref(), Some("Policy X requires prior approval."));
    assert_eq!(result.groundedness_score, Some(5));
    assert_eq!((result.prompt_tokens, result.completion_tokens), (340, 42));
}

#[tokio::test]
async fn exhausted_scoring_keeps_answer_without_score() {
    let server = MockServer::start().await;
    mount_rag_round(&server).await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(2)
        .mount(&server)
        .await;

    let orchestrator = http_orchestrator(&server, config(&server));
    let result = orchestrator
        .get_answer(&[ChatTurn::user("What is policy X?")])
        .await;

    assert!(!result.error, "unexpected failure: {}", result.answer);
    assert_eq!(result.answer, "You need approval before travelling.");
    assert_eq!(result.groundedness_score, None);
    assert_eq!(result.sources.as_deref(), Some("Policy X requires prior approval."));
    assert_eq!((result.prompt_tokens, result.completion_tokens), (340, 42));
}
