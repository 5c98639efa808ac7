// tests/orchestrator_flow_test.rs
// End-to-end pipeline flows: identity recall, interception, teardown,
// manual recording

mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use memori::providers::OpenAiBackend;
use memori::{
    CompletionClient, IntegrationPattern, InterceptHooks, Memori, MemoriConfig, PatternState,
    Provider, ProviderKind,
};

async fn identity_pipeline(
    dir: &tempfile::TempDir,
    conscious: bool,
    auto: bool,
) -> (Arc<Memori>, Arc<common::ScriptedClient>, Arc<OpenAiBackend>) {
    let client = Arc::new(common::ScriptedClient::new());
    let config = MemoriConfig {
        database_connect: common::temp_db_url(dir),
        conscious_ingest: conscious,
        auto_ingest: auto,
        ..Default::default()
    };
    let memori = Memori::with_completion_client(
        config,
        client.clone() as Arc<dyn CompletionClient>,
    )
    .await
    .expect("construct pipeline");

    let backend = Arc::new(OpenAiBackend::new("sk-test".to_string(), None));
    memori.registry().register_openai(backend.clone());

    (memori, client, backend)
}

// ============================================================================
// TEST 1: Identity recall across turns (conscious ingest)
// ============================================================================

#[tokio::test]
async fn identity_recall_injects_the_user_name() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let (memori, client, backend) = identity_pipeline(&dir, true, false).await;
    memori.enable().await.expect("enable");

    // turn 1: the user introduces themselves; classification is scripted
    client.push_classification(common::classification_payload(
        "My name is Alice and I work at Acme.",
        "User is Alice from Acme.",
        "conscious-info",
        "conscious-info",
        0.95,
        true,
    ));
    memori
        .record_conversation(
            "My name is Alice and I work at Acme.",
            "Nice to meet you, Alice!",
            "gpt-4o",
            Value::Null,
        )
        .await
        .expect("record turn 1");

    // a conscious-info long-term row now exists
    let stats = memori.stats().await.expect("stats");
    assert_eq!(stats.long_term_count, 1);
    assert_eq!(stats.categories.get("conscious-info"), Some(&1));

    // turn 2: the outbound request gets a system block containing "Alice"
    let body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "What is my name?"}],
    });
    let request = backend.build_request(body, IntegrationPattern::AutoIntegration);
    let hooks: Arc<dyn InterceptHooks> = memori.clone();
    let request = hooks.before_request(request).await;

    let messages = request.original_body["messages"].as_array().expect("messages");
    assert_eq!(messages[0]["role"], "system");
    let system_block = messages[0]["content"].as_str().expect("system content");
    assert!(system_block.contains("Alice"), "context must name the user");
    assert!(system_block.contains("AUTHORIZED USER CONTEXT DATA"));

    // conscious context is one-shot per session
    let body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "And my employer?"}],
    });
    let request = backend.build_request(body, IntegrationPattern::AutoIntegration);
    let request = hooks.before_request(request).await;
    let messages = request.original_body["messages"].as_array().expect("messages");
    assert!(
        messages.iter().all(|m| m["role"] != "system"),
        "second call must not re-inject conscious context"
    );
}

// ============================================================================
// TEST 2: Auto-ingest injects topical context
// ============================================================================

#[tokio::test]
async fn auto_ingest_injects_relevant_memories() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let (memori, _client, backend) = identity_pipeline(&dir, false, true).await;
    memori.enable().await.expect("enable");

    memori
        .store()
        .store_long_term(
            &common::processed("Here is a decorator example in Python", "python decorators", 0.8),
            None,
            "default",
        )
        .await
        .expect("seed python memory");
    memori
        .store()
        .store_long_term(
            &common::processed("Slow-roasted tomatoes concentrate flavor", "cooking", 0.8),
            None,
            "default",
        )
        .await
        .expect("seed cooking memory");

    let body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "Show me a decorator example."}],
    });
    let request = backend.build_request(body, IntegrationPattern::AutoIntegration);
    let hooks: Arc<dyn InterceptHooks> = memori.clone();
    let request = hooks.before_request(request).await;

    let system_block = request.original_body["messages"][0]["content"]
        .as_str()
        .expect("injected system message");
    assert!(system_block.contains("Relevant Memory Context"));
    assert!(system_block.contains("decorator"));
    assert!(!system_block.contains("tomatoes"));
}

// ============================================================================
// TEST 3: Response handling records the turn for the next retrieval
// ============================================================================

#[tokio::test]
async fn after_response_persists_the_turn() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let (memori, client, backend) = identity_pipeline(&dir, false, true).await;
    memori.enable().await.expect("enable");

    client.push_classification(common::classification_payload(
        "Remember that my deploy target is Kubernetes.",
        "User deploys to Kubernetes.",
        "fact",
        "contextual",
        0.8,
        false,
    ));

    let body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "Remember that my deploy target is Kubernetes."}],
    });
    let request = backend.build_request(body, IntegrationPattern::AutoIntegration);
    let response = json!({
        "model": "gpt-4o",
        "choices": [{"message": {"role": "assistant", "content": "Noted: Kubernetes."}}],
        "usage": {"total_tokens": 30},
    });
    let parsed = backend.parse_response(&response, &request.original_body);

    let hooks: Arc<dyn InterceptHooks> = memori.clone();
    let chat_id = hooks
        .after_response(parsed, &request)
        .await
        .expect("turn recorded");
    assert!(!chat_id.is_empty());

    // retrieval on the next turn observes the persisted row
    let results = memori
        .search_memories("Kubernetes deploy", 5)
        .await
        .expect("search");
    assert!(!results.is_empty());
    assert!(results[0].searchable_content.contains("Kubernetes"));
}

// ============================================================================
// TEST 4: Interception teardown restores the pre-enable state
// ============================================================================

#[tokio::test]
async fn disable_restores_the_sdk_entry_point() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let (memori, _client, backend) = identity_pipeline(&dir, false, true).await;

    assert!(!backend.is_auto_integration_active(), "inactive before enable");

    memori.enable().await.expect("enable");
    assert!(backend.is_auto_integration_active(), "armed after enable");
    assert_eq!(
        memori
            .pattern_manager()
            .state(ProviderKind::OpenAi, IntegrationPattern::AutoIntegration),
        Some(PatternState::Active)
    );

    memori.disable();
    assert!(
        !backend.is_auto_integration_active(),
        "shim probe matches the pre-enable state"
    );
    assert_eq!(
        memori
            .pattern_manager()
            .state(ProviderKind::OpenAi, IntegrationPattern::AutoIntegration),
        Some(PatternState::Available)
    );

    // while disabled, before_request passes requests through untouched
    let body = json!({
        "model": "gpt-4o",
        "messages": [{"role": "user", "content": "anything"}],
    });
    let request = backend.build_request(body.clone(), IntegrationPattern::AutoIntegration);
    let hooks: Arc<dyn InterceptHooks> = memori.clone();
    let request = hooks.before_request(request).await;
    assert_eq!(request.original_body, body);
}

// ============================================================================
// TEST 5: Manual recording
// ============================================================================

#[tokio::test]
async fn manual_recording_parses_and_persists() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let (memori, client, _backend) = identity_pipeline(&dir, false, false).await;
    memori.enable().await.expect("enable");

    client.push_classification(common::classification_payload(
        "What is Rust's ownership model?",
        "User asked about Rust ownership.",
        "skill",
        "reference",
        0.6,
        false,
    ));

    let response = json!({
        "model": "gpt-4o",
        "choices": [{"message": {"role": "assistant", "content": "Ownership moves values."}}],
        "usage": {"total_tokens": 25},
    });
    let chat_id = memori
        .record(
            ProviderKind::OpenAi,
            &response,
            "What is Rust's ownership model?",
            json!({"source": "manual"}),
        )
        .await
        .expect("manual record succeeds");
    assert!(!chat_id.is_empty());

    let stats = memori.stats().await.expect("stats");
    assert_eq!(stats.chat_count, 1);
    assert_eq!(stats.long_term_count, 1);

    let snapshot = memori.pattern_manager().snapshot();
    assert_eq!(snapshot["openai_manual_recording"]["call_count"], 1);
}

// ============================================================================
// TEST 6: Memory tool and chat history
// ============================================================================

#[tokio::test]
async fn memory_tool_searches_on_behalf_of_the_agent() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let (memori, client, _backend) = identity_pipeline(&dir, false, false).await;
    memori.enable().await.expect("enable");

    client.push_classification(common::classification_payload(
        "I deploy every Friday afternoon.",
        "User deploys on Friday afternoons.",
        "fact",
        "contextual",
        0.7,
        false,
    ));
    memori
        .record_conversation(
            "I deploy every Friday afternoon.",
            "Got it, Friday deploys.",
            "gpt-4o",
            Value::Null,
        )
        .await
        .expect("record turn");

    let tool = memori::MemoryTool::new(memori.clone());
    let output = tool
        .execute(&json!({"query": "Friday deploy"}))
        .await
        .expect("tool execution");
    assert!(output.contains("Friday"));

    let empty = tool.execute(&json!({"query": ""})).await.expect("empty query");
    assert!(empty.contains("specific query"));

    // the recorded turn is visible in chat history, newest first
    let history = memori
        .store()
        .chat_history("default", None, 10)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].user_input, "I deploy every Friday afternoon.");
    assert_eq!(history[0].session_id, memori.session_id());
}

// ============================================================================
// TEST 7: Status surface
// ============================================================================

#[tokio::test]
async fn status_reports_session_and_patterns() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let (memori, _client, _backend) = identity_pipeline(&dir, false, true).await;
    memori.enable().await.expect("enable");

    let status = memori.status();
    assert_eq!(status["enabled"], true);
    assert_eq!(status["namespace"], "default");
    assert!(status["session_id"].as_str().is_some());
    assert!(status["available_providers"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == "openai"));
    assert!(status["pattern_stats"]["openai_auto_integration"]["state"].is_string());
}
