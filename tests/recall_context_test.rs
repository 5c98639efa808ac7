// tests/recall_context_test.rs
// Retrieval engine: topical auto recall, conscious context, prompt assembly

mod common;

use std::sync::Arc;

use memori::{RecallEngine, UserContextProfile};

async fn seed_topics(store: &Arc<memori::MemoryStore>) {
    let python_turns = [
        "Python decorators wrap functions to add behavior",
        "Here is a decorator example using functools wraps",
        "Type hints make Python code easier to maintain",
        "Generators in Python yield values lazily",
        "Virtual environments isolate Python dependencies",
    ];
    let cooking_turns = [
        "Slow-roasted tomatoes concentrate their flavor",
        "Kneading dough develops gluten structure",
        "A sharp knife is safer than a dull one",
        "Resting meat after cooking keeps it juicy",
        "Fresh basil should be added at the end",
    ];

    for content in python_turns {
        store
            .store_long_term(&common::processed(content, "python note", 0.7), None, "default")
            .await
            .expect("insert python turn");
    }
    for content in cooking_turns {
        store
            .store_long_term(&common::processed(content, "cooking note", 0.7), None, "default")
            .await
            .expect("insert cooking turn");
    }
}

// ============================================================================
// TEST 1: Auto retrieval is topical
// ============================================================================

#[tokio::test]
async fn auto_context_prefers_matching_topic() {
    let (_dir, store) = common::temp_store().await;
    seed_topics(&store).await;

    let engine = RecallEngine::new(store.clone());
    let context = engine
        .auto_context("Show me a decorator example.", "default")
        .await
        .expect("auto context");

    assert!(!context.is_empty(), "should retrieve python priors");
    assert!(
        context
            .iter()
            .any(|m| m.searchable_content.to_lowercase().contains("decorator")),
        "at least one python-decorator prior expected"
    );
    let cooking_words = ["tomato", "dough", "knife", "meat", "basil"];
    assert!(
        context.iter().all(|m| {
            let content = m.searchable_content.to_lowercase();
            cooking_words.iter().all(|w| !content.contains(w))
        }),
        "no cooking priors may be injected"
    );
}

// ============================================================================
// TEST 2: Conscious context includes permanent rows and flagged memories
// ============================================================================

#[tokio::test]
async fn conscious_context_collects_identity_rows() {
    let (_dir, store) = common::temp_store().await;

    let profile = UserContextProfile {
        name: Some("Alice".to_string()),
        version: 1,
        ..Default::default()
    };
    store
        .store_user_context(&profile, "default")
        .await
        .expect("store profile");
    store
        .store_long_term(
            &common::conscious_record(
                "My name is Alice and I work at Acme.",
                "User is Alice from Acme.",
            ),
            None,
            "default",
        )
        .await
        .expect("store identity memory");
    store
        .store_long_term(
            &common::processed("Unrelated smalltalk about weather", "weather", 0.2),
            None,
            "default",
        )
        .await
        .expect("store smalltalk");

    let engine = RecallEngine::new(store.clone());
    let context = engine
        .conscious_context("default")
        .await
        .expect("conscious context");

    assert_eq!(context.len(), 2, "profile row plus the identity memory");
    assert!(context.iter().any(|m| m.category_primary == "user_context"));
    assert!(
        context
            .iter()
            .any(|m| m.searchable_content.contains("Alice and I work at Acme")),
        "identity memory must be present"
    );

    let prompt = RecallEngine::build_conscious_prompt(&context);
    assert!(prompt.contains("Alice"));
    assert!(prompt.contains("AUTHORIZED USER CONTEXT DATA"));
}

// ============================================================================
// TEST 3: Ranking honors importance on equal search relevance
// ============================================================================

#[tokio::test]
async fn higher_importance_wins_on_equal_relevance() {
    let (_dir, store) = common::temp_store().await;

    store
        .store_long_term(
            &common::processed("gradient descent minimizes loss", "minor note", 0.1),
            None,
            "default",
        )
        .await
        .expect("insert low importance");
    store
        .store_long_term(
            &common::processed("gradient descent minimizes cost", "major note", 0.95),
            None,
            "default",
        )
        .await
        .expect("insert high importance");

    let results = store
        .search("gradient descent", "default", &[], 5)
        .await
        .expect("search");

    assert_eq!(results.len(), 2);
    assert!(
        results[0].importance_score > results[1].importance_score,
        "composite score should put the important row first"
    );
}

// ============================================================================
// TEST 4: Empty queries fall back to most-recent rows
// ============================================================================

#[tokio::test]
async fn empty_query_returns_recent_rows() {
    let (_dir, store) = common::temp_store().await;
    seed_topics(&store).await;

    let results = store.search("", "default", &[], 6).await.expect("search");
    assert!(!results.is_empty());
    assert!(results
        .iter()
        .all(|r| r.search_strategy == "recent_memories"));
}
