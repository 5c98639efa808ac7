// tests/promotion_flow_test.rs
// Promotion agent: essential selection, clear-before-insert, conscious ingest

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use memori::promote::ConsciousAgent;
use memori::{CompletionClient, MemoryTier, PromotionConfig};

fn selection_payload(memory_ids: &[String]) -> serde_json::Value {
    let essentials: Vec<serde_json::Value> = memory_ids
        .iter()
        .map(|id| {
            json!({
                "memory_id": id,
                "summary": "essential memory",
                "category": "fact",
                "importance_score": 0.9,
                "frequency_score": 0.8,
                "recency_score": 0.7,
                "relevance_reasoning": "frequently referenced foundational fact",
            })
        })
        .collect();
    json!({
        "essential_memories": essentials,
        "analysis_reasoning": "selected the most foundational memories",
        "total_analyzed": 20,
        "promoted_count": essentials.len(),
    })
}

async fn seed_long_term(store: &Arc<memori::MemoryStore>, count: usize) -> Vec<String> {
    let mut ids = Vec::new();
    for i in 0..count {
        let importance = 0.2 + (i as f64) * 0.04;
        let id = store
            .store_long_term(
                &common::processed(
                    &format!("memory number {} about topic {}", i, i % 5),
                    &format!("memory {}", i),
                    importance.min(1.0),
                ),
                None,
                "default",
            )
            .await
            .expect("seed row");
        ids.push(id);
    }
    ids
}

// ============================================================================
// TEST 1: Full promotion pass
// ============================================================================

#[tokio::test]
async fn promotion_copies_essentials_with_bounded_expiry() {
    let (_dir, store) = common::temp_store().await;
    let ids = seed_long_term(&store, 20).await;

    let client = Arc::new(common::ScriptedClient::new());
    client.push_selection(selection_payload(&ids[..8]));

    let agent = ConsciousAgent::new(
        store.clone(),
        Some(client as Arc<dyn CompletionClient>),
        PromotionConfig::default(),
    );
    let promoted = agent
        .run_promotion_cycle("default")
        .await
        .expect("promotion cycle");
    assert_eq!(promoted, 8);

    let short_rows = store
        .list_recent("default", Some(MemoryTier::ShortTerm), 50)
        .await
        .expect("list short term");
    let essentials: Vec<_> = short_rows
        .iter()
        .filter(|row| row.category_primary.starts_with("essential_"))
        .collect();
    assert_eq!(essentials.len(), 8);
    assert!(essentials.len() <= 10, "at most 10 essential rows");

    let now = Utc::now();
    for row in &essentials {
        let expires = row.expires_at.expect("essential rows expire");
        let delta = expires - now;
        assert!(
            delta > Duration::days(30) - Duration::hours(1)
                && delta < Duration::days(30) + Duration::hours(1),
            "expiry must be 30 days out (within an hour)"
        );

        // provenance stamped into processed data
        let original = row.processed_data["original_memory_id"]
            .as_str()
            .expect("original id recorded");
        assert!(ids.contains(&original.to_string()));
        assert_eq!(row.processed_data["promoted_by"], "promotion_agent");
        assert!(row.processed_data["promotion_reasoning"].is_string());
    }

    // sources are marked as promoted
    for id in &ids[..8] {
        let source = store
            .get_long_term(id)
            .await
            .expect("fetch source")
            .expect("source exists");
        assert!(source.conscious_processed);
    }
}

// ============================================================================
// TEST 2: Clear-before-insert keeps the essential set bounded
// ============================================================================

#[tokio::test]
async fn second_pass_replaces_previous_essentials() {
    let (_dir, store) = common::temp_store().await;
    let ids = seed_long_term(&store, 20).await;

    let client = Arc::new(common::ScriptedClient::new());
    client.push_selection(selection_payload(&ids[..6]));
    client.push_selection(selection_payload(&ids[10..16]));

    let agent = ConsciousAgent::new(
        store.clone(),
        Some(client as Arc<dyn CompletionClient>),
        PromotionConfig::default(),
    );

    agent.run_promotion_cycle("default").await.expect("first pass");
    agent.run_promotion_cycle("default").await.expect("second pass");

    let short_rows = store
        .list_recent("default", Some(MemoryTier::ShortTerm), 50)
        .await
        .expect("list");
    let essentials: Vec<_> = short_rows
        .iter()
        .filter(|row| row.category_primary.starts_with("essential_"))
        .collect();
    assert_eq!(essentials.len(), 6, "previous essentials are cleared first");

    for row in essentials {
        let original = row.processed_data["original_memory_id"].as_str().unwrap();
        assert!(
            ids[10..16].contains(&original.to_string()),
            "only second-pass selections remain"
        );
    }
}

// ============================================================================
// TEST 3: Promotion is copy, not move, and not idempotent
// ============================================================================

#[tokio::test]
async fn promoting_twice_produces_distinct_rows() {
    let (_dir, store) = common::temp_store().await;
    let ids = seed_long_term(&store, 1).await;

    let first = store
        .promote(&ids[0], Duration::days(30), None, None)
        .await
        .expect("first promotion");
    let second = store
        .promote(&ids[0], Duration::days(30), None, None)
        .await
        .expect("second promotion");
    assert_ne!(first, second);

    // the source row still exists in long-term
    assert!(store.get_long_term(&ids[0]).await.expect("fetch").is_some());

    let short_count = store
        .count("default", MemoryTier::ShortTerm)
        .await
        .expect("count");
    assert_eq!(short_count, 2);
}

// ============================================================================
// TEST 4: Conscious ingest is idempotent
// ============================================================================

#[tokio::test]
async fn conscious_ingest_runs_once() {
    let (_dir, store) = common::temp_store().await;

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
        .expect("seed identity row");

    let agent = ConsciousAgent::new(store.clone(), None, PromotionConfig::default());

    let profile = agent
        .run_conscious_ingest("default")
        .await
        .expect("first ingest")
        .expect("profile extracted");
    assert_eq!(profile.name.as_deref(), Some("Alice"));
    assert_eq!(profile.version, 1);

    // second run with no new rows: same single row, version unchanged
    let profile = agent
        .run_conscious_ingest("default")
        .await
        .expect("second ingest")
        .expect("existing profile returned");
    assert_eq!(profile.version, 1);

    let rows = store
        .permanent_context_rows("default")
        .await
        .expect("permanent rows");
    assert_eq!(rows.len(), 1);
}

// ============================================================================
// TEST 5: Insufficient memories skip the cycle
// ============================================================================

#[tokio::test]
async fn promotion_skips_small_namespaces() {
    let (_dir, store) = common::temp_store().await;
    seed_long_term(&store, 3).await;

    let client = Arc::new(common::ScriptedClient::new());
    // no selection scripted: the cycle must bail before calling the LLM
    let agent = ConsciousAgent::new(
        store.clone(),
        Some(client as Arc<dyn CompletionClient>),
        PromotionConfig::default(),
    );

    let promoted = agent
        .run_promotion_cycle("default")
        .await
        .expect("cycle");
    assert_eq!(promoted, 0);
}
