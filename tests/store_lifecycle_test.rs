// tests/store_lifecycle_test.rs
// Store invariants: chat immutability, score bounds, search-after-insert,
// expiration, boundary clamps

mod common;

use chrono::{Duration, Utc};

use memori::{ChatRecord, MemoriError, MemoryTier, ProcessedMemory, UserContextProfile};

// ============================================================================
// TEST 1: Chat records are write-once
// ============================================================================

#[tokio::test]
async fn duplicate_chat_ids_are_rejected() {
    let (_dir, store) = common::temp_store().await;

    let record = ChatRecord::new(
        "hello".to_string(),
        "hi there".to_string(),
        "gpt-4o".to_string(),
        "session-1".to_string(),
        "default".to_string(),
    );
    store.store_chat(&record).await.expect("first insert");

    let err = store.store_chat(&record).await.expect_err("duplicate id");
    assert!(matches!(err, MemoriError::PermanentDatabase(_)));
}

// ============================================================================
// TEST 2: Scores are clamped into [0, 1] on write
// ============================================================================

#[tokio::test]
async fn long_term_scores_are_clamped() {
    let (_dir, store) = common::temp_store().await;

    let mut record = common::processed("score test content", "score test", 0.5);
    record.importance_score = 7.5;
    record.novelty_score = -2.0;

    let memory_id = store
        .store_long_term(&record, None, "default")
        .await
        .expect("insert");
    let stored = store
        .get_long_term(&memory_id)
        .await
        .expect("fetch")
        .expect("present");

    assert!(stored.importance_score >= 0.0 && stored.importance_score <= 1.0);
    let processed: ProcessedMemory =
        serde_json::from_value(stored.processed_data.clone()).expect("processed data parses");
    assert_eq!(processed.importance_score, 1.0);
    assert_eq!(processed.novelty_score, 0.0);
}

// ============================================================================
// TEST 3: Full-text search finds freshly inserted content
// ============================================================================

#[tokio::test]
async fn search_finds_content_immediately_after_insert() {
    let (_dir, store) = common::temp_store().await;

    store
        .store_long_term(
            &common::processed("The quick brown fox", "fox sighting", 0.6),
            None,
            "default",
        )
        .await
        .expect("insert fox");
    store
        .store_long_term(
            &common::processed("Lorem ipsum dolor", "filler", 0.6),
            None,
            "default",
        )
        .await
        .expect("insert filler");

    let results = store
        .search("quick", "default", &[], 10)
        .await
        .expect("search");

    assert!(!results.is_empty(), "search should find the fox row");
    assert!(results[0].searchable_content.contains("quick brown fox"));
    assert!(
        results
            .iter()
            .all(|r| !r.searchable_content.contains("Lorem")),
        "unrelated rows must not match"
    );
}

// ============================================================================
// TEST 4: Expiration and the reaper
// ============================================================================

#[tokio::test]
async fn reap_removes_expired_but_spares_permanent_rows() {
    let (_dir, store) = common::temp_store().await;

    // already expired
    store
        .store_short_term(
            &common::processed("ephemeral note", "ephemeral", 0.4),
            None,
            "default",
            Duration::seconds(-1),
        )
        .await
        .expect("insert expired");

    // permanent context row (never reaped)
    let profile = UserContextProfile {
        name: Some("Alice".to_string()),
        version: 1,
        ..Default::default()
    };
    store
        .store_user_context(&profile, "default")
        .await
        .expect("insert permanent");

    let removed = store.reap("default", Utc::now()).await.expect("reap");
    assert_eq!(removed, 1);

    let remaining = store
        .list_recent("default", Some(MemoryTier::ShortTerm), 10)
        .await
        .expect("list");
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].is_permanent_context);

    // a second reap is a no-op
    let removed = store.reap("default", Utc::now()).await.expect("reap again");
    assert_eq!(removed, 0);
}

// ============================================================================
// TEST 5: Retrieval filters expired short-term rows
// ============================================================================

#[tokio::test]
async fn search_skips_expired_short_term_rows() {
    let (_dir, store) = common::temp_store().await;

    store
        .store_short_term(
            &common::processed("stale kangaroo facts", "stale", 0.9),
            None,
            "default",
            Duration::seconds(-5),
        )
        .await
        .expect("insert expired");
    store
        .store_short_term(
            &common::processed("fresh kangaroo facts", "fresh", 0.9),
            None,
            "default",
            Duration::days(1),
        )
        .await
        .expect("insert fresh");

    let results = store
        .search("kangaroo", "default", &[], 10)
        .await
        .expect("search");

    assert_eq!(results.len(), 1);
    assert!(results[0].searchable_content.contains("fresh"));
}

// ============================================================================
// TEST 6: Boundary behavior
// ============================================================================

#[tokio::test]
async fn oversized_queries_are_rejected() {
    let (_dir, store) = common::temp_store().await;
    let long_query = "x".repeat(10_001);

    let err = store
        .search(&long_query, "default", &[], 5)
        .await
        .expect_err("too long");
    assert!(matches!(err, MemoriError::Validation(_)));
}

#[tokio::test]
async fn oversized_processed_data_is_rejected() {
    let (_dir, store) = common::temp_store().await;
    let record = common::processed(&"x".repeat(1024 * 1024 + 1), "huge", 0.5);

    let err = store
        .store_long_term(&record, None, "default")
        .await
        .expect_err("too large");
    assert!(matches!(err, MemoriError::Validation(_)));
}

#[tokio::test]
async fn injection_queries_surface_security_errors() {
    let (_dir, store) = common::temp_store().await;

    let err = store
        .search("'; DROP TABLE chat_history; --", "default", &[], 5)
        .await
        .expect_err("hostile query");
    assert!(matches!(err, MemoriError::Security(_)));
}

// ============================================================================
// TEST 7: Processed-data round trip
// ============================================================================

#[tokio::test]
async fn processed_record_roundtrips_through_storage() {
    let (_dir, store) = common::temp_store().await;

    let mut record = common::conscious_record(
        "My name is Alice and I work at Acme.",
        "User is Alice from Acme.",
    );
    record
        .entities
        .insert("person".to_string(), vec!["Alice".to_string()]);
    record.keywords = vec!["identity".to_string()];

    let memory_id = store
        .store_long_term(&record, None, "default")
        .await
        .expect("insert");
    let stored = store
        .get_long_term(&memory_id)
        .await
        .expect("fetch")
        .expect("present");

    let roundtripped: ProcessedMemory =
        serde_json::from_value(stored.processed_data.clone()).expect("deserialize");
    assert_eq!(roundtripped, record);
}

// ============================================================================
// TEST 8: Stats and clear
// ============================================================================

#[tokio::test]
async fn stats_reflect_namespace_contents() {
    let (_dir, store) = common::temp_store().await;

    let record = ChatRecord::new(
        "hello".to_string(),
        "hi".to_string(),
        "gpt-4o".to_string(),
        "session-1".to_string(),
        "team-a".to_string(),
    );
    store.store_chat(&record).await.expect("chat");
    store
        .store_long_term(&common::processed("alpha content", "alpha", 0.8), None, "team-a")
        .await
        .expect("long");
    store
        .store_short_term(
            &common::processed("beta content", "beta", 0.4),
            None,
            "team-a",
            Duration::days(1),
        )
        .await
        .expect("short");

    let stats = store.stats("team-a").await.expect("stats");
    assert_eq!(stats.chat_count, 1);
    assert_eq!(stats.long_term_count, 1);
    assert_eq!(stats.short_term_count, 1);
    assert!((stats.average_importance - 0.8).abs() < 1e-9);
    assert_eq!(stats.categories.get("fact"), Some(&2));

    // other namespaces are isolated
    let other = store.stats("team-b").await.expect("stats");
    assert_eq!(other.chat_count, 0);
    assert_eq!(other.long_term_count, 0);

    store.clear("team-a", None).await.expect("clear");
    let cleared = store.stats("team-a").await.expect("stats");
    assert_eq!(cleared.chat_count, 0);
    assert_eq!(cleared.long_term_count, 0);
    assert_eq!(cleared.short_term_count, 0);
}

// ============================================================================
// TEST 9: The permanent user-context row is unique per namespace
// ============================================================================

#[tokio::test]
async fn user_context_upsert_keeps_one_row() {
    let (_dir, store) = common::temp_store().await;

    let mut profile = UserContextProfile {
        name: Some("Alice".to_string()),
        version: 1,
        ..Default::default()
    };
    store
        .store_user_context(&profile, "default")
        .await
        .expect("first upsert");

    profile.location = Some("Berlin".to_string());
    profile.version = 2;
    store
        .store_user_context(&profile, "default")
        .await
        .expect("second upsert");

    let rows = store
        .permanent_context_rows("default")
        .await
        .expect("permanent rows");
    assert_eq!(rows.len(), 1);

    let (_, stored) = store
        .user_context("default")
        .await
        .expect("load")
        .expect("present");
    assert_eq!(stored.version, 2);
    assert_eq!(stored.location.as_deref(), Some("Berlin"));
    assert_eq!(stored.name.as_deref(), Some("Alice"));
}

// ============================================================================
// TEST 10: Deduplication chains identical content and survives cycles
// ============================================================================

#[tokio::test]
async fn duplicate_pass_chains_identical_content() {
    let (_dir, store) = common::temp_store().await;

    let first = store
        .store_long_term(&common::processed("same fact text", "a", 0.5), None, "default")
        .await
        .expect("first");
    let second = store
        .store_long_term(&common::processed("same fact text", "b", 0.5), None, "default")
        .await
        .expect("second");
    let third = store
        .store_long_term(&common::processed("different text entirely", "c", 0.5), None, "default")
        .await
        .expect("third");

    let marked = store.process_duplicates("default").await.expect("dedup pass");
    assert_eq!(marked, 1);

    // both identical rows resolve to the same canonical id
    let canonical_a = store.resolve_duplicate(&first).await.expect("resolve first");
    let canonical_b = store.resolve_duplicate(&second).await.expect("resolve second");
    assert_eq!(canonical_a, canonical_b);
    assert!(canonical_a == first || canonical_a == second);

    // unrelated content stays canonical
    assert_eq!(
        store.resolve_duplicate(&third).await.expect("resolve third"),
        third
    );

    // a second pass has nothing left to mark
    assert_eq!(store.process_duplicates("default").await.expect("repeat"), 0);

    // a manufactured cycle is detected and broken
    store
        .database()
        .pool()
        .execute(
            "UPDATE long_term_memory SET duplicate_of = ? WHERE memory_id = ?",
            &[
                memori::storage::SqlValue::Text(second.clone()),
                memori::storage::SqlValue::Text(first.clone()),
            ],
        )
        .await
        .expect("create cycle");
    store
        .database()
        .pool()
        .execute(
            "UPDATE long_term_memory SET duplicate_of = ? WHERE memory_id = ?",
            &[
                memori::storage::SqlValue::Text(first.clone()),
                memori::storage::SqlValue::Text(second.clone()),
            ],
        )
        .await
        .expect("close cycle");

    let resolved = store.resolve_duplicate(&first).await.expect("cycle resolve");
    assert!(resolved == first || resolved == second);
}

// ============================================================================
// TEST 11: Corrupted profiles are discarded, not propagated
// ============================================================================

#[tokio::test]
async fn corrupted_profile_json_reads_as_absent() {
    let (_dir, store) = common::temp_store().await;

    let profile = UserContextProfile {
        name: Some("Alice".to_string()),
        version: 1,
        ..Default::default()
    };
    store
        .store_user_context(&profile, "default")
        .await
        .expect("upsert");

    // corrupt the profile payload underneath the store
    store
        .database()
        .pool()
        .execute(
            "UPDATE short_term_memory SET processed_data = ? WHERE category_primary = 'user_context'",
            &[memori::storage::SqlValue::Text(
                "{\"profile\": {\"version\": \"not-a-number\"}}".to_string(),
            )],
        )
        .await
        .expect("corrupt row");

    let loaded = store.user_context("default").await.expect("load");
    assert!(loaded.is_none(), "corrupted profile must read as absent");
}
