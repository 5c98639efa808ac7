// src/orchestrator/patterns.rs
// Per-(provider, pattern) status table and state machine

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{MemoriError, Result};
use crate::providers::{IntegrationPattern, ProviderKind};

/// Lifecycle of one (provider, pattern) pair:
/// available --setup--> active --teardown--> available, with a failed
/// teardown parking the pair in Failed until an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternState {
    Available,
    Active,
    Failed,
}

impl PatternState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }
}

struct PatternStatus {
    state: PatternState,
    call_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    last_used: Option<DateTime<Utc>>,
}

impl PatternStatus {
    fn new() -> Self {
        Self {
            state: PatternState::Available,
            call_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            last_used: None,
        }
    }
}

type PatternKey = (ProviderKind, IntegrationPattern);

/// Process-wide pattern bookkeeping. One lock guards the map; the
/// counters themselves are atomics so increments never contend with the
/// request path for longer than a map lookup.
#[derive(Default)]
pub struct PatternManager {
    table: Mutex<HashMap<PatternKey, PatternStatus>>,
}

impl PatternManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pair as available. Idempotent.
    pub fn register(&self, provider: ProviderKind, pattern: IntegrationPattern) {
        self.table
            .lock()
            .entry((provider, pattern))
            .or_insert_with(PatternStatus::new);
    }

    /// available -> active. Fails from Failed (reset required) and is a
    /// no-op from Active.
    pub fn activate(&self, provider: ProviderKind, pattern: IntegrationPattern) -> Result<()> {
        let mut table = self.table.lock();
        let status = table
            .entry((provider, pattern))
            .or_insert_with(PatternStatus::new);
        match status.state {
            PatternState::Failed => Err(MemoriError::provider(format!(
                "{}/{} is failed and requires reset",
                provider.as_str(),
                pattern.as_str()
            ))),
            _ => {
                status.state = PatternState::Active;
                debug!("{}/{} active", provider.as_str(), pattern.as_str());
                Ok(())
            }
        }
    }

    /// active -> available on clean teardown, -> failed otherwise.
    pub fn deactivate(
        &self,
        provider: ProviderKind,
        pattern: IntegrationPattern,
        teardown_ok: bool,
    ) {
        let mut table = self.table.lock();
        if let Some(status) = table.get_mut(&(provider, pattern)) {
            status.state = if teardown_ok {
                PatternState::Available
            } else {
                PatternState::Failed
            };
            debug!(
                "{}/{} -> {}",
                provider.as_str(),
                pattern.as_str(),
                status.state.as_str()
            );
        }
    }

    /// Explicit recovery from Failed.
    pub fn reset(&self, provider: ProviderKind, pattern: IntegrationPattern) {
        let mut table = self.table.lock();
        if let Some(status) = table.get_mut(&(provider, pattern)) {
            if status.state == PatternState::Failed {
                status.state = PatternState::Available;
            }
        }
    }

    pub fn state(&self, provider: ProviderKind, pattern: IntegrationPattern) -> Option<PatternState> {
        self.table.lock().get(&(provider, pattern)).map(|s| s.state)
    }

    pub fn active_pairs(&self) -> Vec<PatternKey> {
        self.table
            .lock()
            .iter()
            .filter(|(_, status)| status.state == PatternState::Active)
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn record_call(&self, provider: ProviderKind, pattern: IntegrationPattern) {
        let counter = {
            let mut table = self.table.lock();
            let status = table
                .entry((provider, pattern))
                .or_insert_with(PatternStatus::new);
            status.last_used = Some(Utc::now());
            status.call_count.clone()
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, provider: ProviderKind, pattern: IntegrationPattern) {
        let counter = {
            let mut table = self.table.lock();
            let status = table
                .entry((provider, pattern))
                .or_insert_with(PatternStatus::new);
            status.error_count.clone()
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Value {
        let table = self.table.lock();
        let mut stats = serde_json::Map::new();
        for ((provider, pattern), status) in table.iter() {
            stats.insert(
                format!("{}_{}", provider.as_str(), pattern.as_str()),
                json!({
                    "state": status.state.as_str(),
                    "enabled": status.state == PatternState::Active,
                    "call_count": status.call_count.load(Ordering::Relaxed),
                    "error_count": status.error_count.load(Ordering::Relaxed),
                    "last_used": status.last_used.map(|t| t.to_rfc3339()),
                }),
            );
        }
        Value::Object(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: (ProviderKind, IntegrationPattern) =
        (ProviderKind::OpenAi, IntegrationPattern::AutoIntegration);

    #[test]
    fn lifecycle_available_active_available() {
        let manager = PatternManager::new();
        manager.register(KEY.0, KEY.1);
        assert_eq!(manager.state(KEY.0, KEY.1), Some(PatternState::Available));

        manager.activate(KEY.0, KEY.1).unwrap();
        assert_eq!(manager.state(KEY.0, KEY.1), Some(PatternState::Active));

        manager.deactivate(KEY.0, KEY.1, true);
        assert_eq!(manager.state(KEY.0, KEY.1), Some(PatternState::Available));
    }

    #[test]
    fn failed_teardown_requires_reset() {
        let manager = PatternManager::new();
        manager.register(KEY.0, KEY.1);
        manager.activate(KEY.0, KEY.1).unwrap();
        manager.deactivate(KEY.0, KEY.1, false);
        assert_eq!(manager.state(KEY.0, KEY.1), Some(PatternState::Failed));

        // setup from failed is rejected
        assert!(manager.activate(KEY.0, KEY.1).is_err());

        manager.reset(KEY.0, KEY.1);
        assert_eq!(manager.state(KEY.0, KEY.1), Some(PatternState::Available));
        assert!(manager.activate(KEY.0, KEY.1).is_ok());
    }

    #[test]
    fn counters_accumulate() {
        let manager = PatternManager::new();
        manager.record_call(KEY.0, KEY.1);
        manager.record_call(KEY.0, KEY.1);
        manager.record_error(KEY.0, KEY.1);

        let snapshot = manager.snapshot();
        let entry = &snapshot["openai_auto_integration"];
        assert_eq!(entry["call_count"], 2);
        assert_eq!(entry["error_count"], 1);
        assert!(entry["last_used"].is_string());
    }

    #[test]
    fn active_pairs_lists_only_active() {
        let manager = PatternManager::new();
        manager.register(ProviderKind::OpenAi, IntegrationPattern::AutoIntegration);
        manager.register(ProviderKind::Anthropic, IntegrationPattern::Wrapper);
        manager
            .activate(ProviderKind::Anthropic, IntegrationPattern::Wrapper)
            .unwrap();

        let active = manager.active_pairs();
        assert_eq!(active.len(), 1);
        assert_eq!(
            active[0],
            (ProviderKind::Anthropic, IntegrationPattern::Wrapper)
        );
    }
}
