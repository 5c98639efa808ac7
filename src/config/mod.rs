// src/config/mod.rs
// Configuration record consumed at construction

pub mod helpers;

use serde::{Deserialize, Serialize};

use crate::error::{MemoriError, Result};

/// Classification agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Model used for structured extraction.
    pub model: String,
    /// Kept low for deterministic extraction.
    pub temperature: f32,
    /// Combined user_input + ai_output length above which the transcript is
    /// truncated from the middle before classification.
    pub max_transcript_chars: usize,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_transcript_chars: 16_000,
        }
    }
}

impl ClassificationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: helpers::env_or("MEMORI_CLASSIFIER_MODEL", &defaults.model),
            temperature: helpers::env_parsed_or("MEMORI_CLASSIFIER_TEMPERATURE", defaults.temperature),
            max_transcript_chars: helpers::env_parsed_or(
                "MEMORI_CLASSIFIER_MAX_CHARS",
                defaults.max_transcript_chars,
            ),
        }
    }
}

/// Promotion agent configuration. The cadence is configurable because the
/// 6-hour default is a convention, not a derived number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    pub interval_hours: u64,
    /// Upper bound on essential rows kept per namespace.
    pub max_essential: usize,
    /// Only long-term rows created within this window are considered.
    pub lookback_days: i64,
    /// Essential rows expire after this many days.
    pub essential_ttl_days: i64,
    /// Minimum long-term rows before a promotion cycle runs.
    pub min_memories: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            interval_hours: 6,
            max_essential: 10,
            lookback_days: 30,
            essential_ttl_days: 30,
            min_memories: 10,
        }
    }
}

impl PromotionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval_hours: helpers::env_parsed_or("MEMORI_PROMOTION_INTERVAL_HOURS", defaults.interval_hours),
            max_essential: helpers::env_parsed_or("MEMORI_PROMOTION_MAX_ESSENTIAL", defaults.max_essential),
            lookback_days: helpers::env_parsed_or("MEMORI_PROMOTION_LOOKBACK_DAYS", defaults.lookback_days),
            essential_ttl_days: helpers::env_parsed_or(
                "MEMORI_PROMOTION_ESSENTIAL_TTL_DAYS",
                defaults.essential_ttl_days,
            ),
            min_memories: helpers::env_parsed_or("MEMORI_PROMOTION_MIN_MEMORIES", defaults.min_memories),
        }
    }
}

/// Per-backend credentials and endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub openai_api_key: Option<String>,
    /// Override for OpenAI-compatible endpoints (Azure deployments, proxies).
    pub openai_base_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    /// Gateway backends route many models behind one OpenAI-compatible
    /// endpoint and report completions through a callback list.
    pub gateway_base_url: Option<String>,
    pub gateway_api_key: Option<String>,
}

impl ProviderCredentials {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: helpers::env_opt("OPENAI_API_KEY"),
            openai_base_url: helpers::env_opt("OPENAI_BASE_URL"),
            anthropic_api_key: helpers::env_opt("ANTHROPIC_API_KEY"),
            anthropic_base_url: helpers::env_opt("ANTHROPIC_BASE_URL"),
            gateway_base_url: helpers::env_opt("MEMORI_GATEWAY_BASE_URL"),
            gateway_api_key: helpers::env_opt("MEMORI_GATEWAY_API_KEY"),
        }
    }
}

/// Main configuration record (spec'd external interface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoriConfig {
    /// URL naming the storage engine and target database, e.g.
    /// `sqlite://memori.db`, `postgres://user:pw@host/memori`,
    /// `mysql://user:pw@host/memori`.
    pub database_connect: String,
    /// Schema preset. Only "basic" is defined.
    pub template: String,
    /// Row-level partition key.
    pub namespace: String,
    /// Multiple callers share the namespace.
    pub shared_memory: bool,
    /// One-shot promotion at startup + per-session conscious-mode injection.
    pub conscious_ingest: bool,
    /// Query-driven retrieval on every call.
    pub auto_ingest: bool,
    /// Optional tag written into chat metadata.
    pub user_id: Option<String>,
    pub verbose: bool,
    pub classification: ClassificationConfig,
    pub promotion: PromotionConfig,
    pub providers: ProviderCredentials,
}

impl Default for MemoriConfig {
    fn default() -> Self {
        Self {
            database_connect: "sqlite://memori.db".to_string(),
            template: "basic".to_string(),
            namespace: "default".to_string(),
            shared_memory: false,
            conscious_ingest: false,
            auto_ingest: false,
            user_id: None,
            verbose: false,
            classification: ClassificationConfig::default(),
            promotion: PromotionConfig::default(),
            providers: ProviderCredentials::default(),
        }
    }
}

impl MemoriConfig {
    /// Load from environment, `.env` included.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let defaults = Self::default();
        Self {
            database_connect: helpers::env_or("MEMORI_DATABASE_CONNECT", &defaults.database_connect),
            template: helpers::env_or("MEMORI_TEMPLATE", &defaults.template),
            namespace: helpers::env_or("MEMORI_NAMESPACE", &defaults.namespace),
            shared_memory: helpers::env_bool("MEMORI_SHARED_MEMORY", false),
            conscious_ingest: helpers::env_bool("MEMORI_CONSCIOUS_INGEST", false),
            auto_ingest: helpers::env_bool("MEMORI_AUTO_INGEST", false),
            user_id: helpers::env_opt("MEMORI_USER_ID"),
            verbose: helpers::env_bool("MEMORI_VERBOSE", false),
            classification: ClassificationConfig::from_env(),
            promotion: PromotionConfig::from_env(),
            providers: ProviderCredentials::from_env(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.template != "basic" {
            return Err(MemoriError::configuration(format!(
                "unknown schema template '{}' (only \"basic\" is supported)",
                self.template
            )));
        }
        if self.database_connect.is_empty() {
            return Err(MemoriError::configuration("database_connect is required"));
        }
        if self.classification.temperature > 0.1 {
            return Err(MemoriError::configuration(
                "classification temperature must be <= 0.1 for deterministic extraction",
            ));
        }
        Ok(())
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, url: impl Into<String>) -> Self {
        self.database_connect = url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(MemoriConfig::default().validate().is_ok());
    }

    #[test]
    fn unknown_template_rejected() {
        let config = MemoriConfig {
            template: "graph".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn hot_classifier_rejected() {
        let mut config = MemoriConfig::default();
        config.classification.temperature = 0.7;
        assert!(config.validate().is_err());
    }
}
