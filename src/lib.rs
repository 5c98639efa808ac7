// src/lib.rs
// memori - persistent memory layer for LLM-driven agents
//
// Conversational turns are ephemeral by default; this crate captures them,
// classifies them with a schema-locked LLM call, persists them in a
// two-tier store with portable full-text search, and re-injects relevant
// prior context into subsequent LLM calls.

pub mod classify;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod promote;
pub mod providers;
pub mod recall;
pub mod storage;
pub mod store;
pub mod tools;
pub mod types;

// Re-export the public surface
pub use config::{ClassificationConfig, MemoriConfig, PromotionConfig, ProviderCredentials};
pub use error::{MemoriError, Result};
pub use orchestrator::patterns::{PatternManager, PatternState};
pub use orchestrator::Memori;
pub use providers::{
    ChatMessage, CompletionClient, CompletionOutcome, IntegrationPattern, InterceptHooks,
    Provider, ProviderKind, ProviderRegistry, ProviderRequest, ProviderResponse,
};
pub use recall::{RecallEngine, RecallMode};
pub use store::MemoryStore;
pub use tools::MemoryTool;
pub use types::{
    ChatRecord, MemoryCategory, MemoryClassification, MemoryImportance, MemoryRow, MemoryStats,
    MemoryTier, ProcessedMemory, RetrievedMemory, UserContextProfile,
};
