// src/providers/mod.rs
// Provider abstraction: one contract, three integration patterns
//
// Every backend satisfies the Provider trait for host-facing integration
// (auto-integration shim, wrapped client, manual recording) and the
// CompletionClient trait for the pipeline's own LLM calls (classification,
// promotion selection).

pub mod anthropic;
pub mod gateway;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ProviderCredentials;
use crate::error::Result;

pub use anthropic::AnthropicBackend;
pub use gateway::GatewayBackend;
pub use openai::{OpenAiBackend, OpenAiWrappedClient};

/// Supported LLM backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gateway,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gateway => "gateway",
        }
    }
}

/// The three ways the pipeline attaches to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationPattern {
    AutoIntegration,
    Wrapper,
    ManualRecording,
}

impl IntegrationPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoIntegration => "auto_integration",
            Self::Wrapper => "wrapper",
            Self::ManualRecording => "manual_recording",
        }
    }
}

/// Simple message format shared across backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Standardized request passing through the interception path. The raw
/// request body travels untouched in `original_body`; context injection is
/// the only mutation the pipeline makes.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub provider: ProviderKind,
    pub pattern: IntegrationPattern,
    pub metadata: Value,
    pub original_body: Value,
    pub user_input: Option<String>,
    pub system_prompt: Option<String>,
}

/// Standardized response out of any backend.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    pub provider: ProviderKind,
    pub pattern: IntegrationPattern,
    pub metadata: Value,
    pub original_response: Value,
    pub tokens_used: i64,
    pub duration_ms: i64,
}

/// The orchestrator's side of the interception contract. Providers call
/// these around every completion; both are best-effort from the host's
/// perspective.
#[async_trait]
pub trait InterceptHooks: Send + Sync {
    /// Inject context into the outbound request. Returns the (possibly
    /// modified) request; implementations must return the input unchanged
    /// on any internal failure.
    async fn before_request(&self, request: ProviderRequest) -> ProviderRequest;

    /// Record the completed turn. Returns the chat id when recording
    /// succeeded.
    async fn after_response(
        &self,
        response: ProviderResponse,
        request: &ProviderRequest,
    ) -> Option<String>;
}

/// Capability set every backend implements.
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Credentials present and endpoint reachable in principle.
    fn is_available(&self) -> bool;

    /// Install the interception shim. Rust cannot swap a method on a
    /// foreign SDK, so the shim arms this backend's own completion entry
    /// point; teardown restores the direct path.
    fn setup_auto_integration(&self, hooks: Arc<dyn InterceptHooks>) -> bool;

    fn teardown_auto_integration(&self) -> bool;

    fn is_auto_integration_active(&self) -> bool;

    /// Pull the latest user message out of a raw request body.
    fn extract_user_input(&self, body: &Value) -> String;

    /// Provider-specific injection point: message-array system prepend or
    /// separate system parameter.
    fn inject_context(&self, body: Value, context_prompt: &str) -> Value;

    /// Parse a raw completion into the standardized record.
    fn parse_response(&self, response: &Value, body: &Value) -> ProviderResponse;

    /// Manual-recording variant: the caller supplies the user input.
    fn parse_manual_response(
        &self,
        response: &Value,
        user_input: &str,
        metadata: Value,
    ) -> ProviderResponse;
}

/// Outcome of one internal completion call.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub content: String,
    pub model: String,
    pub tokens_used: i64,
    pub duration_ms: i64,
    pub raw: Value,
}

/// The pipeline's own LLM face, used by the classification and promotion
/// agents. Structured completion must return JSON conforming to the given
/// schema or an error.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        system: String,
    ) -> Result<CompletionOutcome>;

    async fn complete_structured(
        &self,
        messages: Vec<ChatMessage>,
        system: String,
        schema_name: &str,
        schema: Value,
        temperature: f32,
    ) -> Result<Value>;
}

/// Registry of configured backends, discovered from credentials at
/// enable time. The host owns the lifecycle; there is no module-level
/// singleton.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Mutex<HashMap<ProviderKind, Arc<dyn Provider>>>,
    openai: Mutex<Option<Arc<OpenAiBackend>>>,
    anthropic: Mutex<Option<Arc<AnthropicBackend>>>,
    gateway: Mutex<Option<Arc<GatewayBackend>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every backend the credentials allow.
    pub fn discover(&self, credentials: &ProviderCredentials) {
        if let Some(api_key) = &credentials.openai_api_key {
            let backend = Arc::new(OpenAiBackend::new(
                api_key.clone(),
                credentials.openai_base_url.clone(),
            ));
            self.register_openai(backend);
        }
        if let Some(api_key) = &credentials.anthropic_api_key {
            let backend = Arc::new(AnthropicBackend::new(
                api_key.clone(),
                credentials.anthropic_base_url.clone(),
            ));
            self.register_anthropic(backend);
        }
        if let Some(base_url) = &credentials.gateway_base_url {
            let backend = Arc::new(GatewayBackend::new(
                base_url.clone(),
                credentials.gateway_api_key.clone(),
            ));
            self.register_gateway(backend);
        }
    }

    pub fn register_openai(&self, backend: Arc<OpenAiBackend>) {
        self.providers
            .lock()
            .insert(ProviderKind::OpenAi, backend.clone());
        *self.openai.lock() = Some(backend);
    }

    pub fn register_anthropic(&self, backend: Arc<AnthropicBackend>) {
        self.providers
            .lock()
            .insert(ProviderKind::Anthropic, backend.clone());
        *self.anthropic.lock() = Some(backend);
    }

    pub fn register_gateway(&self, backend: Arc<GatewayBackend>) {
        self.providers
            .lock()
            .insert(ProviderKind::Gateway, backend.clone());
        *self.gateway.lock() = Some(backend);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn Provider>> {
        self.providers.lock().get(&kind).cloned()
    }

    pub fn openai(&self) -> Option<Arc<OpenAiBackend>> {
        self.openai.lock().clone()
    }

    pub fn anthropic(&self) -> Option<Arc<AnthropicBackend>> {
        self.anthropic.lock().clone()
    }

    pub fn gateway(&self) -> Option<Arc<GatewayBackend>> {
        self.gateway.lock().clone()
    }

    pub fn available_kinds(&self) -> Vec<ProviderKind> {
        self.providers
            .lock()
            .iter()
            .filter(|(_, provider)| provider.is_available())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Preferred internal completion client: OpenAI-compatible first,
    /// gateway second, Anthropic last.
    pub fn completion_client(&self) -> Option<Arc<dyn CompletionClient>> {
        if let Some(backend) = self.openai() {
            return Some(backend as Arc<dyn CompletionClient>);
        }
        if let Some(backend) = self.gateway() {
            return Some(backend as Arc<dyn CompletionClient>);
        }
        if let Some(backend) = self.anthropic() {
            return Some(backend as Arc<dyn CompletionClient>);
        }
        None
    }
}

/// Shared helper: prepend context to (or create) the system message inside
/// an OpenAI-shaped message array.
pub(crate) fn inject_into_message_array(mut body: Value, context_prompt: &str) -> Value {
    let messages = body
        .get_mut("messages")
        .and_then(|m| m.as_array_mut());

    let Some(messages) = messages else {
        return body;
    };

    for message in messages.iter_mut() {
        if message.get("role").and_then(|r| r.as_str()) == Some("system") {
            let existing = message
                .get("content")
                .and_then(|c| c.as_str())
                .unwrap_or_default()
                .to_string();
            message["content"] = Value::String(format!("{}{}", context_prompt, existing));
            return body;
        }
    }

    messages.insert(
        0,
        serde_json::json!({"role": "system", "content": context_prompt}),
    );
    body
}

/// Shared helper: last user message in an OpenAI-shaped message array.
pub(crate) fn last_user_message(body: &Value) -> String {
    body.get("messages")
        .and_then(|m| m.as_array())
        .map(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("user"))
                .and_then(|m| m.get("content").and_then(|c| c.as_str()))
                .unwrap_or_default()
                .to_string()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn injection_creates_system_message_when_absent() {
        let body = json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        let injected = inject_into_message_array(body, "CONTEXT\n");
        let messages = injected["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "CONTEXT\n");
        assert_eq!(messages[1]["role"], "user");
    }

    #[test]
    fn injection_prepends_to_existing_system_message() {
        let body = json!({"messages": [
            {"role": "system", "content": "base"},
            {"role": "user", "content": "hi"}
        ]});
        let injected = inject_into_message_array(body, "CONTEXT\n");
        assert_eq!(injected["messages"][0]["content"], "CONTEXT\nbase");
    }

    #[test]
    fn last_user_message_scans_backwards() {
        let body = json!({"messages": [
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "reply"},
            {"role": "user", "content": "second"}
        ]});
        assert_eq!(last_user_message(&body), "second");
    }

    #[test]
    fn registry_discovers_from_credentials() {
        let registry = ProviderRegistry::new();
        let creds = ProviderCredentials {
            openai_api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        registry.discover(&creds);
        assert!(registry.get(ProviderKind::OpenAi).is_some());
        assert!(registry.get(ProviderKind::Anthropic).is_none());
        assert!(registry.completion_client().is_some());
    }
}
