// src/providers/openai.rs
// OpenAI-compatible backend: interception shim, wrapped client, manual parsing

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{MemoriError, Result};
use crate::providers::{
    inject_into_message_array, last_user_message, ChatMessage, CompletionClient,
    CompletionOutcome, IntegrationPattern, InterceptHooks, Provider, ProviderKind,
    ProviderRequest, ProviderResponse,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat-completions backend. Also serves any endpoint
/// speaking the same wire format through `base_url`.
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    /// Armed by setup_auto_integration; completion calls route through the
    /// hooks while set. Teardown restores the direct path.
    shim: RwLock<Option<Arc<dyn InterceptHooks>>>,
}

impl OpenAiBackend {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: DEFAULT_MODEL.to_string(),
            shim: RwLock::new(None),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The completion entry point. With the shim armed this is the
    /// intercepted path: inject, call the original, record. The outbound
    /// call must never be lost because the pipeline failed, so hook
    /// processing happens around (never instead of) the raw call.
    pub async fn chat_completion(&self, body: Value) -> Result<Value> {
        let hooks = self.shim.read().clone();
        let Some(hooks) = hooks else {
            return self.raw_chat_completion(&body).await;
        };

        let request = self.build_request(body, IntegrationPattern::AutoIntegration);
        let request = hooks.before_request(request).await;

        let started = Instant::now();
        let response = self.raw_chat_completion(&request.original_body).await?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut parsed = self.parse_response(&response, &request.original_body);
        parsed.duration_ms = duration_ms;
        if hooks.after_response(parsed, &request).await.is_none() {
            debug!("turn was not recorded");
        }

        Ok(response)
    }

    /// Direct HTTP call, no interception.
    pub async fn raw_chat_completion(&self, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| MemoriError::provider(format!("openai request failed: {}", e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| MemoriError::provider(format!("openai response unreadable: {}", e)))?;

        if !status.is_success() {
            let message = payload["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(MemoriError::provider(format!(
                "openai API error ({}): {}",
                status, message
            )));
        }

        Ok(payload)
    }

    pub fn build_request(&self, body: Value, pattern: IntegrationPattern) -> ProviderRequest {
        let messages: Vec<ChatMessage> = body
            .get("messages")
            .and_then(|m| serde_json::from_value(m.clone()).ok())
            .unwrap_or_default();
        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model)
            .to_string();
        let user_input = Some(last_user_message(&body)).filter(|s| !s.is_empty());

        ProviderRequest {
            messages,
            model,
            provider: ProviderKind::OpenAi,
            pattern,
            metadata: Value::Null,
            original_body: body,
            user_input,
            system_prompt: None,
        }
    }

    /// Wrapper-pattern entry: a drop-in client mirroring the SDK surface.
    pub fn create_wrapped_client(
        backend: Arc<Self>,
        hooks: Arc<dyn InterceptHooks>,
    ) -> OpenAiWrappedClient {
        OpenAiWrappedClient { backend, hooks }
    }

    async fn complete_body(&self, body: Value) -> Result<(Value, i64)> {
        let started = Instant::now();
        let response = self.raw_chat_completion(&body).await?;
        Ok((response, started.elapsed().as_millis() as i64))
    }
}

impl Provider for OpenAiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn setup_auto_integration(&self, hooks: Arc<dyn InterceptHooks>) -> bool {
        *self.shim.write() = Some(hooks);
        debug!("openai auto-integration armed");
        true
    }

    fn teardown_auto_integration(&self) -> bool {
        *self.shim.write() = None;
        debug!("openai auto-integration restored");
        true
    }

    fn is_auto_integration_active(&self) -> bool {
        self.shim.read().is_some()
    }

    fn extract_user_input(&self, body: &Value) -> String {
        last_user_message(body)
    }

    fn inject_context(&self, body: Value, context_prompt: &str) -> Value {
        inject_into_message_array(body, context_prompt)
    }

    fn parse_response(&self, response: &Value, body: &Value) -> ProviderResponse {
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let model = response["model"]
            .as_str()
            .or_else(|| body.get("model").and_then(|m| m.as_str()))
            .unwrap_or(&self.model)
            .to_string();
        let tokens_used = response["usage"]["total_tokens"].as_i64().unwrap_or(0);

        ProviderResponse {
            content,
            model,
            provider: ProviderKind::OpenAi,
            pattern: IntegrationPattern::AutoIntegration,
            metadata: Value::Null,
            original_response: response.clone(),
            tokens_used,
            duration_ms: 0,
        }
    }

    fn parse_manual_response(
        &self,
        response: &Value,
        user_input: &str,
        metadata: Value,
    ) -> ProviderResponse {
        let mut parsed = self.parse_response(response, &Value::Null);
        parsed.pattern = IntegrationPattern::ManualRecording;
        parsed.metadata = json!({
            "user_input": user_input,
            "extra": metadata,
        });
        parsed
    }
}

#[async_trait]
impl CompletionClient for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        system: String,
    ) -> Result<CompletionOutcome> {
        let mut wire_messages = vec![json!({"role": "system", "content": system})];
        for message in &messages {
            wire_messages.push(json!({"role": message.role, "content": message.content}));
        }

        let body = json!({
            "model": self.model,
            "messages": wire_messages,
        });
        let (response, duration_ms) = self.complete_body(body).await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(CompletionOutcome {
            content,
            model: response["model"].as_str().unwrap_or(&self.model).to_string(),
            tokens_used: response["usage"]["total_tokens"].as_i64().unwrap_or(0),
            duration_ms,
            raw: response,
        })
    }

    async fn complete_structured(
        &self,
        messages: Vec<ChatMessage>,
        system: String,
        schema_name: &str,
        schema: Value,
        temperature: f32,
    ) -> Result<Value> {
        let mut wire_messages = vec![json!({"role": "system", "content": system})];
        for message in &messages {
            wire_messages.push(json!({"role": message.role, "content": message.content}));
        }

        let body = json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": temperature,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": schema_name,
                    "schema": schema,
                    "strict": true,
                },
            },
        });
        let (response, _) = self.complete_body(body).await?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MemoriError::provider("structured response had no content"))?;
        serde_json::from_str(content).map_err(|e| {
            warn!("structured output was not valid JSON: {}", e);
            MemoriError::provider(format!("structured output parse failed: {}", e))
        })
    }
}

/// Wrapper-pattern client mirroring the SDK's `client.chat().completions()
/// .create(...)` surface. Every call runs inject-then-record around the
/// real request.
#[derive(Clone)]
pub struct OpenAiWrappedClient {
    backend: Arc<OpenAiBackend>,
    hooks: Arc<dyn InterceptHooks>,
}

impl OpenAiWrappedClient {
    pub fn chat(&self) -> ChatHandle<'_> {
        ChatHandle { client: self }
    }

    /// Escape hatch to the unwrapped backend for surfaces the wrapper does
    /// not mirror.
    pub fn inner(&self) -> &Arc<OpenAiBackend> {
        &self.backend
    }

    async fn create(&self, body: Value) -> Result<Value> {
        let request = self
            .backend
            .build_request(body, IntegrationPattern::Wrapper);
        let request = self.hooks.before_request(request).await;

        let started = Instant::now();
        let response = self
            .backend
            .raw_chat_completion(&request.original_body)
            .await?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut parsed = self.backend.parse_response(&response, &request.original_body);
        parsed.pattern = IntegrationPattern::Wrapper;
        parsed.duration_ms = duration_ms;
        if self.hooks.after_response(parsed, &request).await.is_none() {
            debug!("wrapped call was not recorded");
        }

        Ok(response)
    }
}

pub struct ChatHandle<'a> {
    client: &'a OpenAiWrappedClient,
}

impl ChatHandle<'_> {
    pub fn completions(&self) -> CompletionsHandle<'_> {
        CompletionsHandle {
            client: self.client,
        }
    }
}

pub struct CompletionsHandle<'a> {
    client: &'a OpenAiWrappedClient,
}

impl CompletionsHandle<'_> {
    pub async fn create(&self, body: Value) -> Result<Value> {
        self.client.create(body).await
    }
}

/// Published helper for hosts that built a backend themselves and want the
/// recorded client in its place.
pub fn replace_client(
    backend: Arc<OpenAiBackend>,
    hooks: Arc<dyn InterceptHooks>,
) -> OpenAiWrappedClient {
    OpenAiWrappedClient { backend, hooks }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_requires_a_key() {
        let backend = OpenAiBackend::new("sk-test".to_string(), None);
        assert!(backend.is_available());

        let backend = OpenAiBackend::new(String::new(), None);
        assert!(!backend.is_available());
    }

    #[test]
    fn parse_response_reads_chat_completion_shape() {
        let backend = OpenAiBackend::new("sk-test".to_string(), None);
        let response = json!({
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Hello Alice"}}],
            "usage": {"total_tokens": 42},
        });
        let parsed = backend.parse_response(&response, &Value::Null);
        assert_eq!(parsed.content, "Hello Alice");
        assert_eq!(parsed.tokens_used, 42);
        assert_eq!(parsed.provider, ProviderKind::OpenAi);
    }

    #[test]
    fn build_request_extracts_user_input() {
        let backend = OpenAiBackend::new("sk-test".to_string(), None);
        let body = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "My name is Alice"},
            ],
        });
        let request = backend.build_request(body, IntegrationPattern::AutoIntegration);
        assert_eq!(request.user_input.as_deref(), Some("My name is Alice"));
        assert_eq!(request.model, "gpt-4o");
    }

    #[test]
    fn shim_arms_and_restores() {
        struct NoopHooks;
        #[async_trait]
        impl InterceptHooks for NoopHooks {
            async fn before_request(&self, request: ProviderRequest) -> ProviderRequest {
                request
            }
            async fn after_response(
                &self,
                _response: ProviderResponse,
                _request: &ProviderRequest,
            ) -> Option<String> {
                None
            }
        }

        let backend = OpenAiBackend::new("sk-test".to_string(), None);
        assert!(!backend.is_auto_integration_active());

        assert!(backend.setup_auto_integration(Arc::new(NoopHooks)));
        assert!(backend.is_auto_integration_active());

        assert!(backend.teardown_auto_integration());
        assert!(!backend.is_auto_integration_active());
    }
}
