// src/providers/anthropic.rs
// Anthropic backend: separate system parameter, tool-forced structured output

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{MemoriError, Result};
use crate::providers::{
    ChatMessage, CompletionClient, CompletionOutcome, IntegrationPattern, InterceptHooks,
    Provider, ProviderKind, ProviderRequest, ProviderResponse,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i64 = 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Anthropic messages backend. Context lands in the request's top-level
/// `system` parameter rather than the message array.
pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    shim: RwLock<Option<Arc<dyn InterceptHooks>>>,
}

impl AnthropicBackend {
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

    /// The completion entry point; intercepted while the shim is armed.
    pub async fn create_message(&self, body: Value) -> Result<Value> {
        let hooks = self.shim.read().clone();
        let Some(hooks) = hooks else {
            return self.raw_create_message(&body).await;
        };

        let request = self.build_request(body, IntegrationPattern::AutoIntegration);
        let request = hooks.before_request(request).await;

        let started = Instant::now();
        let response = self.raw_create_message(&request.original_body).await?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut parsed = self.parse_response(&response, &request.original_body);
        parsed.duration_ms = duration_ms;
        if hooks.after_response(parsed, &request).await.is_none() {
            debug!("turn was not recorded");
        }

        Ok(response)
    }

    pub async fn raw_create_message(&self, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| MemoriError::provider(format!("anthropic request failed: {}", e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| MemoriError::provider(format!("anthropic response unreadable: {}", e)))?;

        if !status.is_success() {
            let message = payload["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(MemoriError::provider(format!(
                "anthropic API error ({}): {}",
                status, message
            )));
        }

        Ok(payload)
    }

    pub fn build_request(&self, body: Value, pattern: IntegrationPattern) -> ProviderRequest {
        let messages: Vec<ChatMessage> = body
            .get("messages")
            .and_then(|m| m.as_array())
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| ChatMessage {
                        role: m["role"].as_str().unwrap_or_default().to_string(),
                        content: message_text(m),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.model)
            .to_string();
        let user_input = Some(self.extract_user_input(&body)).filter(|s| !s.is_empty());

        ProviderRequest {
            messages,
            model,
            provider: ProviderKind::Anthropic,
            pattern,
            metadata: Value::Null,
            original_body: body,
            user_input,
            system_prompt: None,
        }
    }

    pub fn create_wrapped_client(
        backend: Arc<Self>,
        hooks: Arc<dyn InterceptHooks>,
    ) -> AnthropicWrappedClient {
        AnthropicWrappedClient { backend, hooks }
    }
}

/// Text of one Anthropic message; content may be a plain string or an
/// array of typed blocks.
fn message_text(message: &Value) -> String {
    match &message["content"] {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|block| block["type"].as_str() == Some("text"))
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

impl Provider for AnthropicBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn setup_auto_integration(&self, hooks: Arc<dyn InterceptHooks>) -> bool {
        *self.shim.write() = Some(hooks);
        debug!("anthropic auto-integration armed");
        true
    }

    fn teardown_auto_integration(&self) -> bool {
        *self.shim.write() = None;
        debug!("anthropic auto-integration restored");
        true
    }

    fn is_auto_integration_active(&self) -> bool {
        self.shim.read().is_some()
    }

    fn extract_user_input(&self, body: &Value) -> String {
        body.get("messages")
            .and_then(|m| m.as_array())
            .map(|messages| {
                messages
                    .iter()
                    .rev()
                    .find(|m| m["role"].as_str() == Some("user"))
                    .map(message_text)
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Prepend to or set the separate system parameter.
    fn inject_context(&self, mut body: Value, context_prompt: &str) -> Value {
        let existing = body
            .get("system")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string();
        body["system"] = Value::String(format!("{}{}", context_prompt, existing));
        body
    }

    fn parse_response(&self, response: &Value, body: &Value) -> ProviderResponse {
        let content = response["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block["type"].as_str() == Some("text"))
                    .filter_map(|block| block["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        let model = response["model"]
            .as_str()
            .or_else(|| body.get("model").and_then(|m| m.as_str()))
            .unwrap_or(&self.model)
            .to_string();
        let tokens_used = response["usage"]["input_tokens"].as_i64().unwrap_or(0)
            + response["usage"]["output_tokens"].as_i64().unwrap_or(0);

        ProviderResponse {
            content,
            model,
            provider: ProviderKind::Anthropic,
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
impl CompletionClient for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        system: String,
    ) -> Result<CompletionOutcome> {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        let body = json!({
            "model": self.model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "system": system,
            "messages": wire_messages,
        });

        let started = Instant::now();
        let response = self.raw_create_message(&body).await?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let parsed = self.parse_response(&response, &body);
        Ok(CompletionOutcome {
            content: parsed.content,
            model: parsed.model,
            tokens_used: parsed.tokens_used,
            duration_ms,
            raw: response,
        })
    }

    /// Structured output via a forced tool call: the schema becomes the
    /// tool's input schema and the model must call it.
    async fn complete_structured(
        &self,
        messages: Vec<ChatMessage>,
        system: String,
        schema_name: &str,
        schema: Value,
        temperature: f32,
    ) -> Result<Value> {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        let body = json!({
            "model": self.model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "temperature": temperature,
            "system": system,
            "messages": wire_messages,
            "tools": [{
                "name": schema_name,
                "description": "Emit the structured extraction result.",
                "input_schema": schema,
            }],
            "tool_choice": {"type": "tool", "name": schema_name},
        });

        let response = self.raw_create_message(&body).await?;
        let tool_input = response["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|block| block["type"].as_str() == Some("tool_use"))
                    .map(|block| block["input"].clone())
            })
            .ok_or_else(|| MemoriError::provider("no tool_use block in structured response"))?;
        Ok(tool_input)
    }
}

/// Wrapper-pattern client mirroring `client.messages().create(...)`.
#[derive(Clone)]
pub struct AnthropicWrappedClient {
    backend: Arc<AnthropicBackend>,
    hooks: Arc<dyn InterceptHooks>,
}

impl AnthropicWrappedClient {
    pub fn messages(&self) -> MessagesHandle<'_> {
        MessagesHandle { client: self }
    }

    pub fn inner(&self) -> &Arc<AnthropicBackend> {
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
            .raw_create_message(&request.original_body)
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

pub struct MessagesHandle<'a> {
    client: &'a AnthropicWrappedClient,
}

impl MessagesHandle<'_> {
    pub async fn create(&self, body: Value) -> Result<Value> {
        self.client.create(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_uses_the_system_parameter() {
        let backend = AnthropicBackend::new("key".to_string(), None);
        let body = json!({"model": "claude-3-5-haiku-latest", "messages": []});
        let injected = backend.inject_context(body, "CONTEXT\n");
        assert_eq!(injected["system"], "CONTEXT\n");

        let body = json!({"system": "base", "messages": []});
        let injected = backend.inject_context(body, "CONTEXT\n");
        assert_eq!(injected["system"], "CONTEXT\nbase");
    }

    #[test]
    fn user_input_handles_block_content() {
        let backend = AnthropicBackend::new("key".to_string(), None);
        let body = json!({"messages": [
            {"role": "user", "content": [{"type": "text", "text": "hello"}, {"type": "image"}]},
        ]});
        assert_eq!(backend.extract_user_input(&body), "hello");
    }

    #[test]
    fn parse_response_sums_usage() {
        let backend = AnthropicBackend::new("key".to_string(), None);
        let response = json!({
            "model": "claude-3-5-haiku-latest",
            "content": [{"type": "text", "text": "Hi Alice"}],
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let parsed = backend.parse_response(&response, &Value::Null);
        assert_eq!(parsed.content, "Hi Alice");
        assert_eq!(parsed.tokens_used, 15);
    }
}
