// src/providers/gateway.rs
// Gateway backend: OpenAI-compatible multi-model router with a native
// success-callback list
//
// Callback-style SDKs do not expose a method to patch; auto-integration
// here registers a success callback that performs recording only, and
// context injection happens by wrapping the public completion entry point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{MemoriError, Result};
use crate::providers::{
    inject_into_message_array, last_user_message, ChatMessage, CompletionClient,
    CompletionOutcome, IntegrationPattern, InterceptHooks, Provider, ProviderKind,
    ProviderRequest, ProviderResponse,
};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A callback fired after every successful completion.
pub type SuccessCallback =
    Arc<dyn Fn(ProviderResponse, ProviderRequest) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct GatewayBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    /// Wraps the public entry point for context injection.
    shim: RwLock<Option<Arc<dyn InterceptHooks>>>,
    /// Native callback list; callbacks only observe, never mutate.
    success_callbacks: Mutex<Vec<(u64, SuccessCallback)>>,
    next_callback_id: AtomicU64,
    /// Id of the callback installed by setup_auto_integration.
    recording_callback: Mutex<Option<u64>>,
}

impl GatewayBackend {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            shim: RwLock::new(None),
            success_callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
            recording_callback: Mutex::new(None),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The public completion entry point. The shim injects context on the
    /// way in; registered success callbacks observe the completed turn.
    pub async fn completion(&self, body: Value) -> Result<Value> {
        let hooks = self.shim.read().clone();
        let request = match hooks {
            Some(hooks) => {
                let request = self.build_request(body, IntegrationPattern::AutoIntegration);
                hooks.before_request(request).await
            }
            None => self.build_request(body, IntegrationPattern::AutoIntegration),
        };

        let started = Instant::now();
        let response = self.raw_completion(&request.original_body).await?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut parsed = self.parse_response(&response, &request.original_body);
        parsed.duration_ms = duration_ms;
        self.fire_success_callbacks(parsed, request).await;

        Ok(response)
    }

    pub async fn raw_completion(&self, body: &Value) -> Result<Value> {
        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| MemoriError::provider(format!("gateway request failed: {}", e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| MemoriError::provider(format!("gateway response unreadable: {}", e)))?;

        if !status.is_success() {
            let message = payload["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(MemoriError::provider(format!(
                "gateway API error ({}): {}",
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
            provider: ProviderKind::Gateway,
            pattern,
            metadata: Value::Null,
            original_body: body,
            user_input,
            system_prompt: None,
        }
    }

    /// Register a success callback. Returns its id for later removal.
    pub fn register_success_callback(&self, callback: SuccessCallback) -> u64 {
        let id = self.next_callback_id.fetch_add(1, Ordering::Relaxed);
        self.success_callbacks.lock().push((id, callback));
        id
    }

    pub fn remove_success_callback(&self, id: u64) {
        self.success_callbacks.lock().retain(|(cb_id, _)| *cb_id != id);
    }

    pub fn callback_count(&self) -> usize {
        self.success_callbacks.lock().len()
    }

    async fn fire_success_callbacks(&self, response: ProviderResponse, request: ProviderRequest) {
        let callbacks: Vec<SuccessCallback> = self
            .success_callbacks
            .lock()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(response.clone(), request.clone()).await;
        }
    }
}

impl GatewayBackend {
    /// Wrapper-pattern entry mirroring the gateway's `completion` surface.
    pub fn create_wrapped_client(
        backend: Arc<Self>,
        hooks: Arc<dyn InterceptHooks>,
    ) -> GatewayWrappedClient {
        GatewayWrappedClient { backend, hooks }
    }
}

/// Wrapper-pattern client for the gateway: inject-then-record around the
/// unwrapped completion entry, independent of the callback list.
#[derive(Clone)]
pub struct GatewayWrappedClient {
    backend: Arc<GatewayBackend>,
    hooks: Arc<dyn InterceptHooks>,
}

impl GatewayWrappedClient {
    pub fn inner(&self) -> &Arc<GatewayBackend> {
        &self.backend
    }

    pub async fn completion(&self, body: Value) -> Result<Value> {
        let request = self
            .backend
            .build_request(body, IntegrationPattern::Wrapper);
        let request = self.hooks.before_request(request).await;

        let started = Instant::now();
        let response = self.backend.raw_completion(&request.original_body).await?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut parsed = self.backend.parse_response(&response, &request.original_body);
        parsed.pattern = IntegrationPattern::Wrapper;
        parsed.duration_ms = duration_ms;
        if self.hooks.after_response(parsed, &request).await.is_none() {
            debug!("wrapped gateway call was not recorded");
        }

        Ok(response)
    }
}

impl Provider for GatewayBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gateway
    }

    fn is_available(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// Auto-integration for a callback-style backend: the shim wraps the
    /// entry point for injection; a success callback performs recording.
    fn setup_auto_integration(&self, hooks: Arc<dyn InterceptHooks>) -> bool {
        if self.recording_callback.lock().is_some() {
            debug!("gateway auto-integration already active");
            return true;
        }

        let recording_hooks = hooks.clone();
        let callback: SuccessCallback = Arc::new(move |response, request| {
            let hooks = recording_hooks.clone();
            Box::pin(async move {
                if hooks.after_response(response, &request).await.is_none() {
                    warn!("gateway callback failed to record turn");
                }
            })
        });

        let id = self.register_success_callback(callback);
        *self.recording_callback.lock() = Some(id);
        *self.shim.write() = Some(hooks);
        debug!("gateway auto-integration armed (callback {})", id);
        true
    }

    fn teardown_auto_integration(&self) -> bool {
        if let Some(id) = self.recording_callback.lock().take() {
            self.remove_success_callback(id);
        }
        *self.shim.write() = None;
        debug!("gateway auto-integration restored");
        true
    }

    fn is_auto_integration_active(&self) -> bool {
        self.recording_callback.lock().is_some()
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
            provider: ProviderKind::Gateway,
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
impl CompletionClient for GatewayBackend {
    fn name(&self) -> &'static str {
        "gateway"
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

        let started = Instant::now();
        let response = self.raw_completion(&body).await?;
        let duration_ms = started.elapsed().as_millis() as i64;

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

        let response = self.raw_completion(&body).await?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| MemoriError::provider("structured response had no content"))?;
        serde_json::from_str(content)
            .map_err(|e| MemoriError::provider(format!("structured output parse failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHooks {
        recorded: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl InterceptHooks for CountingHooks {
        async fn before_request(&self, request: ProviderRequest) -> ProviderRequest {
            request
        }
        async fn after_response(
            &self,
            _response: ProviderResponse,
            _request: &ProviderRequest,
        ) -> Option<String> {
            self.recorded.fetch_add(1, Ordering::SeqCst);
            Some("chat-1".to_string())
        }
    }

    #[tokio::test]
    async fn callbacks_register_and_remove() {
        let backend = GatewayBackend::new("http://localhost:4000".to_string(), None);
        assert_eq!(backend.callback_count(), 0);

        let hooks = Arc::new(CountingHooks {
            recorded: std::sync::atomic::AtomicUsize::new(0),
        });
        assert!(backend.setup_auto_integration(hooks.clone()));
        assert!(backend.is_auto_integration_active());
        assert_eq!(backend.callback_count(), 1);

        // arming twice does not double-register
        assert!(backend.setup_auto_integration(hooks.clone()));
        assert_eq!(backend.callback_count(), 1);

        assert!(backend.teardown_auto_integration());
        assert!(!backend.is_auto_integration_active());
        assert_eq!(backend.callback_count(), 0);
    }

    #[tokio::test]
    async fn success_callbacks_fire_for_recording() {
        let backend = GatewayBackend::new("http://localhost:4000".to_string(), None);
        let hooks = Arc::new(CountingHooks {
            recorded: std::sync::atomic::AtomicUsize::new(0),
        });
        backend.setup_auto_integration(hooks.clone());

        let request = backend.build_request(
            json!({"messages": [{"role": "user", "content": "hi"}]}),
            IntegrationPattern::AutoIntegration,
        );
        let response = backend.parse_response(
            &json!({"choices": [{"message": {"content": "hello"}}]}),
            &Value::Null,
        );
        backend.fire_success_callbacks(response, request).await;
        assert_eq!(hooks.recorded.load(Ordering::SeqCst), 1);
    }
}
