// src/orchestrator/mod.rs
// The Memori orchestrator: session identity, pattern routing, the record path

pub mod patterns;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::classify::MemoryClassifier;
use crate::config::MemoriConfig;
use crate::error::Result;
use crate::promote::ConsciousAgent;
use crate::providers::{
    AnthropicBackend, GatewayBackend, IntegrationPattern, InterceptHooks, OpenAiBackend,
    OpenAiWrappedClient, ProviderKind, ProviderRegistry, ProviderRequest, ProviderResponse,
};
use crate::providers::anthropic::AnthropicWrappedClient;
use crate::providers::gateway::GatewayWrappedClient;
use crate::recall::RecallEngine;
use crate::storage::DatabaseManager;
use crate::store::MemoryStore;
use crate::types::{ChatRecord, MemoryStats, ProcessedMemory, RetrievedMemory};

use self::patterns::PatternManager;

/// The memory pipeline's front object. The host constructs one, enables
/// it, and either lets auto-integration intercept its LLM calls or uses
/// wrapped clients / manual recording.
pub struct Memori {
    config: MemoriConfig,
    store: Arc<MemoryStore>,
    recall: RecallEngine,
    classifier: Option<MemoryClassifier>,
    conscious: Arc<ConsciousAgent>,
    patterns: PatternManager,
    registry: ProviderRegistry,
    session_id: String,
    enabled: AtomicBool,
    /// Conscious-mode context is injected once per session.
    conscious_context_injected: AtomicBool,
    promotion_worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Weak self-handle so interception hooks can be handed to providers
    /// without the host threading the Arc through every call.
    self_ref: std::sync::Weak<Memori>,
}

impl Memori {
    /// Open storage, discover providers, and assemble the pipeline.
    /// Schema failures surface here; nothing is intercepted until
    /// `enable` is called.
    pub async fn new(config: MemoriConfig) -> Result<Arc<Self>> {
        Self::build(config, None).await
    }

    /// Same assembly, but with a caller-supplied completion backend for
    /// the classification and promotion agents. Hosts with custom LLM
    /// stacks (and the test harness) plug in here.
    pub async fn with_completion_client(
        config: MemoriConfig,
        client: Arc<dyn crate::providers::CompletionClient>,
    ) -> Result<Arc<Self>> {
        Self::build(config, Some(client)).await
    }

    async fn build(
        config: MemoriConfig,
        client_override: Option<Arc<dyn crate::providers::CompletionClient>>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let db = Arc::new(DatabaseManager::open(&config.database_connect).await?);
        let store = Arc::new(MemoryStore::new(db));

        let registry = ProviderRegistry::new();
        registry.discover(&config.providers);

        let completion_client = client_override.or_else(|| registry.completion_client());
        if completion_client.is_none() {
            warn!("no LLM credentials configured; classification will use fallback records");
        }
        let classifier = completion_client
            .clone()
            .map(|client| MemoryClassifier::new(client, config.classification.clone()));
        let conscious = Arc::new(ConsciousAgent::new(
            store.clone(),
            completion_client,
            config.promotion.clone(),
        ));
        let recall = RecallEngine::new(store.clone());

        Ok(Arc::new_cyclic(|weak| Self {
            config,
            store,
            recall,
            classifier,
            conscious,
            patterns: PatternManager::new(),
            registry,
            session_id: uuid::Uuid::new_v4().to_string(),
            enabled: AtomicBool::new(false),
            conscious_context_injected: AtomicBool::new(false),
            promotion_worker: Mutex::new(None),
            self_ref: weak.clone(),
        }))
    }

    fn hooks(&self) -> Option<Arc<dyn InterceptHooks>> {
        self.self_ref
            .upgrade()
            .map(|me| me as Arc<dyn InterceptHooks>)
    }

    // =====================================
    // Lifecycle
    // =====================================

    /// Turn the pipeline on: run conscious ingest if configured, start the
    /// promotion worker, and arm auto-integration on every available
    /// backend.
    pub async fn enable(&self) -> Result<()> {
        self.enabled.store(true, Ordering::SeqCst);

        if self.config.conscious_ingest {
            if let Err(err) = self
                .conscious
                .run_conscious_ingest(&self.config.namespace)
                .await
            {
                warn!("conscious ingest failed: {}", err);
            }
            self.start_promotion_worker();
        }

        let Some(hooks) = self.hooks() else {
            return Ok(());
        };
        for kind in self.registry.available_kinds() {
            let Some(provider) = self.registry.get(kind) else {
                continue;
            };
            self.patterns
                .register(kind, IntegrationPattern::AutoIntegration);
            if provider.setup_auto_integration(hooks.clone()) {
                if let Err(err) = self
                    .patterns
                    .activate(kind, IntegrationPattern::AutoIntegration)
                {
                    warn!("{}", err);
                }
            }
        }

        info!(
            "memori enabled (session {}, namespace {})",
            self.session_id, self.config.namespace
        );
        Ok(())
    }

    /// Drive every active pattern back to available and stop intercepting.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);

        for (kind, pattern) in self.patterns.active_pairs() {
            let teardown_ok = if pattern == IntegrationPattern::AutoIntegration {
                self.registry
                    .get(kind)
                    .map(|provider| provider.teardown_auto_integration())
                    .unwrap_or(true)
            } else {
                true
            };
            self.patterns.deactivate(kind, pattern, teardown_ok);
        }

        if let Some(worker) = self.promotion_worker.lock().take() {
            worker.abort();
        }

        info!("memori disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Status table for hosts: enabled flag, providers, pattern stats.
    pub fn status(&self) -> Value {
        json!({
            "enabled": self.is_enabled(),
            "session_id": self.session_id,
            "namespace": self.config.namespace,
            "conscious_ingest": self.config.conscious_ingest,
            "auto_ingest": self.config.auto_ingest,
            "available_providers": self
                .registry
                .available_kinds()
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>(),
            "pattern_stats": self.patterns.snapshot(),
        })
    }

    // =====================================
    // Recording path
    // =====================================

    /// Classify and persist one conversational turn. The chat row and the
    /// long-term memory row are written before this returns, so retrieval
    /// on the next turn observes them.
    pub async fn record_conversation(
        &self,
        user_input: &str,
        ai_output: &str,
        model: &str,
        metadata: Value,
    ) -> Result<String> {
        let mut metadata = metadata;
        if let Some(user_id) = &self.config.user_id {
            if let Value::Object(map) = &mut metadata {
                map.insert("user_id".to_string(), json!(user_id));
            } else if metadata.is_null() {
                metadata = json!({"user_id": user_id});
            }
        }

        let record = ChatRecord::new(
            user_input.to_string(),
            ai_output.to_string(),
            model.to_string(),
            self.session_id.clone(),
            self.config.namespace.clone(),
        )
        .with_metadata(metadata);

        let chat_id = self.store.store_chat(&record).await?;

        let processed = match &self.classifier {
            Some(classifier) => classifier.classify(user_input, ai_output).await,
            None => ProcessedMemory::fallback(user_input, ai_output, "classifier_unavailable"),
        };
        self.store
            .store_long_term(&processed, Some(&chat_id), &self.config.namespace)
            .await?;

        debug!("recorded conversation {}", chat_id);
        Ok(chat_id)
    }

    /// Manual-recording pattern: parse a raw response with the named
    /// backend and record it. Best-effort; returns the chat id on success.
    pub async fn record(
        &self,
        provider: ProviderKind,
        response: &Value,
        user_input: &str,
        metadata: Value,
    ) -> Option<String> {
        let backend = self.registry.get(provider)?;
        self.patterns
            .register(provider, IntegrationPattern::ManualRecording);
        if let Err(err) = self
            .patterns
            .activate(provider, IntegrationPattern::ManualRecording)
        {
            warn!("{}", err);
        }

        let parsed = backend.parse_manual_response(response, user_input, metadata);
        self.patterns
            .record_call(provider, IntegrationPattern::ManualRecording);

        match self
            .record_conversation(user_input, &parsed.content, &parsed.model, parsed.metadata)
            .await
        {
            Ok(chat_id) => Some(chat_id),
            Err(err) => {
                warn!("manual recording failed: {}", err);
                self.patterns
                    .record_error(provider, IntegrationPattern::ManualRecording);
                None
            }
        }
    }

    // =====================================
    // Retrieval
    // =====================================

    /// Context the next call would receive, in injection order.
    pub async fn retrieve_context(&self, user_input: &str) -> Result<Vec<RetrievedMemory>> {
        if self.config.conscious_ingest && !self.conscious_context_injected.load(Ordering::SeqCst)
        {
            return self.recall.conscious_context(&self.config.namespace).await;
        }
        self.recall
            .auto_context(user_input, &self.config.namespace)
            .await
    }

    pub async fn search_memories(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<RetrievedMemory>> {
        self.store
            .search(query, &self.config.namespace, &[], limit)
            .await
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        self.store.stats(&self.config.namespace).await
    }

    // =====================================
    // Promotion
    // =====================================

    /// Run one promotion pass now. Errors are logged and swallowed; the
    /// recording path never depends on this.
    pub async fn trigger_promotion(&self) -> usize {
        match self
            .conscious
            .run_promotion_cycle(&self.config.namespace)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                warn!("promotion failed: {}", err);
                0
            }
        }
    }

    pub fn start_promotion_worker(&self) {
        let mut worker = self.promotion_worker.lock();
        if worker.is_some() {
            return;
        }
        *worker = Some(
            self.conscious
                .clone()
                .spawn_worker(self.config.namespace.clone()),
        );
        debug!("promotion worker started");
    }

    // =====================================
    // Wrapped clients (wrapper pattern)
    // =====================================

    pub fn create_openai_client(&self) -> Option<OpenAiWrappedClient> {
        let backend = self.registry.openai()?;
        let hooks = self.hooks()?;
        self.patterns
            .register(ProviderKind::OpenAi, IntegrationPattern::Wrapper);
        if let Err(err) = self
            .patterns
            .activate(ProviderKind::OpenAi, IntegrationPattern::Wrapper)
        {
            warn!("{}", err);
        }
        Some(OpenAiBackend::create_wrapped_client(backend, hooks))
    }

    pub fn create_anthropic_client(&self) -> Option<AnthropicWrappedClient> {
        let backend = self.registry.anthropic()?;
        let hooks = self.hooks()?;
        self.patterns
            .register(ProviderKind::Anthropic, IntegrationPattern::Wrapper);
        if let Err(err) = self
            .patterns
            .activate(ProviderKind::Anthropic, IntegrationPattern::Wrapper)
        {
            warn!("{}", err);
        }
        Some(AnthropicBackend::create_wrapped_client(backend, hooks))
    }

    pub fn create_gateway_client(&self) -> Option<GatewayWrappedClient> {
        let backend = self.registry.gateway()?;
        let hooks = self.hooks()?;
        self.patterns
            .register(ProviderKind::Gateway, IntegrationPattern::Wrapper);
        if let Err(err) = self
            .patterns
            .activate(ProviderKind::Gateway, IntegrationPattern::Wrapper)
        {
            warn!("{}", err);
        }
        Some(GatewayBackend::create_wrapped_client(backend, hooks))
    }

    /// Direct access to configured backends, for hosts that assemble
    /// their own wrappers via `providers::openai::replace_client`.
    pub fn openai_backend(&self) -> Option<Arc<OpenAiBackend>> {
        self.registry.openai()
    }

    pub fn anthropic_backend(&self) -> Option<Arc<AnthropicBackend>> {
        self.registry.anthropic()
    }

    pub fn gateway_backend(&self) -> Option<Arc<crate::providers::GatewayBackend>> {
        self.registry.gateway()
    }

    pub fn pattern_manager(&self) -> &PatternManager {
        &self.patterns
    }

    /// The provider registry, for hosts that register backends directly
    /// instead of through credentials.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Build the context prompt for one outbound request, honoring the
    /// one-shot conscious contract.
    async fn context_prompt_for(&self, request: &ProviderRequest) -> String {
        if self.config.conscious_ingest {
            let first_injection = self
                .conscious_context_injected
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok();
            if first_injection {
                match self.recall.conscious_context(&self.config.namespace).await {
                    Ok(context) => {
                        info!(
                            "conscious-ingest: injecting {} memories as initial context",
                            context.len()
                        );
                        return RecallEngine::build_conscious_prompt(&context);
                    }
                    Err(err) => {
                        warn!("conscious context retrieval failed: {}", err);
                        return String::new();
                    }
                }
            }
        }

        if self.config.auto_ingest {
            if let Some(user_input) = &request.user_input {
                match self
                    .recall
                    .auto_context(user_input, &self.config.namespace)
                    .await
                {
                    Ok(context) => {
                        debug!("auto-ingest: injecting {} memories", context.len());
                        return RecallEngine::build_auto_prompt(&context);
                    }
                    Err(err) => {
                        warn!("auto context retrieval failed: {}", err);
                    }
                }
            }
        }

        String::new()
    }
}

/// The interception contract. Reentrant; no lock is held across the
/// outbound LLM call, and every failure leaves the host's request intact.
#[async_trait]
impl InterceptHooks for Memori {
    async fn before_request(&self, request: ProviderRequest) -> ProviderRequest {
        if !self.is_enabled() {
            return request;
        }

        let context_prompt = self.context_prompt_for(&request).await;
        self.patterns.record_call(request.provider, request.pattern);

        if context_prompt.is_empty() {
            return request;
        }

        let Some(provider) = self.registry.get(request.provider) else {
            return request;
        };

        let mut request = request;
        request.original_body = provider.inject_context(
            std::mem::replace(&mut request.original_body, Value::Null),
            &context_prompt,
        );
        request.system_prompt = Some(context_prompt);
        request
    }

    async fn after_response(
        &self,
        response: ProviderResponse,
        request: &ProviderRequest,
    ) -> Option<String> {
        if !self.is_enabled() {
            return None;
        }

        let user_input = request.user_input.clone().unwrap_or_default();
        let metadata = json!({
            "integration": format!(
                "{}_{}",
                response.provider.as_str(),
                response.pattern.as_str()
            ),
            "tokens_used": response.tokens_used,
            "duration_ms": response.duration_ms,
            "auto_recorded": response.pattern != IntegrationPattern::ManualRecording,
        });

        match self
            .record_conversation(&user_input, &response.content, &response.model, metadata)
            .await
        {
            Ok(chat_id) => Some(chat_id),
            Err(err) => {
                warn!("recording failed: {}", err);
                self.patterns
                    .record_error(request.provider, request.pattern);
                None
            }
        }
    }
}
