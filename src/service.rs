use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{ChatBackend, ChatMessage, ChatRequest, DeltaStream, OpenAiBackend};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::Config;
use crate::error::Result;
use crate::health::{HealthProbe, HealthSnapshot};
use crate::normalize::{is_non_translatable, same_language, CacheKey};
use crate::prompt::{PromptGuard, ToolCallCheck};
use crate::queue::{DeferredResult, Priority, WorkQueue, WorkerPool};

/// One entry of a batch, shaped like the `/translate` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub src_lang: String,
    pub tgt_lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

impl TranslationRequest {
    pub fn priority(&self) -> Priority {
        self.priority
            .as_deref()
            .map(Priority::from_str)
            .unwrap_or_default()
    }
}

/// Ties the queue, cache, prompt guard and health probe together. Every
/// translation goes through `submit_translation`.
pub struct TranslationService {
    queue: Arc<WorkQueue>,
    pool: Mutex<Option<WorkerPool>>,
    cache: Arc<ResponseCache>,
    guard: Arc<PromptGuard>,
    backend: Arc<dyn ChatBackend>,
    health: HealthProbe,
    temperature: f32,
    top_p: f32,
}

impl TranslationService {
    /// Build the service against the configured OpenAI-compatible server.
    /// Must be called inside a tokio runtime.
    pub fn start(config: &Config) -> Result<Self> {
        let backend = OpenAiBackend::new(config.backend.clone())?;
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    pub fn with_backend(config: &Config, backend: Arc<dyn ChatBackend>) -> Self {
        let queue = Arc::new(WorkQueue::new());
        let pool = WorkerPool::start(
            queue.clone(),
            config.queue.workers,
            config.queue.poll_interval(),
        );
        info!(
            "Translation service started: {} worker(s), cache {} entries / {:?}",
            config.queue.workers,
            config.cache.max_entries,
            config.cache.ttl()
        );

        Self {
            queue,
            pool: Mutex::new(Some(pool)),
            cache: Arc::new(ResponseCache::new(config.cache.max_entries, config.cache.ttl())),
            guard: Arc::new(PromptGuard::new(backend.clone(), &config.backend)),
            health: HealthProbe::new(backend.clone(), config.health.ttl()),
            backend,
            temperature: config.backend.temperature,
            top_p: config.backend.top_p,
        }
    }

    /// Resolve from a fast path when possible, otherwise enqueue a backend
    /// job whose successful result is written to the cache before any caller
    /// observes it.
    pub fn submit_translation(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
        priority: Priority,
    ) -> DeferredResult {
        let request_id = Uuid::new_v4();

        if same_language(source_language, target_language) {
            debug!("[{}] Same language pair {} -> {}", request_id, source_language, target_language);
            return DeferredResult::resolved(Ok(text.to_string()));
        }

        if is_non_translatable(text) {
            debug!("[{}] Passing through non-translatable text {:?}", request_id, text);
            return DeferredResult::resolved(Ok(text.to_string()));
        }

        let key = CacheKey::new(text, source_language, target_language);
        if let Some(cached) = self.cache.get(&key) {
            debug!("[{}] Cache hit", request_id);
            return DeferredResult::resolved(Ok(cached));
        }

        debug!("[{}] Queueing {} translation {} -> {}", request_id, priority, source_language, target_language);
        let guard = self.guard.clone();
        let job_text = text.to_string();
        let src = source_language.to_string();
        let tgt = target_language.to_string();
        let handle = self.queue.submit(priority, move || async move {
            guard.translate(&job_text, &src, &tgt).await
        });

        let cache = self.cache.clone();
        let original = text.trim().to_string();
        handle.on_complete(move |outcome| match outcome {
            Ok(translation) if ToolCallCheck::inspect(translation).is_tool_call() => {
                debug!("[{}] Reply is still a tool call, not cached", request_id);
            }
            Ok(translation) if !translation.is_empty() && translation.trim() != original => {
                cache.set(key, translation.clone());
            }
            Ok(_) => debug!("[{}] Identity or empty result, not cached", request_id),
            Err(e) => debug!("[{}] Translation failed: {}", request_id, e),
        });

        handle
    }

    pub async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
        priority: Priority,
    ) -> Result<String> {
        self.submit_translation(text, source_language, target_language, priority)
            .wait()
            .await
    }

    /// Submit every item up front, then collect outcomes in input order.
    pub async fn translate_batch(&self, items: &[TranslationRequest]) -> Vec<Result<String>> {
        let handles: Vec<DeferredResult> = items
            .iter()
            .map(|item| self.submit_translation(&item.text, &item.src_lang, &item.tgt_lang, item.priority()))
            .collect();
        join_all(handles.iter().map(DeferredResult::wait)).await
    }

    /// Relay a free-form chat straight to the backend; bypasses the queue.
    pub async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<DeltaStream> {
        let request = ChatRequest {
            messages,
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: None,
            tool_choice: None,
        };
        self.backend.stream(&request).await
    }

    pub async fn health(&self) -> HealthSnapshot {
        self.health.check().await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Stop accepting work, let workers finish their current job and fail
    /// whatever is still queued. Idempotent.
    pub async fn shutdown(&self) {
        let pool = match self.pool.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pool) = pool {
            pool.shutdown().await;
            info!("Translation service stopped");
        }
    }
}
