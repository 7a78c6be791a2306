//! ContextStore - bounded, expiring conversational state
//!
//! This module provides [`ContextStore`], the owner of every [`Context`]:
//! - Capacity-bounded creation: a full store sweeps expired entries first and
//!   then evicts the context with the oldest `created_at`
//! - Self-healing reads: an expired context is deleted the moment it is looked up
//! - Message history capped at `max_message_history`, keeping the first message
//! - A background sweep that deletes expired contexts every `cleanup_interval_secs`
//! - Plain snapshot export/import for backup or cross-process transfer
//!
//! # Example
//!
//! ```rust,no_run
//! use nzr_foundation::context_store::ContextStore;
//! use nzr_kernel::config::ContextConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = ContextStore::new(ContextConfig::default());
//!     store.start();
//!
//!     store.create_context("session-1", None, Some(600)).unwrap();
//!     store.add_message("session-1", "user", "hello", None);
//!
//!     store.stop().await;
//! }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use nzr_kernel::config::ContextConfig;
use nzr_kernel::{Context, ContextSummary, McpError, McpResult, Message, Payload};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Partial update applied by [`ContextStore::update_context`].
///
/// `metadata` and `state` are merged key by key into the existing maps;
/// `ttl` replaces the current TTL when set (`Some(None)` removes it).
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub metadata: Option<Payload>,
    pub state: Option<Payload>,
    pub ttl: Option<Option<u64>>,
}

impl ContextUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_state(mut self, state: Payload) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_ttl(mut self, ttl: Option<u64>) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Statistics about the context store
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextStoreStats {
    pub contexts_created: u64,
    pub contexts_accessed: u64,
    /// Contexts removed because their TTL elapsed.
    pub contexts_expired: u64,
    /// Contexts removed by capacity eviction or `clear_all`.
    pub contexts_cleaned: u64,
    pub active_contexts: usize,
    /// Effective capacity; a configured 0 counts as 1.
    pub max_contexts: usize,
    pub default_ttl: Option<u64>,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: u64,
    accessed: u64,
    expired: u64,
    cleaned: u64,
}

/// Map and counters share one lock.
#[derive(Debug, Default)]
struct StoreState {
    contexts: HashMap<String, Context>,
    counters: Counters,
}

impl StoreState {
    /// Remove every expired context. Returns how many were removed.
    fn sweep_expired(&mut self) -> usize {
        let now = Utc::now();
        let before = self.contexts.len();
        self.contexts.retain(|_, ctx| !ctx.is_expired_at(now));
        let removed = before - self.contexts.len();
        self.counters.expired += removed as u64;
        removed
    }

    /// Make room for one more context. Creation-order eviction, not LRU.
    fn ensure_capacity(&mut self, max_contexts: usize) {
        if self.contexts.len() < max_contexts {
            return;
        }

        let expired = self.sweep_expired();
        if expired > 0 {
            debug!(expired, "Swept expired contexts at capacity");
        }

        while self.contexts.len() >= max_contexts {
            let oldest = self
                .contexts
                .values()
                .min_by_key(|ctx| ctx.created_at)
                .map(|ctx| ctx.context_id.clone());

            match oldest {
                Some(id) => {
                    self.contexts.remove(&id);
                    self.counters.cleaned += 1;
                    info!(context_id = %id, "Evicting oldest context due to capacity");
                }
                None => break,
            }
        }
    }

    /// Live context lookup; an expired entry is removed on the spot.
    fn live_mut(&mut self, context_id: &str) -> Option<&mut Context> {
        let expired = self.contexts.get(context_id)?.is_expired();
        if expired {
            self.contexts.remove(context_id);
            self.counters.expired += 1;
            debug!(context_id = %context_id, "Context expired on access");
            return None;
        }
        self.contexts.get_mut(context_id)
    }
}

struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Shared inner state for ContextStore
struct ContextStoreInner {
    config: ContextConfig,
    state: Mutex<StoreState>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ContextStoreInner {
    fn max_contexts(&self) -> usize {
        self.config.max_contexts.max(1)
    }
}

impl Drop for ContextStoreInner {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.token.cancel();
        }
    }
}

/// ContextStore - owner of all conversational state
///
/// This type is cheaply cloneable; all clones share the same underlying map.
/// Every operation takes a single store-wide lock for the duration of a map
/// lookup or iteration.
#[derive(Clone)]
pub struct ContextStore {
    inner: Arc<ContextStoreInner>,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl ContextStore {
    /// Create a new ContextStore with the given configuration
    pub fn new(config: ContextConfig) -> Self {
        Self {
            inner: Arc::new(ContextStoreInner {
                config,
                state: Mutex::new(StoreState::default()),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    /// Start the background expiry sweep. Must be called within a Tokio runtime.
    pub fn start(&self) {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            warn!("ContextStore is already running");
            return;
        }

        let interval = Duration::from_secs(self.inner.config.cleanup_interval_secs.max(1));
        let token = CancellationToken::new();
        let handle = tokio::spawn(Self::sweep_loop(
            Arc::downgrade(&self.inner),
            token.clone(),
            interval,
        ));
        *sweeper = Some(Sweeper { token, handle });

        info!(
            "ContextStore started with config: max_contexts={}, cleanup_interval={}s",
            self.inner.config.max_contexts,
            interval.as_secs()
        );
    }

    /// Stop the background sweep and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let sweeper = self.inner.sweeper.lock().take();
        let Some(Sweeper { token, handle }) = sweeper else {
            return;
        };

        token.cancel();
        if let Err(e) = handle.await {
            warn!("Context sweep task ended abnormally: {}", e);
        }
        info!("ContextStore stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.sweeper.lock().is_some()
    }

    /// Create a new context
    ///
    /// Without an explicit `ttl` the configured `default_ttl` applies.
    ///
    /// # Errors
    ///
    /// `DuplicateName` when a context with this id is already stored.
    pub fn create_context(
        &self,
        context_id: &str,
        metadata: Option<Payload>,
        ttl: Option<u64>,
    ) -> McpResult<Context> {
        let mut state = self.inner.state.lock();
        if state.contexts.contains_key(context_id) {
            return Err(McpError::DuplicateName(context_id.to_string()));
        }

        state.ensure_capacity(self.inner.max_contexts());

        let context = Context::new(context_id, ttl.or(self.inner.config.default_ttl))
            .with_metadata(metadata.unwrap_or_default());
        state.contexts.insert(context_id.to_string(), context.clone());
        state.counters.created += 1;

        debug!(context_id = %context_id, ttl = ?context.ttl, "Created context");
        Ok(context)
    }

    /// Get a snapshot of a live context; absent if missing or expired.
    pub fn get_context(&self, context_id: &str) -> Option<Context> {
        let mut state = self.inner.state.lock();
        let context = state.live_mut(context_id)?.clone();
        state.counters.accessed += 1;
        Some(context)
    }

    /// Like [`get_context`](Self::get_context) but reports absence as an error.
    pub fn require_context(&self, context_id: &str) -> McpResult<Context> {
        self.get_context(context_id)
            .ok_or_else(|| McpError::ContextNotFound(context_id.to_string()))
    }

    /// Merge an update into a live context. Returns the updated snapshot.
    pub fn update_context(&self, context_id: &str, update: ContextUpdate) -> Option<Context> {
        let mut state = self.inner.state.lock();
        let context = state.live_mut(context_id)?;

        if let Some(metadata) = update.metadata {
            context.metadata.extend(metadata);
        }
        if let Some(values) = update.state {
            context.state.extend(values);
        }
        if let Some(ttl) = update.ttl {
            context.ttl = ttl;
        }
        context.touch();

        Some(context.clone())
    }

    /// Set one state key. `false` if the context is absent or expired.
    pub fn update_state(&self, context_id: &str, key: &str, value: Value) -> bool {
        let mut state = self.inner.state.lock();
        match state.live_mut(context_id) {
            Some(context) => {
                context.update_state(key, value);
                true
            }
            None => false,
        }
    }

    /// Append a message, trimming history to `max_message_history`.
    ///
    /// `false` if the context is absent or expired; nothing is created.
    pub fn add_message(
        &self,
        context_id: &str,
        role: &str,
        content: &str,
        metadata: Option<Payload>,
    ) -> bool {
        let max_history = self.inner.config.max_message_history;
        let mut state = self.inner.state.lock();
        let Some(context) = state.live_mut(context_id) else {
            return false;
        };

        context.add_message(Message::new(role, content).with_metadata(metadata.unwrap_or_default()));
        let dropped = context.trim_messages(max_history);
        if dropped > 0 {
            debug!(context_id = %context_id, dropped, "Trimmed message history");
        }
        true
    }

    pub fn delete_context(&self, context_id: &str) -> bool {
        self.inner.state.lock().contexts.remove(context_id).is_some()
    }

    /// Remove every context. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let mut state = self.inner.state.lock();
        let count = state.contexts.len();
        state.contexts.clear();
        state.counters.cleaned += count as u64;
        info!(count, "Cleared all contexts");
        count
    }

    /// Summaries of stored contexts, oldest first.
    ///
    /// With `filter_expired`, expired entries are deleted as a side effect and
    /// left out of the result.
    pub fn list_contexts(&self, filter_expired: bool) -> Vec<ContextSummary> {
        let mut state = self.inner.state.lock();
        if filter_expired {
            state.sweep_expired();
        }

        let mut summaries: Vec<ContextSummary> =
            state.contexts.values().map(Context::summary).collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.context_id.cmp(&b.context_id))
        });
        summaries
    }

    /// Sweep expired contexts now. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        self.inner.state.lock().sweep_expired()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ContextStoreStats {
        let state = self.inner.state.lock();
        ContextStoreStats {
            contexts_created: state.counters.created,
            contexts_accessed: state.counters.accessed,
            contexts_expired: state.counters.expired,
            contexts_cleaned: state.counters.cleaned,
            active_contexts: state.contexts.len(),
            max_contexts: self.inner.max_contexts(),
            default_ttl: self.inner.config.default_ttl,
            cleanup_interval_secs: self.inner.config.cleanup_interval_secs,
        }
    }

    /// Snapshot of a live context for backup or transfer.
    pub fn export(&self, context_id: &str) -> Option<Context> {
        self.get_context(context_id)
    }

    /// [`export`](Self::export) as a plain JSON map.
    pub fn export_value(&self, context_id: &str) -> McpResult<Option<Value>> {
        self.export(context_id)
            .map(serde_json::to_value)
            .transpose()
            .map_err(McpError::from)
    }

    /// Store a snapshot, overwriting any context with the same id.
    ///
    /// A snapshot for a new id is subject to the same capacity rule as
    /// [`create_context`](Self::create_context).
    pub fn import(&self, context: Context) -> Context {
        let mut state = self.inner.state.lock();
        if !state.contexts.contains_key(&context.context_id) {
            state.ensure_capacity(self.inner.max_contexts());
        }
        state
            .contexts
            .insert(context.context_id.clone(), context.clone());

        debug!(context_id = %context.context_id, "Imported context");
        context
    }

    /// [`import`](Self::import) from a plain JSON map.
    pub fn import_value(&self, snapshot: Value) -> McpResult<Context> {
        let context: Context = serde_json::from_value(snapshot)?;
        Ok(self.import(context))
    }

    async fn sweep_loop(inner: Weak<ContextStoreInner>, token: CancellationToken, interval: Duration) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Context sweep task shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    let removed = inner.state.lock().sweep_expired();
                    if removed > 0 {
                        info!(removed, "Cleaned up expired contexts");
                    }
                }
            }
        }
    }
}
