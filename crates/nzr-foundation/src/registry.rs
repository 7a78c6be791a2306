//! ModelRegistry - catalog of named model backends
//!
//! This module provides [`ModelRegistry`], constructed once at process start
//! and shared by cloning:
//! - Type-based construction: backend kinds register a factory under a type
//!   name, models are then added by `(name, type, config)`
//! - Serialized catalog mutations; predictions look the model up under the
//!   lock and run outside it
//! - Health checks with a per-model result cache
//! - Config-driven bulk loading that records failures and keeps going
//!
//! # Example
//!
//! ```rust,no_run
//! use nzr_foundation::registry::ModelRegistry;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = ModelRegistry::default();
//!     let config = json!({"simulation_delay": 0.0}).as_object().cloned().unwrap();
//!     registry.add_model("assistant", "mock", config).await.unwrap();
//!
//!     let payload = json!({"prompt": "hi"}).as_object().cloned().unwrap();
//!     registry.load_model("assistant").await.unwrap();
//!     let result = registry.predict("assistant", &payload, None).await.unwrap();
//!     println!("{}", result["response"]);
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use error_stack::{Report, ResultExt};
use futures::future::join_all;
use nzr_kernel::config::{CatalogConfig, ModelDescriptor, RegistryConfig, load_config};
use nzr_kernel::{
    BackendResult, BackendSpec, Context, McpError, McpResult, ModelBackend, ModelHealth, Payload,
    ReportResult, Request, Response,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::backends::{mock::MockBackend, openai::OpenAiBackend};
use crate::model::{ModelHandle, ModelSummary};

/// Constructor registered for a backend type name.
pub type BackendFactory =
    Arc<dyn Fn(&BackendSpec) -> BackendResult<Arc<dyn ModelBackend>> + Send + Sync>;

/// Outcome of a bulk load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Models that were added and are still registered.
    pub added: Vec<String>,
    /// Subset of `added` that was loaded because of `auto_load`.
    pub loaded: Vec<String>,
    /// `(name, reason)` for every descriptor that failed.
    pub failed: Vec<(String, String)>,
}

impl LoadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Shared inner state for ModelRegistry
struct ModelRegistryInner {
    config: RegistryConfig,
    models: RwLock<HashMap<String, Arc<ModelHandle>>>,
    factories: RwLock<HashMap<String, BackendFactory>>,
    health_cache: Mutex<HashMap<String, ModelHealth>>,
    /// Serializes add/remove/shutdown.
    mutation: tokio::sync::Mutex<()>,
}

/// ModelRegistry - named model catalog
///
/// This type is cheaply cloneable; all clones share the same catalog.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<ModelRegistryInner>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl ModelRegistry {
    /// Create a registry. With `builtin_types` the `mock` and `openai`
    /// backend types are registered immediately.
    pub fn new(config: RegistryConfig) -> Self {
        let registry = Self {
            inner: Arc::new(ModelRegistryInner {
                config,
                models: RwLock::new(HashMap::new()),
                factories: RwLock::new(HashMap::new()),
                health_cache: Mutex::new(HashMap::new()),
                mutation: tokio::sync::Mutex::new(()),
            }),
        };

        if registry.inner.config.builtin_types {
            registry.register_type("mock", MockBackend::factory);
            registry.register_type("openai", OpenAiBackend::factory);
        }
        registry
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Make a backend kind constructible by type name. Re-registering a
    /// type name replaces its factory.
    pub fn register_type<F>(&self, type_name: &str, factory: F)
    where
        F: Fn(&BackendSpec) -> BackendResult<Arc<dyn ModelBackend>> + Send + Sync + 'static,
    {
        let replaced = self
            .inner
            .factories
            .write()
            .insert(type_name.to_string(), Arc::new(factory))
            .is_some();
        if replaced {
            warn!("Replaced factory for model type '{}'", type_name);
        } else {
            info!("Registered model type '{}'", type_name);
        }
    }

    /// Registered type names, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.inner.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Construct and register a model.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if the name is taken (the existing entry is left
    /// untouched), `UnknownType` if the type was never registered, `Backend`
    /// if the factory rejects the config.
    pub async fn add_model(
        &self,
        name: &str,
        model_type: &str,
        config: Payload,
    ) -> McpResult<Arc<ModelHandle>> {
        let _guard = self.inner.mutation.lock().await;

        if self.inner.models.read().contains_key(name) {
            return Err(McpError::DuplicateName(name.to_string()));
        }

        let factory = self.inner.factories.read().get(model_type).cloned();
        let factory = factory.ok_or_else(|| McpError::UnknownType {
            type_name: model_type.to_string(),
            available: self.registered_types(),
        })?;

        let spec = BackendSpec::new(name, model_type, config);
        let handle = factory(&spec)
            .and_then(|backend| ModelHandle::new(&spec, backend))
            .map(Arc::new)
            .map_err(|e| McpError::backend(name, e))?;

        self.inner
            .models
            .write()
            .insert(name.to_string(), Arc::clone(&handle));

        info!(model = %name, model_type = %model_type, "Added model");
        Ok(handle)
    }

    /// Unload (if loaded) and remove a model, dropping its cached health.
    ///
    /// An unload failure is logged; the model is removed regardless.
    pub async fn remove_model(&self, name: &str) -> McpResult<()> {
        let _guard = self.inner.mutation.lock().await;

        let handle = self
            .get_model(name)
            .ok_or_else(|| McpError::ModelNotFound(name.to_string()))?;

        if let Err(e) = handle.unload().await {
            error!(model = %name, "Error unloading model during removal: {}", e);
        }

        self.inner.models.write().remove(name);
        self.inner.health_cache.lock().remove(name);

        info!(model = %name, "Removed model");
        Ok(())
    }

    /// Pure lookup.
    pub fn get_model(&self, name: &str) -> Option<Arc<ModelHandle>> {
        self.inner.models.read().get(name).cloned()
    }

    fn require_model(&self, name: &str) -> McpResult<Arc<ModelHandle>> {
        self.get_model(name)
            .ok_or_else(|| McpError::ModelNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.models.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered model, sorted by name.
    pub fn list_models(&self) -> Vec<ModelSummary> {
        let handles = self.handles();
        let mut summaries: Vec<ModelSummary> = handles.iter().map(|h| h.summary()).collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    fn handles(&self) -> Vec<Arc<ModelHandle>> {
        self.inner.models.read().values().cloned().collect()
    }

    /// Load a registered model.
    pub async fn load_model(&self, name: &str) -> McpResult<()> {
        self.require_model(name)?.load().await
    }

    /// Unload a registered model, keeping it in the catalog.
    pub async fn unload_model(&self, name: &str) -> McpResult<()> {
        self.require_model(name)?.unload().await
    }

    /// Register every descriptor, loading those marked `auto_load`.
    ///
    /// A failing descriptor is recorded in the report and never aborts the
    /// rest. A model whose auto-load fails is removed again.
    pub async fn load_from_config(&self, descriptors: &[ModelDescriptor]) -> LoadReport {
        let mut report = LoadReport::default();
        if descriptors.is_empty() {
            warn!("No models configuration found");
            return report;
        }

        for descriptor in descriptors {
            let name = descriptor.name.as_str();
            let handle = match self
                .add_model(name, &descriptor.model_type, descriptor.config.clone())
                .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    error!(model = %name, "Failed to add model from config: {}", e);
                    report.failed.push((name.to_string(), e.to_string()));
                    continue;
                }
            };

            if descriptor.auto_load {
                if let Err(e) = handle.load().await {
                    error!(model = %name, "Failed to auto-load model: {}", e);
                    if let Err(remove_err) = self.remove_model(name).await {
                        debug!(model = %name, "Cleanup after failed auto-load: {}", remove_err);
                    }
                    report.failed.push((name.to_string(), e.to_string()));
                    continue;
                }
                info!(model = %name, "Auto-loaded model");
                report.loaded.push(name.to_string());
            }
            report.added.push(name.to_string());
        }

        info!(
            added = report.added.len(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Loaded models from config"
        );
        report
    }

    /// [`load_from_config`](Self::load_from_config) for a catalog file in
    /// any format the config loader understands.
    pub async fn load_from_file(&self, path: impl AsRef<Path>) -> ReportResult<LoadReport> {
        let path = path.as_ref();
        let catalog: CatalogConfig = load_config(path)
            .map_err(|e| Report::new(McpError::from(e)))
            .attach(format!("while loading model catalog {}", path.display()))?;

        Ok(self.load_from_config(&catalog.models).await)
    }

    /// Health of every model, reusing cached results younger than
    /// `health_cache_ttl_secs` when `use_cache` is set.
    ///
    /// Never fails; a model whose check cannot run is reported unhealthy.
    pub async fn health_check_all(&self, use_cache: bool) -> BTreeMap<String, ModelHealth> {
        let cache_ttl = Duration::from_secs(self.inner.config.health_cache_ttl_secs);
        let now = Utc::now();
        let mut results = BTreeMap::new();
        let mut stale = Vec::new();

        let handles = self.handles();
        {
            let cache = self.inner.health_cache.lock();
            for handle in handles {
                let cached = cache.get(handle.name()).filter(|health| {
                    use_cache
                        && now
                            .signed_duration_since(health.last_check)
                            .to_std()
                            .is_ok_and(|age| age < cache_ttl)
                });
                match cached {
                    Some(health) => {
                        results.insert(handle.name().to_string(), health.clone());
                    }
                    None => stale.push(handle),
                }
            }
        }

        let fresh = join_all(stale.iter().map(|handle| {
            let handle = Arc::clone(handle);
            async move {
                let name = handle.name().to_string();
                // a panicking probe must not take the whole check down
                match tokio::spawn(async move { handle.health_check().await }).await {
                    Ok(health) => (name, health),
                    Err(e) => {
                        error!(model = %name, "Health check failed: {}", e);
                        let health = ModelHealth::unhealthy(&name, e.to_string());
                        (name, health)
                    }
                }
            }
        }))
        .await;

        for (name, health) in fresh {
            // skip models removed while their check was running
            if self.contains(&name) {
                self.inner.health_cache.lock().insert(name.clone(), health.clone());
            }
            results.insert(name, health);
        }
        results
    }

    /// Predict with a named model.
    ///
    /// The catalog lock is released before the backend runs.
    pub async fn predict(
        &self,
        name: &str,
        payload: &Payload,
        context: Option<&Context>,
    ) -> McpResult<Payload> {
        let handle = self.require_model(name)?;
        handle.predict(payload, context).await
    }

    /// Serve one protocol request, loading the model on demand.
    pub async fn process_request(
        &self,
        request: &Request,
        context: Option<&Context>,
    ) -> McpResult<Response> {
        request.validate()?;
        let model_name = request.model_name.trim();
        let handle = self.require_model(model_name)?;

        let started = Instant::now();
        if !handle.is_loaded() {
            debug!(model = %model_name, "Loading model on demand");
            handle.load().await?;
        }
        let result = handle.predict(&request.payload, context).await?;
        let execution_time = started.elapsed().as_secs_f64();

        let tokens_used = result
            .get("usage")
            .and_then(|usage| usage.get("total_tokens"))
            .and_then(|total| total.as_u64());

        Ok(Response {
            request_id: request.request_id.clone(),
            context_id: request.effective_context_id(),
            model_name: handle.name().to_string(),
            result,
            model_info: Some(handle.info()),
            execution_time: Some(execution_time),
            tokens_used,
            cost: None,
            timestamp: Utc::now(),
        })
    }

    /// Warm up every model. Returns `name -> succeeded`.
    pub async fn warmup_all(&self) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for handle in self.handles() {
            let ok = match handle.warmup().await {
                Ok(()) => true,
                Err(e) => {
                    error!(model = %handle.name(), "Warmup failed: {}", e);
                    false
                }
            };
            results.insert(handle.name().to_string(), ok);
        }
        results
    }

    /// Unload every model and clear the catalog and health cache.
    ///
    /// Errors are logged, never raised.
    pub async fn shutdown(&self) {
        let _guard = self.inner.mutation.lock().await;
        info!("ModelRegistry shutting down...");

        let handles: Vec<Arc<ModelHandle>> = self.inner.models.write().drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = handle.unload().await {
                error!(model = %handle.name(), "Error unloading model: {}", e);
            }
        }
        self.inner.health_cache.lock().clear();

        info!("ModelRegistry shutdown complete");
    }
}
