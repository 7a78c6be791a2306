//! ModelHandle - lifecycle, statistics and health of one registered backend
//!
//! The registry owns exactly one handle per model name. The handle wraps the
//! backend trait object and keeps the bookkeeping every backend shares: the
//! loaded flag, request and error counters, execution timings, the last error
//! and the most recent health classification.
//!
//! Synthetic traffic (health probes and warmups) goes straight to the backend
//! and is not counted in the request statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nzr_kernel::{
    BackendError, BackendResult, BackendSpec, Context, HealthStatus, McpError, McpResult, ModelBackend,
    ModelHealth, ModelInfo, Payload,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// More errors than this marks a model degraded regardless of its success rate.
const DEGRADED_ERROR_COUNT: u64 = 10;
/// A success rate below this percentage marks a model degraded.
const DEGRADED_SUCCESS_RATE: f64 = 90.0;

/// Performance statistics snapshot of a model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub name: String,
    pub version: String,
    pub provider: String,
    pub loaded: bool,
    pub request_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub avg_execution_time: f64,
    pub last_execution_time: Option<f64>,
    pub total_execution_time: f64,
    pub last_error: Option<String>,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
}

/// Listing entry produced by the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub model_type: String,
    pub loaded: bool,
    pub health_status: HealthStatus,
    pub info: ModelInfo,
}

#[derive(Debug, Default)]
struct Counters {
    request_count: u64,
    error_count: u64,
    total_execution_time: f64,
    last_execution_time: Option<f64>,
    last_error: Option<String>,
    health_status: HealthStatus,
    last_health_check: Option<DateTime<Utc>>,
}

impl Counters {
    /// `(requests - errors) / requests * 100`, or 100 before the first request.
    fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 100.0;
        }
        let ok = self.request_count.saturating_sub(self.error_count);
        (ok as f64 / self.request_count as f64) * 100.0
    }

    fn avg_execution_time(&self) -> f64 {
        self.total_execution_time / self.request_count.max(1) as f64
    }

    fn is_degraded(&self) -> bool {
        self.error_count > DEGRADED_ERROR_COUNT || self.success_rate() < DEGRADED_SUCCESS_RATE
    }
}

fn parse_timeout(value: &Value) -> BackendResult<Duration> {
    let secs = value
        .as_f64()
        .filter(|secs| *secs > 0.0)
        .ok_or_else(|| BackendError::Configuration("'timeout_secs' must be a positive number".into()))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| BackendError::Configuration(format!("'timeout_secs' is out of range: {e}")))
}

/// A registered model: backend plus shared bookkeeping
pub struct ModelHandle {
    name: String,
    model_type: String,
    version: String,
    provider: String,
    timeout: Option<Duration>,
    backend: Arc<dyn ModelBackend>,
    loaded: AtomicBool,
    counters: Mutex<Counters>,
    /// Serializes load/unload transitions.
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("model_type", &self.model_type)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl ModelHandle {
    /// Wrap a freshly constructed backend.
    ///
    /// `version`, `provider` and the optional `timeout_secs` bound on a single
    /// prediction are read from the model config.
    ///
    /// # Errors
    ///
    /// `Configuration` when `timeout_secs` is not a positive number of
    /// seconds representable as a [`Duration`].
    pub fn new(spec: &BackendSpec, backend: Arc<dyn ModelBackend>) -> BackendResult<Self> {
        let timeout = match spec.config.get("timeout_secs") {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_timeout(value)?),
        };

        Ok(Self {
            name: spec.name.clone(),
            model_type: spec.model_type.clone(),
            version: spec.version().to_string(),
            provider: spec.provider().to_string(),
            timeout,
            backend,
            loaded: AtomicBool::new(false),
            counters: Mutex::new(Counters::default()),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    /// Backend description completed with the handle's identity fields.
    pub fn info(&self) -> ModelInfo {
        let mut info = self.backend.describe();
        info.entry("name".into()).or_insert_with(|| self.name.clone());
        info.entry("version".into()).or_insert_with(|| self.version.clone());
        info.entry("provider".into()).or_insert_with(|| self.provider.clone());
        info.entry("type".into()).or_insert_with(|| self.model_type.clone());
        info
    }

    /// Load the backend. A no-op when already loaded; on failure the model
    /// stays unloaded.
    pub async fn load(&self) -> McpResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.is_loaded() {
            return Ok(());
        }

        let started = Instant::now();
        self.backend
            .load()
            .await
            .map_err(|e| McpError::backend(&self.name, e))?;
        self.loaded.store(true, Ordering::SeqCst);

        info!(
            model = %self.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Loaded model"
        );
        Ok(())
    }

    /// Release the backend's runtime state. The model is marked unloaded
    /// even when the backend reports an error.
    pub async fn unload(&self) -> McpResult<()> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_loaded() {
            return Ok(());
        }

        self.loaded.store(false, Ordering::SeqCst);
        self.backend
            .unload()
            .await
            .map_err(|e| McpError::backend(&self.name, e))?;

        info!(model = %self.name, "Unloaded model");
        Ok(())
    }

    /// Run one prediction and record its outcome.
    ///
    /// # Errors
    ///
    /// `NotLoaded` before a successful [`load`](Self::load); `Backend` when the
    /// backend fails or exceeds the configured timeout.
    pub async fn predict(&self, payload: &Payload, context: Option<&Context>) -> McpResult<Payload> {
        if !self.is_loaded() {
            return Err(McpError::NotLoaded(self.name.clone()));
        }

        let started = Instant::now();
        let outcome = self.call_backend(payload, context).await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut counters = self.counters.lock();
        counters.request_count += 1;
        match outcome {
            Ok(result) => {
                counters.last_execution_time = Some(elapsed);
                counters.total_execution_time += elapsed;
                debug!(model = %self.name, elapsed, "Prediction completed");
                Ok(result)
            }
            Err(e) => {
                counters.error_count += 1;
                counters.last_error = Some(e.to_string());
                drop(counters);
                warn!(model = %self.name, error = %e, "Prediction failed");
                Err(McpError::backend(&self.name, e))
            }
        }
    }

    async fn call_backend(&self, payload: &Payload, context: Option<&Context>) -> Result<Payload, BackendError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.predict(payload, context))
                .await
                .unwrap_or_else(|_| Err(BackendError::Timeout(limit.as_secs_f64()))),
            None => self.backend.predict(payload, context).await,
        }
    }

    /// Probe the backend and classify its health.
    ///
    /// Never fails: a probe error is reported as `unhealthy`. Classification
    /// in priority order: not loaded is `offline`; more than 10 errors or a
    /// success rate under 90% is `degraded`; a failed probe is `unhealthy`;
    /// anything else is `healthy`.
    pub async fn health_check(&self) -> ModelHealth {
        let (response_time, probe_error) = if self.is_loaded() {
            let started = Instant::now();
            match self.backend.probe().await {
                Ok(()) => (Some(started.elapsed().as_secs_f64()), None),
                Err(e) => (None, Some(e.to_string())),
            }
        } else {
            (None, None)
        };

        let now = Utc::now();
        let mut counters = self.counters.lock();
        if let Some(error) = &probe_error {
            counters.last_error = Some(error.clone());
        }

        let status = if !self.is_loaded() {
            HealthStatus::Offline
        } else if counters.is_degraded() {
            HealthStatus::Degraded
        } else if probe_error.is_some() {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };
        counters.health_status = status;
        counters.last_health_check = Some(now);

        let mut details = Payload::new();
        details.insert("request_count".into(), json!(counters.request_count));
        details.insert("avg_execution_time".into(), json!(counters.avg_execution_time()));
        details.insert("last_error".into(), json!(counters.last_error));
        details.insert("version".into(), Value::String(self.version.clone()));
        details.insert("provider".into(), Value::String(self.provider.clone()));
        if let Some(error) = probe_error {
            details.insert("error".into(), Value::String(error));
        }

        ModelHealth {
            model_name: self.name.clone(),
            status,
            last_check: now,
            response_time,
            success_rate: Some(counters.success_rate()),
            error_count: counters.error_count,
            details: Some(details),
        }
    }

    /// Load if needed, then run one synthetic prediction.
    ///
    /// Only a load failure is reported; a failed warmup prediction is logged.
    pub async fn warmup(&self) -> McpResult<()> {
        self.load().await?;

        let mut payload = Payload::new();
        payload.insert("warmup".into(), Value::Bool(true));
        if let Err(e) = self.backend.predict(&payload, None).await {
            warn!(model = %self.name, error = %e, "Warmup prediction failed");
        }
        Ok(())
    }

    pub fn stats(&self) -> ModelStats {
        let counters = self.counters.lock();
        ModelStats {
            name: self.name.clone(),
            version: self.version.clone(),
            provider: self.provider.clone(),
            loaded: self.is_loaded(),
            request_count: counters.request_count,
            error_count: counters.error_count,
            success_rate: counters.success_rate(),
            avg_execution_time: counters.avg_execution_time(),
            last_execution_time: counters.last_execution_time,
            total_execution_time: counters.total_execution_time,
            last_error: counters.last_error.clone(),
            health_status: counters.health_status,
            last_health_check: counters.last_health_check,
        }
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            name: self.name.clone(),
            model_type: self.model_type.clone(),
            loaded: self.is_loaded(),
            health_status: self.counters.lock().health_status,
            info: self.info(),
        }
    }

    #[cfg(test)]
    pub(crate) fn set_counts(&self, request_count: u64, error_count: u64) {
        let mut counters = self.counters.lock();
        counters.request_count = request_count;
        counters.error_count = error_count;
    }
}
