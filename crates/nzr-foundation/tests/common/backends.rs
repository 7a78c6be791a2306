//! Deterministic backend doubles for registry, batch and health tests.
//!
//! | Type name | Behaviour |
//! |-----------|-----------|
//! | `echo` | returns `{"echo": payload["text"]}`; fails when the payload has `"fail": true` |
//! | `failing-load` | `load` always fails |
//! | `slow` | sleeps `delay_ms` (config, default 200) before echoing |
//!
//! Every double counts its `predict` calls so tests can observe dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nzr_foundation::ModelRegistry;
use nzr_kernel::{
    BackendError, BackendResult, BackendSpec, Context, ModelBackend, ModelInfo, Payload,
};
use serde_json::Value;

/// Echo double, optionally slowed down.
pub struct EchoBackend {
    loaded: AtomicBool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl EchoBackend {
    pub fn new(delay: Option<Duration>, calls: Arc<AtomicUsize>) -> Self {
        Self {
            loaded: AtomicBool::new(false),
            delay,
            calls,
        }
    }
}

#[async_trait]
impl ModelBackend for EchoBackend {
    fn describe(&self) -> ModelInfo {
        ModelInfo::from([("description".to_string(), "echo double".to_string())])
    }

    async fn load(&self) -> BackendResult<()> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn predict(&self, payload: &Payload, _context: Option<&Context>) -> BackendResult<Payload> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(BackendError::NotLoaded);
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if payload.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(BackendError::Other("engineered failure".into()));
        }

        let mut result = Payload::new();
        result.insert(
            "echo".into(),
            payload.get("text").cloned().unwrap_or(Value::Null),
        );
        Ok(result)
    }

    async fn unload(&self) -> BackendResult<()> {
        self.loaded.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Double whose `load` always fails.
pub struct FailingLoadBackend;

#[async_trait]
impl ModelBackend for FailingLoadBackend {
    fn describe(&self) -> ModelInfo {
        ModelInfo::new()
    }

    async fn load(&self) -> BackendResult<()> {
        Err(BackendError::Configuration("weights not found".into()))
    }

    async fn predict(&self, _payload: &Payload, _context: Option<&Context>) -> BackendResult<Payload> {
        Err(BackendError::NotLoaded)
    }

    async fn unload(&self) -> BackendResult<()> {
        Ok(())
    }
}

/// Register `echo`, `failing-load` and `slow` on a registry.
///
/// Returns the shared counter of `predict` calls across all echo/slow models.
pub fn register_doubles(registry: &ModelRegistry) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));

    let echo_calls = Arc::clone(&calls);
    registry.register_type("echo", move |_spec: &BackendSpec| {
        Ok(Arc::new(EchoBackend::new(None, Arc::clone(&echo_calls))) as Arc<dyn ModelBackend>)
    });

    registry.register_type("failing-load", |_spec: &BackendSpec| {
        Ok(Arc::new(FailingLoadBackend) as Arc<dyn ModelBackend>)
    });

    let slow_calls = Arc::clone(&calls);
    registry.register_type("slow", move |spec: &BackendSpec| {
        let delay_ms = spec
            .config
            .get("delay_ms")
            .and_then(Value::as_u64)
            .unwrap_or(200);
        Ok(Arc::new(EchoBackend::new(
            Some(Duration::from_millis(delay_ms)),
            Arc::clone(&slow_calls),
        )) as Arc<dyn ModelBackend>)
    });

    calls
}
