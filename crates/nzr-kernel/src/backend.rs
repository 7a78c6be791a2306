//! Pluggable Model Backend Abstraction
//!
//! This module defines the `ModelBackend` trait, the capability set every
//! model kind implements: load, predict, unload, describe and a health probe.
//! Concrete kinds (a deterministic test double, a remote chat-completions
//! API, ...) are constructed by name through a factory registered with the
//! model registry.
//!
//! Bookkeeping that is common to every backend (the loaded flag, request and
//! error counters, timings and health classification) lives in the
//! registry's model handle, not in the backend itself.

use crate::protocol::Payload;
use crate::context::Context;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Descriptive, string-valued information about a backend
/// (name, version, provider, type, description, capabilities, ...).
pub type ModelInfo = BTreeMap<String, String>;

/// Errors reported by a backend implementation.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend has no usable runtime state (never loaded or unloaded).
    #[error("Model not loaded")]
    NotLoaded,

    /// The payload is missing required fields or is malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backend configuration is incomplete or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A remote service returned an error.
    #[error("Remote call failed: {0}")]
    Remote(String),

    /// The call did not complete within the configured deadline.
    #[error("Timed out after {0:.3}s")]
    Timeout(f64),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Construction parameters handed to a backend factory.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSpec {
    /// Registry name of the model.
    pub name: String,
    /// Registered type name the backend was built from.
    pub model_type: String,
    /// Free-form configuration map from the model descriptor.
    pub config: Payload,
}

impl BackendSpec {
    pub fn new(name: impl Into<String>, model_type: impl Into<String>, config: Payload) -> Self {
        Self {
            name: name.into(),
            model_type: model_type.into(),
            config,
        }
    }

    /// `version` config key, `"1.0.0"` when absent.
    pub fn version(&self) -> &str {
        self.str_option("version").unwrap_or("1.0.0")
    }

    /// `provider` config key, `"unknown"` when absent.
    pub fn provider(&self) -> &str {
        self.str_option("provider").unwrap_or("unknown")
    }

    pub fn str_option(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn f64_option(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }
}

/// A pluggable model backend.
///
/// Implementations use interior mutability so a single instance can be
/// shared across concurrent callers behind an `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// struct EchoBackend;
///
/// #[async_trait]
/// impl ModelBackend for EchoBackend {
///     fn describe(&self) -> ModelInfo { ModelInfo::new() }
///     async fn load(&self) -> BackendResult<()> { Ok(()) }
///     async fn predict(&self, payload: &Payload, _: Option<&Context>) -> BackendResult<Payload> {
///         let mut out = Payload::new();
///         out.insert("echo".into(), payload.get("text").cloned().unwrap_or_default());
///         Ok(out)
///     }
///     async fn unload(&self) -> BackendResult<()> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Descriptive metadata about the model.
    fn describe(&self) -> ModelInfo;

    /// Prepare the backend for use. A failure leaves the model unloaded.
    async fn load(&self) -> BackendResult<()>;

    /// Run one prediction with an optional conversational context.
    async fn predict(&self, payload: &Payload, context: Option<&Context>) -> BackendResult<Payload>;

    /// Release runtime state.
    async fn unload(&self) -> BackendResult<()>;

    /// Synthetic prediction used by health checks.
    async fn probe(&self) -> BackendResult<()> {
        let mut payload = Payload::new();
        payload.insert("test".to_string(), Value::Bool(true));
        self.predict(&payload, None).await.map(|_| ())
    }
}
