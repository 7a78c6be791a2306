//! Crate-level error types for `nzr-kernel`.
//!
//! [`McpError`] is the single error taxonomy raised by the registry, the
//! context store and the batch processor. File-driven operations wrap it in
//! an [`error_stack::Report`] (see [`ReportResult`]) so the failing path can
//! be attached as context.
//!
//! # Usage
//!
//! ```rust,ignore
//! use nzr_kernel::error::{McpError, ReportResult};
//! use error_stack::ResultExt;
//!
//! fn load_catalog(path: &str) -> ReportResult<CatalogConfig> {
//!     nzr_kernel::config::load_config(path)
//!         .map_err(McpError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach(format!("loading model catalog from {path}"))
//! }
//! ```

use crate::backend::BackendError;
use crate::config::ConfigError;
use thiserror::Error;

/// Errors raised synchronously by the registry, the context store and the
/// batch processor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum McpError {
    /// A model or context with this identifier already exists.
    #[error("'{0}' already exists")]
    DuplicateName(String),

    /// No model is registered under this name.
    #[error("Model '{0}' not found")]
    ModelNotFound(String),

    /// The context is absent or has expired.
    #[error("Context '{0}' not found")]
    ContextNotFound(String),

    /// The backend type was never registered.
    #[error("Unknown model type '{type_name}'. Available: {available:?}")]
    UnknownType {
        type_name: String,
        available: Vec<String>,
    },

    /// `predict` was called before a successful `load`.
    #[error("Model '{0}' is not loaded")]
    NotLoaded(String),

    /// A batch unit failed; wraps the underlying message.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Input rejected before any execution began.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backend itself reported a failure.
    #[error("Backend '{model}' failed: {source}")]
    Backend {
        model: String,
        #[source]
        source: BackendError,
    },

    /// A configuration document could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl McpError {
    /// Stable machine-readable code for the outer transport layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            McpError::DuplicateName(_) => "DUPLICATE_NAME",
            McpError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            McpError::ContextNotFound(_) => "CONTEXT_NOT_FOUND",
            McpError::UnknownType { .. } => "UNKNOWN_TYPE",
            McpError::NotLoaded(_) => "MODEL_NOT_LOADED",
            McpError::Processing(_) => "PROCESSING_ERROR",
            McpError::Validation(_) => "VALIDATION_ERROR",
            McpError::Backend { .. } => "BACKEND_ERROR",
            McpError::Config(_) => "CONFIG_ERROR",
            McpError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// True for both unknown models and unknown/expired contexts.
    pub fn is_not_found(&self) -> bool {
        matches!(self, McpError::ModelNotFound(_) | McpError::ContextNotFound(_))
    }

    pub fn backend(model: impl Into<String>, source: BackendError) -> Self {
        McpError::Backend {
            model: model.into(),
            source,
        }
    }
}

/// Result alias used across the kernel and foundation crates.
pub type McpResult<T> = Result<T, McpError>;

/// Result alias carrying an [`error_stack::Report`] for context-rich
/// propagation.
pub type ReportResult<T> = Result<T, error_stack::Report<McpError>>;
