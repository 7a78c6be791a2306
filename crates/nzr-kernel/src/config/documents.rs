//! Typed configuration documents.

use crate::protocol::Payload;
use serde::{Deserialize, Serialize};

/// Context store tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// TTL in seconds applied to contexts created without one. `None` means
    /// contexts never expire unless given an explicit TTL.
    pub default_ttl: Option<u64>,
    /// Capacity; creating a new context at capacity evicts the oldest one.
    pub max_contexts: usize,
    /// Interval between background expiry sweeps.
    pub cleanup_interval_secs: u64,
    /// History cap per context.
    pub max_message_history: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(3600),
            max_contexts: 10_000,
            cleanup_interval_secs: 300,
            max_message_history: 100,
        }
    }
}

/// Model registry tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a cached health result is served by `health_check_all`.
    pub health_cache_ttl_secs: u64,
    /// Register the built-in `mock` and `openai` backend types on creation.
    pub builtin_types: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_cache_ttl_secs: 60,
            builtin_types: true,
        }
    }
}

/// One entry of a model catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default)]
    pub config: Payload,
    #[serde(default)]
    pub auto_load: bool,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model_type: model_type.into(),
            config: Payload::new(),
            auto_load: false,
        }
    }

    pub fn with_config(mut self, config: Payload) -> Self {
        self.config = config;
        self
    }

    pub fn auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }
}

/// Catalog of models for bulk registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

/// Top-level document combining all sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub context: ContextConfig,
    pub registry: RegistryConfig,
    pub models: Vec<ModelDescriptor>,
}

impl HubConfig {
    pub fn catalog(&self) -> CatalogConfig {
        CatalogConfig {
            models: self.models.clone(),
        }
    }
}
