//! Model invocation protocol
//!
//! Plain data shapes exchanged between callers and model backends:
//! - [`Request`] / [`Response`] / [`ErrorRecord`] for a single invocation
//! - [`BatchRequest`] / [`BatchResponse`] for bounded batches
//! - [`ModelHealth`] / [`HealthStatus`] for health reporting
//!
//! Validation is intentionally light: a model name must be non-empty after
//! trimming and a batch must hold between 1 and [`MAX_BATCH_SIZE`] requests.

use crate::backend::ModelInfo;
use crate::error::{McpError, McpResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON object used for payloads, results, metadata and details.
pub type Payload = serde_json::Map<String, Value>;

/// Upper bound on the number of requests in one batch.
pub const MAX_BATCH_SIZE: usize = 100;

/// Error code attached to every failed batch unit.
pub const PROCESSING_ERROR: &str = "PROCESSING_ERROR";

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_parallel() -> bool {
    true
}

// ============================================================================
// Request / Response
// ============================================================================

/// A single model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "new_id")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub model_name: String,
    pub payload: Payload,
    #[serde(default)]
    pub metadata: Payload,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Request {
    /// Create a request with a fresh id. The model name is trimmed and must
    /// not be empty.
    pub fn new(model_name: impl Into<String>, payload: Payload) -> McpResult<Self> {
        Self {
            request_id: new_id(),
            context_id: None,
            model_name: model_name.into(),
            payload,
            metadata: Payload::new(),
            timestamp: Utc::now(),
        }
        .normalized()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    /// Check the model name without consuming the request.
    pub fn validate(&self) -> McpResult<()> {
        if self.model_name.trim().is_empty() {
            return Err(McpError::Validation("Model name cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Validate and trim the model name in place.
    pub fn normalized(mut self) -> McpResult<Self> {
        self.validate()?;
        self.model_name = self.model_name.trim().to_string();
        Ok(self)
    }

    /// Context id echoed back in the response when the caller supplied none.
    pub fn effective_context_id(&self) -> String {
        self.context_id
            .clone()
            .unwrap_or_else(|| format!("ctx_{}", self.request_id))
    }
}

/// Successful result of a model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    pub context_id: String,
    pub model_name: String,
    pub result: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
    /// Wall-clock seconds spent serving the request.
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Failed result of a model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub request_id: String,
    pub error_code: String,
    pub error_message: String,
    #[serde(default)]
    pub details: Option<Payload>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        request_id: impl Into<String>,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            error_code: error_code.into(),
            error_message: error_message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    /// A `PROCESSING_ERROR` record for a failed batch unit.
    pub fn processing(request_id: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self::new(request_id, PROCESSING_ERROR, error_message)
    }

    pub fn with_details(mut self, details: Payload) -> Self {
        self.details = Some(details);
        self
    }
}

// ============================================================================
// Batches
// ============================================================================

/// A bounded collection of independent requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(default = "new_id")]
    pub batch_id: String,
    pub requests: Vec<Request>,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default)]
    pub metadata: Payload,
}

impl BatchRequest {
    /// Build a parallel batch. Fails if the size is outside `1..=100`.
    pub fn new(requests: Vec<Request>) -> McpResult<Self> {
        let batch = Self {
            batch_id: new_id(),
            requests,
            parallel: true,
            metadata: Payload::new(),
        };
        batch.validate()?;
        Ok(batch)
    }

    /// Execute strictly one request at a time, in order.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = batch_id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn validate(&self) -> McpResult<()> {
        if self.requests.is_empty() {
            return Err(McpError::Validation(
                "Batch must contain at least one request".to_string(),
            ));
        }
        if self.requests.len() > MAX_BATCH_SIZE {
            return Err(McpError::Validation(format!(
                "Batch size cannot exceed {} requests (got {})",
                MAX_BATCH_SIZE,
                self.requests.len()
            )));
        }
        self.requests.iter().try_for_each(Request::validate)
    }
}

/// One slot of a [`BatchResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BatchItem {
    Response(Response),
    Error(ErrorRecord),
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItem::Response(_))
    }

    pub fn request_id(&self) -> &str {
        match self {
            BatchItem::Response(r) => &r.request_id,
            BatchItem::Error(e) => &e.request_id,
        }
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            BatchItem::Response(r) => Some(r),
            BatchItem::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorRecord> {
        match self {
            BatchItem::Error(e) => Some(e),
            BatchItem::Response(_) => None,
        }
    }
}

impl From<Result<Response, ErrorRecord>> for BatchItem {
    fn from(outcome: Result<Response, ErrorRecord>) -> Self {
        match outcome {
            Ok(response) => BatchItem::Response(response),
            Err(error) => BatchItem::Error(error),
        }
    }
}

/// Aggregated outcome of a [`BatchRequest`]; `responses` keeps request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch_id: String,
    pub responses: Vec<BatchItem>,
    #[serde(default)]
    pub total_execution_time: Option<f64>,
    pub success_count: usize,
    pub error_count: usize,
    #[serde(default)]
    pub metadata: Payload,
}

impl BatchResponse {
    /// Assemble a response, deriving the success/error counts from the items.
    pub fn from_items(
        batch_id: impl Into<String>,
        responses: Vec<BatchItem>,
        total_execution_time: f64,
        metadata: Payload,
    ) -> Self {
        let success_count = responses.iter().filter(|r| r.is_success()).count();
        let error_count = responses.len() - success_count;
        Self {
            batch_id: batch_id.into(),
            responses,
            total_execution_time: Some(total_execution_time),
            success_count,
            error_count,
            metadata,
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Health classification of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Offline,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Result of one health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub model_name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    /// Latency of the synthetic probe, in seconds.
    pub response_time: Option<f64>,
    /// Percentage of successful predictions.
    pub success_rate: Option<f64>,
    pub error_count: u64,
    #[serde(default)]
    pub details: Option<Payload>,
}

impl ModelHealth {
    /// Record produced when the check itself could not run.
    pub fn unhealthy(model_name: impl Into<String>, error: impl Into<String>) -> Self {
        let mut details = Payload::new();
        details.insert("error".to_string(), Value::String(error.into()));
        Self {
            model_name: model_name.into(),
            status: HealthStatus::Unhealthy,
            last_check: Utc::now(),
            response_time: None,
            success_rate: None,
            error_count: 1,
            details: Some(details),
        }
    }
}
