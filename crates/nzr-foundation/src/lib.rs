//! NzrApi AI foundation.
//!
//! The engines behind the kernel contracts: the [`ContextStore`], the
//! [`ModelRegistry`] with its per-model [`ModelHandle`] bookkeeping, the
//! [`BatchProcessor`] and the built-in `mock` and `openai` backends.

// backends module - built-in backend kinds
pub mod backends;

// batch module - ordered fan-out with per-unit error isolation
pub mod batch;

// context_store module - capacity- and TTL-bounded conversational state
pub mod context_store;

// model module - backend lifecycle, statistics and health
pub mod model;

// registry module - named model catalog
pub mod registry;

pub use batch::BatchProcessor;
pub use context_store::{ContextStore, ContextStoreStats, ContextUpdate};
pub use model::{ModelHandle, ModelStats, ModelSummary};
pub use registry::{BackendFactory, LoadReport, ModelRegistry};
