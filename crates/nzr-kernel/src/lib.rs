//! NzrApi AI kernel.
//!
//! Contracts shared by every model backend and by the engines in
//! `nzr-foundation`: the request/response protocol, the conversational
//! [`Context`](context::Context) entity, the [`ModelBackend`](backend::ModelBackend)
//! capability trait, the error taxonomy and the configuration loader.

// error module
pub mod error;

// protocol module
pub mod protocol;
pub use protocol::*;

// context module
pub mod context;
pub use context::{Context, ContextSummary, Message};

// backend module
pub mod backend;
pub use backend::{BackendError, BackendResult, BackendSpec, ModelBackend, ModelInfo};

// config module
pub mod config;

pub use error::{McpError, McpResult, ReportResult};
