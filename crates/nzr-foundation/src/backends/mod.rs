//! Built-in model backends.
//!
//! Both are registered by [`ModelRegistry::new`](crate::registry::ModelRegistry::new)
//! unless `builtin_types` is disabled.

// mock module - deterministic test/dev backend
pub mod mock;

// openai module - chat-completions backend
pub mod openai;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;
