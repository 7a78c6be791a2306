//! Common test utilities shared across all `nzr-foundation` integration tests.
//!
//! This module is **not** a standalone test binary. It is declared with
//! `mod common;` inside each integration test file that needs it.

#![allow(dead_code)]

pub mod backends;

use std::sync::Once;

use nzr_kernel::Payload;
use serde_json::Value;

static TRACING: Once = Once::new();

/// Route `tracing` output to the test harness. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Turn a `json!` object literal into a payload.
pub fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}
