//! Integration tests for `BatchProcessor`: ordering, failure isolation and
//! execution mode.
//!
//! ```bash
//! cargo test -p nzr-foundation --test batch_integration
//! ```

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::backends::register_doubles;
use common::{init_tracing, payload};
use nzr_foundation::{BatchProcessor, ContextStore, ModelRegistry};
use nzr_kernel::config::ContextConfig;
use nzr_kernel::{
    BackendResult, BackendSpec, BatchRequest, Context, ModelBackend, ModelInfo, Payload, Request,
};
use serde_json::json;

async fn setup() -> ModelRegistry {
    init_tracing();
    let registry = ModelRegistry::default();
    register_doubles(&registry);
    registry.add_model("echo", "echo", payload(json!({}))).await.unwrap();
    registry
}

/// Ten requests; the one at `failing` is engineered to fail.
fn requests_with_one_failure(failing: usize) -> Vec<Request> {
    (0..10)
        .map(|i| {
            let body = payload(json!({"text": format!("t{i}"), "fail": i == failing}));
            Request::new("echo", body)
                .unwrap()
                .with_request_id(format!("r{i}"))
        })
        .collect()
}

fn assert_one_failure_in_order(response: &nzr_kernel::BatchResponse, failing: usize) {
    assert_eq!(response.responses.len(), 10);
    assert_eq!(response.success_count, 9);
    assert_eq!(response.error_count, 1);
    assert_eq!(response.success_count + response.error_count, 10);

    for (i, item) in response.responses.iter().enumerate() {
        assert_eq!(item.request_id(), format!("r{i}"));
        if i == failing {
            let error = item.as_error().unwrap();
            assert_eq!(error.error_code, "PROCESSING_ERROR");
            assert_eq!(error.details.as_ref().unwrap()["error_kind"], "BACKEND_ERROR");
        } else {
            assert_eq!(item.as_response().unwrap().result["echo"], format!("t{i}"));
        }
    }
}

#[tokio::test]
async fn parallel_batch_isolates_one_failure() {
    let processor = BatchProcessor::new(setup().await);
    let batch = BatchRequest::new(requests_with_one_failure(4)).unwrap();

    let response = processor.process(&batch).await.unwrap();
    assert_one_failure_in_order(&response, 4);
    assert!(response.total_execution_time.unwrap() >= 0.0);
}

#[tokio::test]
async fn sequential_batch_isolates_one_failure() {
    let processor = BatchProcessor::new(setup().await);
    let batch = BatchRequest::new(requests_with_one_failure(0))
        .unwrap()
        .sequential();

    let response = processor.process(&batch).await.unwrap();
    assert_one_failure_in_order(&response, 0);
}

#[tokio::test]
async fn parallel_results_keep_request_order_despite_completion_order() {
    let registry = setup().await;
    // later requests finish first
    for (name, delay) in [("slowest", 300), ("middle", 150), ("fastest", 0)] {
        registry
            .add_model(name, "slow", payload(json!({"delay_ms": delay})))
            .await
            .unwrap();
    }

    let requests = ["slowest", "middle", "fastest"]
        .iter()
        .map(|name| {
            Request::new(*name, payload(json!({"text": name})))
                .unwrap()
                .with_request_id(*name)
        })
        .collect();
    let batch = BatchRequest::new(requests).unwrap();

    let response = BatchProcessor::new(registry).process(&batch).await.unwrap();
    let order: Vec<_> = response.responses.iter().map(|r| r.request_id()).collect();
    assert_eq!(order, vec!["slowest", "middle", "fastest"]);
}

#[tokio::test]
async fn parallel_mode_overlaps_and_sequential_mode_does_not() {
    let registry = setup().await;
    registry
        .add_model("slow", "slow", payload(json!({"delay_ms": 100})))
        .await
        .unwrap();
    let processor = BatchProcessor::new(registry);

    let requests: Vec<Request> = (0..8)
        .map(|i| Request::new("slow", payload(json!({"text": i}))).unwrap())
        .collect();

    let started = Instant::now();
    let parallel = BatchRequest::new(requests.clone()).unwrap();
    processor.process(&parallel).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(600));

    let started = Instant::now();
    let sequential = BatchRequest::new(requests).unwrap().sequential();
    let response = processor.process(&sequential).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(800));
    assert!(response.total_execution_time.unwrap() >= 0.8);
}

#[tokio::test]
async fn empty_batch_is_rejected_before_execution() {
    let processor = BatchProcessor::new(setup().await);
    let batch = BatchRequest {
        batch_id: "empty".into(),
        requests: Vec::new(),
        parallel: true,
        metadata: Payload::new(),
    };

    let err = processor.process(&batch).await.unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION_ERROR");
}

/// Backend that panics on every prediction.
struct PanickingBackend;

#[async_trait]
impl ModelBackend for PanickingBackend {
    fn describe(&self) -> ModelInfo {
        ModelInfo::new()
    }

    async fn load(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn predict(&self, _payload: &Payload, _context: Option<&Context>) -> BackendResult<Payload> {
        panic!("backend exploded");
    }

    async fn unload(&self) -> BackendResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn panicking_unit_becomes_an_error_record() {
    let registry = setup().await;
    registry.register_type("panicky", |_spec: &BackendSpec| {
        Ok(Arc::new(PanickingBackend) as Arc<dyn ModelBackend>)
    });
    registry
        .add_model("boom", "panicky", payload(json!({})))
        .await
        .unwrap();

    let batch = BatchRequest::new(vec![
        Request::new("echo", payload(json!({"text": "a"}))).unwrap(),
        Request::new("boom", payload(json!({}))).unwrap(),
        Request::new("echo", payload(json!({"text": "c"}))).unwrap(),
    ])
    .unwrap();

    for batch in [batch.clone(), batch.sequential()] {
        let response = BatchProcessor::new(registry.clone())
            .process(&batch)
            .await
            .unwrap();
        assert_eq!(response.success_count, 2);
        let error = response.responses[1].as_error().unwrap();
        assert_eq!(error.error_code, "PROCESSING_ERROR");
        assert!(error.error_message.contains("backend exploded"));
    }
}

#[tokio::test]
async fn batch_units_see_their_stored_context() {
    let registry = setup().await;
    registry
        .add_model(
            "assistant",
            "mock",
            payload(json!({"simulation_delay": 0.0, "load_delay": 0.0})),
        )
        .await
        .unwrap();

    let store = ContextStore::new(ContextConfig::default());
    store.create_context("session", None, None).unwrap();

    let batch = BatchRequest::new(vec![
        Request::new("assistant", payload(json!({"prompt": "hi"})))
            .unwrap()
            .with_context("session"),
    ])
    .unwrap();

    let response = BatchProcessor::new(registry)
        .with_context_store(store)
        .process(&batch)
        .await
        .unwrap();
    let item = response.responses[0].as_response().unwrap();
    assert_eq!(item.result["context_used"], true);
    assert_eq!(item.context_id, "session");
}
