//! BatchProcessor - bounded fan-out of protocol requests
//!
//! A [`BatchRequest`] is validated as a whole before anything runs. After
//! that every unit is isolated: a failure (unknown model, backend error or
//! even a panic) becomes an [`ErrorRecord`] in that unit's slot and the rest
//! of the batch carries on. Results always come back in request order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use nzr_kernel::{
    BatchItem, BatchRequest, BatchResponse, ErrorRecord, McpError, McpResult, PROCESSING_ERROR,
    Payload, Request, Response,
};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::context_store::ContextStore;
use crate::registry::ModelRegistry;

/// Dispatches batches against a [`ModelRegistry`].
///
/// When bound to a [`ContextStore`], a request whose `context_id` names a
/// live context gets that context passed to the backend.
#[derive(Clone)]
pub struct BatchProcessor {
    registry: ModelRegistry,
    contexts: Option<ContextStore>,
}

impl BatchProcessor {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            contexts: None,
        }
    }

    pub fn with_context_store(mut self, contexts: ContextStore) -> Self {
        self.contexts = Some(contexts);
        self
    }

    /// Run a batch.
    ///
    /// # Errors
    ///
    /// Only `Validation`, raised before any request executes when the batch
    /// is empty, larger than 100 requests, or holds an empty model name.
    pub async fn process(&self, batch: &BatchRequest) -> McpResult<BatchResponse> {
        batch.validate()?;

        let started = Instant::now();
        debug!(
            batch_id = %batch.batch_id,
            size = batch.requests.len(),
            parallel = batch.parallel,
            "Processing batch"
        );

        let items = if batch.parallel {
            self.run_parallel(&batch.requests).await
        } else {
            self.run_sequential(&batch.requests).await
        };

        let response = BatchResponse::from_items(
            batch.batch_id.clone(),
            items,
            started.elapsed().as_secs_f64(),
            batch.metadata.clone(),
        );
        info!(
            batch_id = %response.batch_id,
            success = response.success_count,
            errors = response.error_count,
            "Batch completed"
        );
        Ok(response)
    }

    async fn run_sequential(&self, requests: &[Request]) -> Vec<BatchItem> {
        let mut items = Vec::with_capacity(requests.len());
        for request in requests {
            let outcome = guarded_unit(self.clone(), request.clone()).await;
            items.push(BatchItem::from(outcome));
        }
        items
    }

    async fn run_parallel(&self, requests: &[Request]) -> Vec<BatchItem> {
        let mut join_set = JoinSet::new();
        for (index, request) in requests.iter().enumerate() {
            let processor = self.clone();
            let request = request.clone();
            join_set.spawn(async move { (index, guarded_unit(processor, request).await) });
        }

        let mut slots: Vec<Option<BatchItem>> = vec![None; requests.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(BatchItem::from(outcome)),
                Err(e) => error!("Batch unit task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(requests)
            .map(|(slot, request)| {
                slot.unwrap_or_else(|| {
                    BatchItem::Error(unit_error(request, "batch unit did not complete", PROCESSING_ERROR))
                })
            })
            .collect()
    }

    async fn run_unit(&self, request: &Request) -> Result<Response, McpError> {
        let context = match (&self.contexts, &request.context_id) {
            (Some(store), Some(context_id)) => store.get_context(context_id),
            _ => None,
        };
        self.registry
            .process_request(request, context.as_ref())
            .await
    }
}

/// Run one unit, converting any error or panic into an [`ErrorRecord`].
async fn guarded_unit(processor: BatchProcessor, request: Request) -> Result<Response, ErrorRecord> {
    match AssertUnwindSafe(processor.run_unit(&request)).catch_unwind().await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            debug!(request_id = %request.request_id, error = %e, "Batch unit failed");
            Err(unit_error(&request, &e.to_string(), e.error_code()))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(request_id = %request.request_id, "Batch unit panicked: {}", message);
            Err(unit_error(&request, &message, PROCESSING_ERROR))
        }
    }
}

fn unit_error(request: &Request, message: &str, error_kind: &str) -> ErrorRecord {
    let mut details = Payload::new();
    details.insert("model_name".into(), Value::String(request.model_name.clone()));
    details.insert("error_kind".into(), Value::String(error_kind.to_string()));
    ErrorRecord::processing(request.request_id.clone(), message).with_details(details)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit of work panicked".to_string()
    }
}
