//! Mock backend
//!
//! Deterministic backend for tests and local development. Prompts found in
//! `mock_responses` get their canned reply; anything else gets a generic
//! echo of the payload.
//!
//! Config keys: `mock_responses` (prompt -> reply), `simulation_delay` and
//! `load_delay` (seconds, default 0.1 each).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nzr_kernel::{
    BackendError, BackendResult, BackendSpec, Context, ModelBackend, ModelInfo, Payload,
};
use serde_json::Value;

const DEFAULT_DELAY_SECS: f64 = 0.1;

/// Mock AI model for testing
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    version: String,
    provider: String,
    mock_responses: Payload,
    simulation_delay: Duration,
    load_delay: Duration,
    loaded: AtomicBool,
}

fn delay_option(spec: &BackendSpec, key: &str) -> BackendResult<Duration> {
    let secs = match spec.config.get(key) {
        None | Some(Value::Null) => DEFAULT_DELAY_SECS,
        Some(value) => value.as_f64().ok_or_else(|| {
            BackendError::Configuration(format!("'{key}' must be a non-negative number"))
        })?,
    };
    Duration::try_from_secs_f64(secs)
        .map_err(|e| BackendError::Configuration(format!("'{key}' is out of range: {e}")))
}

impl MockBackend {
    pub fn new(spec: &BackendSpec) -> BackendResult<Self> {
        let mock_responses = match spec.config.get("mock_responses") {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(BackendError::Configuration(
                    "'mock_responses' must be a map of prompt to reply".into(),
                ));
            }
        };

        Ok(Self {
            name: spec.name.clone(),
            version: spec.version().to_string(),
            provider: spec.provider().to_string(),
            mock_responses,
            simulation_delay: delay_option(spec, "simulation_delay")?,
            load_delay: delay_option(spec, "load_delay")?,
            loaded: AtomicBool::new(false),
        })
    }

    /// Factory registered under the `mock` type name.
    pub fn factory(spec: &BackendSpec) -> BackendResult<Arc<dyn ModelBackend>> {
        Ok(Arc::new(Self::new(spec)?))
    }

    fn canned_reply(&self, payload: &Payload) -> Option<Value> {
        let prompt = payload.get("prompt")?.as_str()?;
        self.mock_responses.get(prompt).cloned()
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn describe(&self) -> ModelInfo {
        ModelInfo::from([
            ("name".to_string(), self.name.clone()),
            ("version".to_string(), self.version.clone()),
            ("provider".to_string(), self.provider.clone()),
            ("type".to_string(), "mock".to_string()),
            ("description".to_string(), "Mock AI model for testing".to_string()),
            (
                "capabilities".to_string(),
                "text_generation,question_answering".to_string(),
            ),
        ])
    }

    async fn load(&self) -> BackendResult<()> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn predict(&self, payload: &Payload, context: Option<&Context>) -> BackendResult<Payload> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(BackendError::NotLoaded);
        }
        if !self.simulation_delay.is_zero() {
            tokio::time::sleep(self.simulation_delay).await;
        }

        let mut result = Payload::new();
        match self.canned_reply(payload) {
            Some(reply) => {
                result.insert("response".into(), reply);
            }
            None => {
                let echoed = Value::Object(payload.clone());
                result.insert(
                    "response".into(),
                    Value::String(format!("Mock response to: {echoed}")),
                );
                result.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
            }
        }
        result.insert("model".into(), Value::String(self.name.clone()));
        result.insert("context_used".into(), Value::Bool(context.is_some()));
        Ok(result)
    }

    async fn unload(&self) -> BackendResult<()> {
        self.loaded.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(config: Value) -> BackendSpec {
        BackendSpec::new("mock-1", "mock", config.as_object().cloned().unwrap_or_default())
    }

    fn fast() -> Value {
        json!({
            "simulation_delay": 0.0,
            "load_delay": 0.0,
            "mock_responses": {"hello": "Hi there!"}
        })
    }

    #[tokio::test]
    async fn test_canned_and_default_replies() {
        let backend = MockBackend::new(&spec(fast())).unwrap();
        backend.load().await.unwrap();

        let canned = json!({"prompt": "hello"}).as_object().cloned().unwrap();
        let result = backend.predict(&canned, None).await.unwrap();
        assert_eq!(result["response"], "Hi there!");
        assert_eq!(result["model"], "mock-1");
        assert_eq!(result["context_used"], false);
        assert!(!result.contains_key("timestamp"));

        let other = json!({"prompt": "unknown"}).as_object().cloned().unwrap();
        let ctx = Context::new("c1", None);
        let result = backend.predict(&other, Some(&ctx)).await.unwrap();
        let response = result["response"].as_str().unwrap();
        assert!(response.starts_with("Mock response to: "));
        assert!(response.contains("unknown"));
        assert_eq!(result["context_used"], true);
        assert!(result.contains_key("timestamp"));
    }

    #[tokio::test]
    async fn test_predict_before_load() {
        let backend = MockBackend::new(&spec(fast())).unwrap();
        let err = backend.predict(&Payload::new(), None).await.unwrap_err();
        assert!(matches!(err, BackendError::NotLoaded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_delays() {
        let backend = MockBackend::new(&spec(json!({}))).unwrap();
        let started = tokio::time::Instant::now();
        backend.load().await.unwrap();
        backend.predict(&Payload::new(), None).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_invalid_config() {
        let err = MockBackend::new(&spec(json!({"simulation_delay": "slow"}))).unwrap_err();
        assert!(matches!(err, BackendError::Configuration(_)));

        let err = MockBackend::new(&spec(json!({"mock_responses": ["a"]}))).unwrap_err();
        assert!(matches!(err, BackendError::Configuration(_)));
    }

    #[test]
    fn test_out_of_range_delays_are_rejected() {
        for config in [
            json!({"simulation_delay": 1e30}),
            json!({"load_delay": 1e30}),
            json!({"simulation_delay": -1.0}),
        ] {
            let err = MockBackend::new(&spec(config)).unwrap_err();
            assert!(matches!(err, BackendError::Configuration(_)));
        }
    }

    #[test]
    fn test_describe() {
        let backend = MockBackend::new(&spec(json!({"version": "2.0"}))).unwrap();
        let info = backend.describe();
        assert_eq!(info["type"], "mock");
        assert_eq!(info["version"], "2.0");
        assert_eq!(info["provider"], "unknown");
    }
}
