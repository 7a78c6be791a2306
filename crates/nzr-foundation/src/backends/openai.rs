//! OpenAI backend
//!
//! Chat-completions backend built on `async-openai`. Works against
//! api.openai.com or any OpenAI-compatible endpoint via `base_url`.
//!
//! Config keys:
//! - `api_key`: falls back to the `OPENAI_API_KEY` environment variable
//! - `base_url`: optional custom endpoint
//! - `model_id`: default `gpt-4o-mini`
//! - `max_tokens`: default 2000
//! - `temperature`: default 0.7
//! - `system_prompt`: optional system message sent ahead of the conversation
//!
//! A prediction reads `prompt` from the payload (`max_tokens` and
//! `temperature` may be overridden per call). When a context is supplied its
//! message history is replayed ahead of the prompt.

use std::sync::Arc;

use async_openai::{
    Client,
    config::OpenAIConfig as AsyncOpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use nzr_kernel::{
    BackendError, BackendResult, BackendSpec, Context, ModelBackend, ModelInfo, Payload,
};
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::debug;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_TOKENS: u32 = 2000;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Remote chat-completions model
pub struct OpenAiBackend {
    name: String,
    version: String,
    api_key: Option<String>,
    base_url: Option<String>,
    model_id: String,
    max_tokens: u32,
    temperature: f32,
    system_prompt: Option<String>,
    client: RwLock<Option<Client<AsyncOpenAIConfig>>>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("name", &self.name)
            .field("model_id", &self.model_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    pub fn new(spec: &BackendSpec) -> BackendResult<Self> {
        let max_tokens = match spec.config.get("max_tokens") {
            None | Some(Value::Null) => DEFAULT_MAX_TOKENS,
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    BackendError::Configuration("'max_tokens' must be a positive integer".into())
                })?,
        };

        Ok(Self {
            name: spec.name.clone(),
            version: spec.version().to_string(),
            api_key: spec.str_option("api_key").map(str::to_string),
            base_url: spec.str_option("base_url").map(str::to_string),
            model_id: spec
                .str_option("model_id")
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            max_tokens,
            temperature: spec
                .f64_option("temperature")
                .map(|t| t as f32)
                .unwrap_or(DEFAULT_TEMPERATURE),
            system_prompt: spec.str_option("system_prompt").map(str::to_string),
            client: RwLock::new(None),
        })
    }

    /// Factory registered under the `openai` type name.
    pub fn factory(spec: &BackendSpec) -> BackendResult<Arc<dyn ModelBackend>> {
        Ok(Arc::new(Self::new(spec)?))
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn resolve_api_key(&self) -> BackendResult<String> {
        self.api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|key| !key.is_empty()))
            .ok_or_else(|| {
                BackendError::Configuration(
                    "no 'api_key' configured and OPENAI_API_KEY is not set".into(),
                )
            })
    }

    /// System prompt, then the context history, then the new prompt.
    fn build_messages(
        &self,
        prompt: &str,
        context: Option<&Context>,
    ) -> BackendResult<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::new();

        if let Some(system) = &self.system_prompt {
            messages.push(system_message(system)?);
        }

        if let Some(context) = context {
            for message in &context.messages {
                let converted = match message.role.as_str() {
                    "system" => system_message(&message.content)?,
                    "assistant" => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(message.content.clone())
                        .build()
                        .map_err(|e| BackendError::InvalidInput(e.to_string()))?
                        .into(),
                    _ => user_message(&message.content)?,
                };
                messages.push(converted);
            }
        }

        messages.push(user_message(prompt)?);
        Ok(messages)
    }
}

fn system_message(content: &str) -> BackendResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestSystemMessageArgs::default()
        .content(content.to_string())
        .build()
        .map_err(|e| BackendError::InvalidInput(e.to_string()))?
        .into())
}

fn user_message(content: &str) -> BackendResult<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestUserMessageArgs::default()
        .content(content.to_string())
        .build()
        .map_err(|e| BackendError::InvalidInput(e.to_string()))?
        .into())
}

fn convert_error(err: async_openai::error::OpenAIError) -> BackendError {
    match err {
        async_openai::error::OpenAIError::InvalidArgument(msg) => BackendError::InvalidInput(msg),
        other => BackendError::Remote(other.to_string()),
    }
}

/// Health probes and warmups carry a truthy `test` / `warmup` flag and no
/// `prompt`; they never hit the network.
fn is_synthetic(payload: &Payload) -> bool {
    !payload.contains_key("prompt")
        && ["test", "warmup"]
            .iter()
            .any(|flag| payload.get(*flag).is_some_and(is_truthy))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn describe(&self) -> ModelInfo {
        ModelInfo::from([
            ("name".to_string(), self.name.clone()),
            ("version".to_string(), self.version.clone()),
            ("provider".to_string(), "openai".to_string()),
            ("model_id".to_string(), self.model_id.clone()),
            ("type".to_string(), "language_model".to_string()),
            ("description".to_string(), format!("OpenAI {} model", self.model_id)),
            (
                "capabilities".to_string(),
                "text_generation,chat,completion".to_string(),
            ),
        ])
    }

    async fn load(&self) -> BackendResult<()> {
        let mut config = AsyncOpenAIConfig::new().with_api_key(self.resolve_api_key()?);
        if let Some(base_url) = &self.base_url {
            config = config.with_api_base(base_url);
        }
        *self.client.write() = Some(Client::with_config(config));
        Ok(())
    }

    async fn predict(&self, payload: &Payload, context: Option<&Context>) -> BackendResult<Payload> {
        let client = self.client.read().clone().ok_or(BackendError::NotLoaded)?;

        if is_synthetic(payload) {
            let mut result = Payload::new();
            result.insert("response".into(), Value::String("ok".into()));
            result.insert("model".into(), Value::String(self.model_id.clone()));
            return Ok(result);
        }

        let prompt = payload
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::InvalidInput("payload requires a 'prompt' string".into()))?;
        let max_tokens = payload
            .get("max_tokens")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(self.max_tokens);
        let temperature = payload
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|t| t as f32)
            .unwrap_or(self.temperature);

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_id)
            .messages(self.build_messages(prompt, context)?)
            .max_tokens(max_tokens)
            .temperature(temperature)
            .build()
            .map_err(|e| BackendError::InvalidInput(e.to_string()))?;

        debug!(model = %self.name, model_id = %self.model_id, "Calling chat completions");
        let response = client.chat().create(request).await.map_err(convert_error)?;

        let choice = response.choices.into_iter().next();
        let text = choice
            .as_ref()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let finish_reason = choice
            .and_then(|c| c.finish_reason)
            .and_then(|reason| serde_json::to_value(reason).ok())
            .unwrap_or(Value::Null);

        let mut result = Payload::new();
        result.insert("response".into(), Value::String(text));
        result.insert("model".into(), Value::String(response.model));
        result.insert("finish_reason".into(), finish_reason);
        if let Some(usage) = response.usage {
            result.insert(
                "usage".into(),
                json!({
                    "prompt_tokens": usage.prompt_tokens,
                    "completion_tokens": usage.completion_tokens,
                    "total_tokens": usage.total_tokens,
                }),
            );
        }
        result.insert("context_used".into(), Value::Bool(context.is_some()));
        Ok(result)
    }

    async fn unload(&self) -> BackendResult<()> {
        self.client.write().take();
        Ok(())
    }
}
