// ABOUTME: LLM agent delegating completions to a pluggable backend
// ABOUTME: Includes an HTTP backend for OpenAI-compatible chat completion APIs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{AgentError, Result};
use super::{agent_config, required_str, Agent, AgentBuilder, AgentKind};
use crate::engine::TaskResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<Value>,
}

/// Provider boundary for text completion
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmAgentConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Default)]
pub(crate) struct LlmAgentBuilder {
    backend: Option<Arc<dyn LlmBackend>>,
}

impl LlmAgentBuilder {
    pub(crate) fn new(backend: Arc<dyn LlmBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }
}

impl AgentBuilder for LlmAgentBuilder {
    fn build(&self, config: &Map<String, Value>) -> Result<Box<dyn Agent>> {
        let backend = self
            .backend
            .clone()
            .ok_or_else(|| AgentError::MissingBackend(AgentKind::Llm.to_string()))?;
        let config: LlmAgentConfig = agent_config(AgentKind::Llm.as_str(), config)?;
        Ok(Box::new(LlmAgent::new(backend, config)))
    }
}

pub struct LlmAgent {
    backend: Arc<dyn LlmBackend>,
    config: LlmAgentConfig,
}

impl LlmAgent {
    pub fn new(backend: Arc<dyn LlmBackend>, config: LlmAgentConfig) -> Self {
        Self { backend, config }
    }

    fn request(&self, params: &Map<String, Value>) -> Result<CompletionRequest> {
        let prompt = required_str(params, "prompt")?;
        let param_str = |name: &str| params.get(name).and_then(Value::as_str).map(String::from);

        Ok(CompletionRequest {
            prompt: prompt.to_string(),
            model: param_str("model").or_else(|| self.config.model.clone()),
            system_prompt: param_str("system_prompt").or_else(|| self.config.system_prompt.clone()),
            temperature: params
                .get("temperature")
                .and_then(Value::as_f64)
                .or(self.config.temperature),
            max_tokens: params
                .get("max_tokens")
                .and_then(Value::as_u64)
                .map(|n| n as u32)
                .or(self.config.max_tokens),
        })
    }
}

#[async_trait]
impl Agent for LlmAgent {
    async fn execute(&self, params: &Map<String, Value>) -> Result<TaskResult> {
        let request = self.request(params)?;
        info!(
            "Executing LLM request with model '{}'",
            request.model.as_deref().unwrap_or("default")
        );

        let completion = self.backend.complete(&request).await?;
        let mut result = TaskResult::success(completion.text.clone()).with_raw(json!({
            "response": completion.text,
            "model": completion.model,
            "usage": completion.usage,
        }));
        if let Some(model) = completion.model {
            result.add_metadata("model", model);
        }
        Ok(result)
    }
}

/// Chat-completions client for OpenAI-compatible endpoints
pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        })
    }

    fn payload(&self, request: &CompletionRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut payload = json!({
            "model": request.model.as_deref().unwrap_or(&self.default_model),
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        payload
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("POST {}", url);

        let mut http_request = self.client.post(&url).json(&self.payload(request));
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key);
        }

        let response = http_request.send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(AgentError::Backend(format!(
                "completion endpoint returned {}: {}",
                status, body
            )));
        }

        let text = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::Backend("completion response has no content".to_string()))?;

        Ok(Completion {
            text: text.to_string(),
            model: body.get("model").and_then(Value::as_str).map(String::from),
            usage: body.get("usage").cloned(),
        })
    }
}
