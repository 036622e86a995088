// ABOUTME: API connector agent issuing HTTP requests against a configured base URL
// ABOUTME: Authenticates with a bearer key and exposes the decoded response body

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{AgentError, Result};
use super::{agent_config, Agent, AgentBuilder, AgentKind};
use crate::engine::TaskResult;

/// Fallback variable for the bearer key
pub const API_KEY_ENV: &str = "API_KEY";

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConnectorConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct RequestParams {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    query: Map<String, Value>,
    #[serde(default)]
    body: Option<Value>,
}

pub(crate) struct ApiConnectorBuilder;

impl AgentBuilder for ApiConnectorBuilder {
    fn build(&self, config: &Map<String, Value>) -> Result<Box<dyn Agent>> {
        if !config.contains_key("agent_config") {
            return Err(AgentError::MissingConfig(AgentKind::ApiConnector.to_string()));
        }
        let config: ApiConnectorConfig = agent_config(AgentKind::ApiConnector.as_str(), config)?;
        Ok(Box::new(ApiConnectorAgent::new(config)?))
    }
}

pub struct ApiConnectorAgent {
    client: reqwest::Client,
    base_url: String,
}

fn invalid(message: impl Into<String>) -> AgentError {
    AgentError::InvalidConfig {
        agent: AgentKind::ApiConnector.to_string(),
        message: message.into(),
    }
}

impl ApiConnectorAgent {
    pub fn new(config: ApiConnectorConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(invalid("base_url cannot be empty"));
        }

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| invalid(format!("header '{}': {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid(format!("header '{}': {}", key, e)))?;
            headers.insert(name, value);
        }

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok());
        if let Some(api_key) = api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| invalid(format!("api key: {}", e)))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        let endpoint = endpoint.trim_start_matches('/');
        if endpoint.is_empty() {
            format!("{}/", self.base_url)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }
}

fn query_pairs(query: &Map<String, Value>) -> Vec<(String, String)> {
    query
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

#[async_trait]
impl Agent for ApiConnectorAgent {
    async fn execute(&self, params: &Map<String, Value>) -> Result<TaskResult> {
        let request: RequestParams = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| invalid(format!("request params: {}", e)))?;

        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| invalid(format!("unsupported HTTP method: {}", request.method)))?;
        let url = self.url(&request.endpoint);
        info!("API request: {} {}", method, url);

        let mut http_request = self.client.request(method, &url);
        if !request.query.is_empty() {
            http_request = http_request.query(&query_pairs(&request.query));
        }
        if let Some(body) = &request.body {
            http_request = http_request.json(body);
        }

        let response = http_request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let data = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.clone()))
        };
        debug!("API response {} ({} bytes)", status, text.len());

        let raw = json!({"status_code": status.as_u16(), "data": data});
        if status.is_success() {
            Ok(TaskResult::success(text)
                .with_raw(raw)
                .with_metadata("status_code", status.as_u16()))
        } else {
            warn!("API request to {} failed with status {}", url, status);
            Ok(TaskResult::error(format!("HTTP {} from {}", status, url))
                .with_raw(raw)
                .with_metadata("status_code", status.as_u16()))
        }
    }
}
