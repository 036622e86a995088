// ABOUTME: Configuration management for the dagflow application
// ABOUTME: Handles loading configuration from files and environment overrides

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::agents::AgentKind;
use crate::engine::FailurePolicy;
use crate::state::DEFAULT_STATE_DIR;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_retries")]
    pub default_retries: u32,

    #[serde(default)]
    pub retry_delay_ms: u64,

    #[serde(default = "default_strict_validation")]
    pub strict_validation: bool,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub llm: Option<LlmConfig>,

    #[serde(default)]
    pub api_connector: Option<ApiConnectorDefaults>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Backend for the built-in llm agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_llm_key_env")]
    pub api_key_env: String,
}

/// Defaults merged into api_connector tasks that leave them unset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConnectorDefaults {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_retries() -> u32 {
    1
}

fn default_strict_validation() -> bool {
    true
}

fn default_llm_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            default_retries: default_retries(),
            retry_delay_ms: 0,
            strict_validation: default_strict_validation(),
            failure_policy: FailurePolicy::default(),
            logging: LoggingConfig::default(),
            llm: None,
            api_connector: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => Some(p),
            None => Self::find_config_file(),
        };

        let mut config = match config_path {
            Some(path) if path.exists() => {
                let contents = std::fs::read_to_string(&path)?;
                serde_yaml::from_str(&contents)?
            }
            _ => Config::default(),
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let local = [
            "dagflow.yaml",
            "dagflow.yml",
            ".dagflow.yaml",
            ".dagflow.yml",
        ]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists());

        local.or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".dagflow").join("config.yaml"))
                .filter(|path| path.exists())
        })
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var("DAGFLOW_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Ok(retries) = std::env::var("DAGFLOW_RETRIES") {
            self.default_retries = retries.parse()?;
        }
        if let Ok(level) = std::env::var("DAGFLOW_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("DAGFLOW_LOG_FORMAT") {
            self.logging.format = format;
        }
        Ok(())
    }

    /// Fill unset api_connector settings of every task from the defaults
    pub fn apply_agent_defaults(&self, document: &mut Value) {
        let Some(defaults) = &self.api_connector else {
            return;
        };
        let Some(tasks) = document.get_mut("tasks").and_then(Value::as_object_mut) else {
            return;
        };

        for task in tasks.values_mut() {
            if task.get("type").and_then(Value::as_str) != Some(AgentKind::ApiConnector.as_str()) {
                continue;
            }
            let Some(task) = task.as_object_mut() else {
                continue;
            };

            let config = task
                .entry("config")
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(config) = config.as_object_mut() else {
                continue;
            };
            let agent_config = config
                .entry("agent_config")
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(agent_config) = agent_config.as_object_mut() else {
                continue;
            };

            if let Some(base_url) = &defaults.base_url {
                agent_config
                    .entry("base_url")
                    .or_insert_with(|| Value::String(base_url.clone()));
            }
            if let Some(key) = defaults
                .api_key_env
                .as_ref()
                .and_then(|name| std::env::var(name).ok())
            {
                agent_config
                    .entry("api_key")
                    .or_insert(Value::String(key));
            }
        }
    }
}
