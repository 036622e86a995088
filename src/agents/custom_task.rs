// ABOUTME: Custom task agent running an external program per task
// ABOUTME: Sends params as JSON on stdin and captures stdout as the task output

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

use super::error::{AgentError, Result};
use super::{agent_config, Agent, AgentBuilder, AgentKind};
use crate::engine::TaskResult;

/// Configuration for an external task program
///
/// ```yaml
/// type: custom_task
/// config:
///   agent_config:
///     command: python3
///     args: ["scripts/score.py"]
///     timeout_seconds: 60
///   params:
///     text: "{{ingest.output}}"
/// ```
///
/// The program reads the params object from stdin. Its stdout becomes the
/// task output, and is also parsed as JSON into `raw` when possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTaskConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

pub(crate) struct CustomTaskBuilder;

impl AgentBuilder for CustomTaskBuilder {
    fn build(&self, config: &Map<String, Value>) -> Result<Box<dyn Agent>> {
        if !config.contains_key("agent_config") {
            return Err(AgentError::MissingConfig(AgentKind::CustomTask.to_string()));
        }
        let config: CustomTaskConfig = agent_config(AgentKind::CustomTask.as_str(), config)?;
        Ok(Box::new(CustomTaskAgent::new(config)?))
    }
}

pub struct CustomTaskAgent {
    config: CustomTaskConfig,
}

impl CustomTaskAgent {
    pub fn new(config: CustomTaskConfig) -> Result<Self> {
        if config.command.trim().is_empty() {
            return Err(AgentError::InvalidConfig {
                agent: AgentKind::CustomTask.to_string(),
                message: "command cannot be empty".to_string(),
            });
        }
        if config.timeout_seconds == Some(0) {
            return Err(AgentError::InvalidConfig {
                agent: AgentKind::CustomTask.to_string(),
                message: "timeout must be greater than 0".to_string(),
            });
        }
        Ok(Self { config })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        if let Some(ref working_dir) = self.config.working_dir {
            cmd.current_dir(working_dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, input: Vec<u8>) -> Result<std::process::Output> {
        let mut child = self.command().spawn()?;
        let stdin = child.stdin.take();

        // Stdin is fed while output is drained, so filters that echo as they
        // read never fill the stdout pipe while we are still writing
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(&input).await {
                Ok(()) => Ok(()),
                // Programs that never read stdin may exit before the write lands
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("Command closed stdin before reading params");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        fed?;
        Ok(output)
    }
}

#[async_trait]
impl Agent for CustomTaskAgent {
    async fn execute(&self, params: &Map<String, Value>) -> Result<TaskResult> {
        info!(
            "Executing custom task: {} {:?}",
            self.config.command, self.config.args
        );
        let input = serde_json::to_vec(params)?;

        let output = match self.config.timeout_seconds {
            Some(secs) => match timeout(Duration::from_secs(secs), self.run(input)).await {
                Ok(output) => output?,
                Err(_) => {
                    let message = format!("Command timed out after {} seconds", secs);
                    error!("{}", message);
                    return Ok(TaskResult::error(message));
                }
            },
            None => self.run(input).await?,
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        debug!("Command completed with exit code: {}", exit_code);

        if !output.status.success() {
            let message = if stderr.is_empty() {
                format!("Command '{}' exited with code {}", self.config.command, exit_code)
            } else {
                format!(
                    "Command '{}' exited with code {}: {}",
                    self.config.command, exit_code, stderr
                )
            };
            error!("{}", message);
            return Ok(TaskResult::error(message).with_metadata("exit_code", exit_code));
        }

        let raw = serde_json::from_str(&stdout).unwrap_or(Value::Null);
        let mut result = TaskResult::success(stdout)
            .with_raw(raw)
            .with_metadata("exit_code", exit_code);
        if !stderr.is_empty() {
            result.add_metadata("stderr", stderr);
        }
        Ok(result)
    }
}
