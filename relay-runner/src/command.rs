//! Subprocess execution
//!
//! Commands are argument vectors, never shell strings, so parameter values can
//! not inject extra commands. Execution sits behind `CommandRunner` so the
//! deployment flow can be exercised without the real tools installed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::DeploymentError;

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Arguments carry secrets and are never displayed
    pub sensitive: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            sensitive: false,
        }
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sensitive {
            let shown = self.args.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
            return write!(f, "{} {} ***", self.program, shown);
        }
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit code and captured streams of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `command` to completion with exactly the environment `env`
    async fn run(&self, command: &CommandSpec, env: &HashMap<String, String>) -> Result<CommandOutput, DeploymentError>;
}

/// Runs commands as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec, env: &HashMap<String, String>) -> Result<CommandOutput, DeploymentError> {
        debug!("Executing {}", command);

        let output = Command::new(&command.program)
            .args(&command.args)
            .env_clear()
            .envs(env)
            .output()
            .await
            .map_err(|source| DeploymentError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let result = CommandOutput {
            // Killed by a signal: no exit code
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !command.sensitive {
            for line in result.stdout.lines().filter(|l| !l.trim().is_empty()) {
                info!("[stdout] {}", line);
            }
        }
        for line in result.stderr.lines().filter(|l| !l.trim().is_empty()) {
            warn!("[stderr] {}", line);
        }

        if result.success() {
            debug!("{} completed successfully", command.program);
        } else {
            warn!("{} exited with code {}", command.program, result.code);
        }

        Ok(result)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_masks_sensitive_commands() {
        let login = CommandSpec::new("az", ["login", "--service-principal", "--password", "hunter2"]).sensitive();
        assert_eq!(login.to_string(), "az login --service-principal ***");

        let explain = CommandSpec::new("porter", ["explain", "--output", "json"]);
        assert_eq!(explain.to_string(), "porter explain --output json");
        assert!(explain.has_arg("explain"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let command = CommandSpec::new("relay-definitely-not-installed", ["--version"]);
        let err = ProcessRunner.run(&command, &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, DeploymentError::Spawn { .. }));
    }
}
