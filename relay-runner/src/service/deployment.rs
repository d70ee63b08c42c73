//! Deployment service
//!
//! Handles one resource request end to end:
//! - Reporting the in-progress status
//! - Logging in and running the deployment tool
//! - Recovering from upgrade-of-absent and uninstall-of-absent
//! - Collecting outputs and reporting the terminal status

use relay_bus::{OutgoingMessage, SessionBroker};
use relay_core::domain::status::{RequestAction, Status};
use relay_core::dto::request::ResourceRequestMessage;
use relay_core::dto::status_update::{DeploymentStatusUpdateMessage, Output};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::RunnerConfig;
use crate::credential::Credential;
use crate::error::DeploymentError;
use crate::porter;

pub const IN_PROGRESS_MESSAGE: &str = "Job starting";

const NOT_INSTALLED: &str = "could not find installation";
const NOT_UPGRADABLE: &str = "cannot be upgraded, because it is not installed";

/// How a request ended
enum ActionResult {
    /// The tool succeeded running `action` (which differs from the request's when it fell back)
    Succeeded { action: RequestAction, note: Option<String> },
    /// Uninstall of an installation that does not exist
    AlreadyUninstalled,
    Failed(String),
}

pub struct DeploymentService {
    config: Arc<RunnerConfig>,
    credential: Arc<Credential>,
    runner: Arc<dyn CommandRunner>,
    broker: Arc<dyn SessionBroker>,
}

impl DeploymentService {
    pub fn new(
        config: Arc<RunnerConfig>,
        credential: Arc<Credential>,
        runner: Arc<dyn CommandRunner>,
        broker: Arc<dyn SessionBroker>,
    ) -> Self {
        Self {
            config,
            credential,
            runner,
            broker,
        }
    }

    /// Runs the requested action and reports it on the status queue
    ///
    /// Exactly two status messages are sent: in progress, then pass or fail.
    /// The return value says whether the action succeeded and is only used for
    /// logging; the request message is settled regardless.
    pub async fn invoke_porter_action(&self, message: &ResourceRequestMessage) -> bool {
        match self.deploy(message).await {
            Ok(succeeded) => succeeded,
            Err(e) => {
                error!("Could not report status for {}: {}", message.id, e);
                false
            }
        }
    }

    async fn deploy(&self, message: &ResourceRequestMessage) -> Result<bool, DeploymentError> {
        info!("{} action starting", message.action);
        self.send_status(message, message.action.in_progress_status(), IN_PROGRESS_MESSAGE, Vec::new())
            .await?;

        let (status, text, outputs, succeeded) = match self.run_with_recovery(message).await {
            ActionResult::Succeeded { action, note } => match self.fetch_outputs(message).await {
                Ok(outputs) => {
                    let mut text = format!("{} action completed successfully.", action);
                    if let Some(note) = note {
                        text = format!("{} {}", note, text);
                    }
                    (action.success_status(), text, outputs, true)
                }
                // The deployment itself went through, but without its outputs
                // downstream steps cannot be computed, so the request fails.
                Err(e) => {
                    warn!("Deployment succeeded but outputs are unavailable: {}", e);
                    (action.failure_status(), e.to_string(), Vec::new(), false)
                }
            },
            ActionResult::AlreadyUninstalled => (
                message.action.success_status(),
                "Installation not found, nothing to uninstall.".to_string(),
                Vec::new(),
                true,
            ),
            ActionResult::Failed(text) => (message.action.failure_status(), text, Vec::new(), false),
        };

        if succeeded {
            info!("{}", text);
        } else {
            warn!("{} action failed: {}", message.action, text);
        }

        self.send_status(message, status, &text, outputs).await?;
        Ok(succeeded)
    }

    async fn run_with_recovery(&self, message: &ResourceRequestMessage) -> ActionResult {
        let action = &message.action;

        let (command, output) = match self.run_action(message, action).await {
            Ok(ran) => ran,
            Err(e) => return ActionResult::Failed(e.to_string()),
        };

        if output.success() {
            return ActionResult::Succeeded {
                action: action.clone(),
                note: None,
            };
        }

        if *action == RequestAction::Upgrade
            && (output.stderr.contains(NOT_INSTALLED) || output.stderr.contains(NOT_UPGRADABLE))
        {
            warn!("Upgrade target is not installed, retrying as install");
            return match self.run_action(message, &RequestAction::Install).await {
                Ok((_, retry)) if retry.success() => ActionResult::Succeeded {
                    action: RequestAction::Install,
                    note: Some("Upgrade target was not installed, installed instead.".to_string()),
                },
                Ok((retry_command, retry)) => ActionResult::Failed(failure_message(&retry, &retry_command)),
                Err(e) => ActionResult::Failed(e.to_string()),
            };
        }

        if *action == RequestAction::Uninstall && output.stderr.contains(NOT_INSTALLED) {
            info!("Installation already absent, treating uninstall as done");
            return ActionResult::AlreadyUninstalled;
        }

        ActionResult::Failed(failure_message(&output, &command))
    }

    /// Logs in, discovers the bundle parameters and runs `action`
    async fn run_action(
        &self,
        message: &ResourceRequestMessage,
        action: &RequestAction,
    ) -> Result<(CommandSpec, CommandOutput), DeploymentError> {
        let setup = self
            .credential
            .login_commands()?
            .into_iter()
            .chain(self.credential.credential_set_commands()?);
        for command in setup {
            let output = self.run(&command).await?;
            if !output.success() {
                return Err(DeploymentError::CommandFailed {
                    description: format!("{} {}", command.program, command.args.first().map_or("", String::as_str)),
                    message: failure_message(&output, &command),
                });
            }
        }

        let parameter_names = self.parameter_names(message).await;
        let command = porter::action_command(&self.config, message, action, parameter_names.as_deref());
        info!("Running {} {}", action, message.id);
        let output = self.run(&command).await?;
        Ok((command, output))
    }

    async fn parameter_names(&self, message: &ResourceRequestMessage) -> Option<Vec<String>> {
        let command = porter::explain_command(&self.config, message);
        let output = match self.run(&command).await {
            Ok(output) if output.success() => output,
            Ok(_) | Err(_) => {
                warn!("Unknown porter parameters - explain failed");
                return None;
            }
        };

        porter::parse_parameter_names(&output.stdout)
            .inspect_err(|e| warn!("Failed to parse porter explain output: {}", e))
            .ok()
    }

    async fn fetch_outputs(&self, message: &ResourceRequestMessage) -> Result<Vec<Output>, DeploymentError> {
        let command = porter::outputs_command(&self.config, message);
        let output = self.run(&command).await?;
        if !output.success() {
            return Err(DeploymentError::OutputsUnavailable(failure_message(&output, &command)));
        }

        let outputs = porter::parse_outputs(&output.stdout)
            .map_err(|e| DeploymentError::OutputsUnavailable(e.to_string()))?;
        info!("Got {} output(s)", outputs.len());
        Ok(outputs)
    }

    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, DeploymentError> {
        self.runner.run(command, &self.config.porter_env).await
    }

    async fn send_status(
        &self,
        message: &ResourceRequestMessage,
        status: Status,
        text: &str,
        outputs: Vec<Output>,
    ) -> Result<(), DeploymentError> {
        let update = DeploymentStatusUpdateMessage::new(message.operation_id, &message.step_id, message.id, status, text)
            .with_outputs(outputs);

        let outgoing = OutgoingMessage::json(&update, message.id.to_string(), message.operation_id.to_string())?;
        self.broker
            .send(&self.config.deployment_status_queue, outgoing)
            .await?;

        info!("Sent status {}", status);
        Ok(())
    }
}

/// Failure text reported to the status queue
pub(crate) fn failure_message(output: &CommandOutput, command: &CommandSpec) -> String {
    let stderr = output.stderr.trim_end().replace('\n', " ");
    format!("Error message: {}; Command executed: {}", stderr, command)
}
