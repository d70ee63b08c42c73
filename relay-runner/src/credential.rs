//! Deployment tool identity
//!
//! The credential is opened once per worker and closed when the worker stops.
//! It decides between the managed identity (when `VMSS_MSI_ID` is set) and a
//! service principal, and produces the login sub-commands run before every
//! deployment tool invocation.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::command::CommandSpec;
use crate::config::RunnerConfig;
use crate::error::DeploymentError;

const ARM_CREDENTIAL_SET: &str = "vmss_porter/arm_auth_local_debugging.json";
const AAD_CREDENTIAL_SET_MSI: &str = "vmss_porter/aad_auth.json";
const AAD_CREDENTIAL_SET_SP: &str = "vmss_porter/aad_auth_local_debugging.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    ManagedIdentity {
        client_id: String,
    },
    ServicePrincipal {
        client_id: String,
        client_secret: String,
        tenant_id: String,
    },
}

#[derive(Debug)]
pub struct Credential {
    identity: Identity,
    az_binary: String,
    porter_binary: String,
    azure_environment: String,
    acr_name: String,
    open: AtomicBool,
}

impl Credential {
    pub fn open(config: &RunnerConfig) -> Result<Self, DeploymentError> {
        let identity = match &config.vmss_msi_id {
            Some(client_id) => Identity::ManagedIdentity {
                client_id: client_id.clone(),
            },
            None if config.arm_client_secret.is_empty() => {
                return Err(DeploymentError::Credential(
                    "no managed identity and no client secret".to_string(),
                ));
            }
            None => Identity::ServicePrincipal {
                client_id: config.arm_client_id.clone(),
                client_secret: config.arm_client_secret.clone(),
                tenant_id: config.arm_tenant_id.clone(),
            },
        };

        match &identity {
            Identity::ManagedIdentity { client_id } => info!("Using managed identity {}", client_id),
            Identity::ServicePrincipal { client_id, .. } => info!("Using service principal {}", client_id),
        }

        Ok(Self {
            identity,
            az_binary: config.az_binary.clone(),
            porter_binary: config.porter_binary.clone(),
            azure_environment: config.azure_environment.clone(),
            acr_name: config.acr_name().to_string(),
            open: AtomicBool::new(true),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Credential closed");
        }
    }

    /// Cloud selection, login and registry login
    pub fn login_commands(&self) -> Result<Vec<CommandSpec>, DeploymentError> {
        if !self.is_open() {
            return Err(DeploymentError::CredentialClosed);
        }

        let login = match &self.identity {
            Identity::ManagedIdentity { client_id } => {
                CommandSpec::new(&self.az_binary, ["login", "--identity", "-u", client_id.as_str()])
            }
            Identity::ServicePrincipal {
                client_id,
                client_secret,
                tenant_id,
            } => CommandSpec::new(
                &self.az_binary,
                [
                    "login",
                    "--service-principal",
                    "--username",
                    client_id.as_str(),
                    "--password",
                    client_secret.as_str(),
                    "--tenant",
                    tenant_id.as_str(),
                ],
            ),
        };

        Ok(vec![
            CommandSpec::new(&self.az_binary, ["cloud", "set", "--name", self.azure_environment.as_str()]),
            login.sensitive(),
            CommandSpec::new(&self.az_binary, ["acr", "login", "--name", self.acr_name.as_str()]),
        ])
    }

    /// Credential sets the deployment tool needs applied before running a bundle
    pub fn credential_set_commands(&self) -> Result<Vec<CommandSpec>, DeploymentError> {
        if !self.is_open() {
            return Err(DeploymentError::CredentialClosed);
        }

        let aad = match self.identity {
            Identity::ManagedIdentity { .. } => AAD_CREDENTIAL_SET_MSI,
            Identity::ServicePrincipal { .. } => AAD_CREDENTIAL_SET_SP,
        };

        Ok([ARM_CREDENTIAL_SET, aad]
            .into_iter()
            .map(|file| CommandSpec::new(&self.porter_binary, ["credentials", "apply", file]))
            .collect())
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.close();
    }
}
