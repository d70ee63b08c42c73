//! Resource processor configuration
//!
//! Loaded once at process start and passed down explicitly. Values come from
//! environment variables; deployment tool parameters can also be looked up
//! here by name.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::time::Duration;

/// Prefix of environment variables forwarded as bundle parameters
const BUNDLE_PARAM_PREFIX: &str = "RP_BUNDLE_";

/// Resource processor configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Container registry hosting the bundles (e.g. "tredev.azurecr.io")
    pub registry_server: String,
    pub tfstate_container_name: String,
    pub tfstate_resource_group_name: String,
    pub tfstate_storage_account_name: String,

    pub resource_request_queue: String,
    pub deployment_status_queue: String,

    /// Client id of the managed identity, when running with one
    pub vmss_msi_id: Option<String>,

    /// Number of workers in the pool
    pub number_processes: usize,

    pub arm_use_msi: bool,
    pub arm_subscription_id: String,
    pub arm_client_id: String,
    pub arm_tenant_id: String,
    /// Only read when `arm_use_msi` is off
    pub arm_client_secret: String,
    pub azure_environment: String,

    pub porter_binary: String,
    pub az_binary: String,

    /// Extra bundle parameters, keyed by lowercase name
    pub bundle_params: HashMap<String, String>,

    /// Environment the deployment tool runs with
    pub porter_env: HashMap<String, String>,

    /// How long a request session lock is kept alive while a deployment runs
    pub max_lock_renewal: Duration,
}

impl RunnerConfig {
    /// Creates configuration from environment variables
    ///
    /// Required: REGISTRY_SERVER, TERRAFORM_STATE_CONTAINER_NAME,
    /// MGMT_RESOURCE_GROUP_NAME, MGMT_STORAGE_ACCOUNT_NAME,
    /// AZURE_SUBSCRIPTION_ID, ARM_CLIENT_ID, AZURE_TENANT_ID, and
    /// ARM_CLIENT_SECRET unless ARM_USE_MSI is "true".
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Creates configuration from a set of variables
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let lookup = |name: &str| vars.get(name).cloned();
        let required = |name: &str| {
            lookup(name).with_context(|| format!("{} environment variable not set", name))
        };

        let number_processes = match lookup("NUMBER_PROCESSES") {
            None => 1,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::info!("Invalid setting for NUMBER_PROCESSES ({}), will default to 1", raw);
                    1
                }
            },
        };

        let arm_use_msi = lookup("ARM_USE_MSI")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let arm_client_secret = if arm_use_msi {
            String::new()
        } else {
            required("ARM_CLIENT_SECRET")?
        };

        let mut config = Self {
            registry_server: required("REGISTRY_SERVER")?,
            tfstate_container_name: required("TERRAFORM_STATE_CONTAINER_NAME")?,
            tfstate_resource_group_name: required("MGMT_RESOURCE_GROUP_NAME")?,
            tfstate_storage_account_name: required("MGMT_STORAGE_ACCOUNT_NAME")?,
            resource_request_queue: lookup("SERVICE_BUS_RESOURCE_REQUEST_QUEUE")
                .unwrap_or_else(|| "resource-request".to_string()),
            deployment_status_queue: lookup("SERVICE_BUS_DEPLOYMENT_STATUS_UPDATE_QUEUE")
                .unwrap_or_else(|| "deployment-status-update".to_string()),
            vmss_msi_id: lookup("VMSS_MSI_ID").filter(|v| !v.is_empty()),
            number_processes,
            arm_use_msi,
            arm_subscription_id: required("AZURE_SUBSCRIPTION_ID")?,
            arm_client_id: required("ARM_CLIENT_ID")?,
            arm_tenant_id: required("AZURE_TENANT_ID")?,
            arm_client_secret,
            azure_environment: lookup("AZURE_ENVIRONMENT").unwrap_or_else(|| "AzureCloud".to_string()),
            porter_binary: lookup("PORTER_BINARY").unwrap_or_else(|| "porter".to_string()),
            az_binary: lookup("AZ_BINARY").unwrap_or_else(|| "az".to_string()),
            bundle_params: HashMap::new(),
            porter_env: HashMap::new(),
            max_lock_renewal: Duration::from_secs(3600),
        };

        config.bundle_params = vars
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(BUNDLE_PARAM_PREFIX)
                    .map(|name| (name.to_lowercase(), value.clone()))
            })
            .collect();

        config.porter_env = config.build_porter_env(lookup("HOME"), lookup("PATH"));
        Ok(config)
    }

    fn build_porter_env(&self, home: Option<String>, path: Option<String>) -> HashMap<String, String> {
        HashMap::from([
            ("HOME".to_string(), home.unwrap_or_default()),
            ("PATH".to_string(), path.unwrap_or_default()),
            ("ARM_CLIENT_ID".to_string(), self.arm_client_id.clone()),
            ("ARM_CLIENT_SECRET".to_string(), self.arm_client_secret.clone()),
            ("ARM_SUBSCRIPTION_ID".to_string(), self.arm_subscription_id.clone()),
            ("ARM_TENANT_ID".to_string(), self.arm_tenant_id.clone()),
        ])
    }

    /// Registry name without its domain (`tredev.azurecr.io` -> `tredev`)
    pub fn acr_name(&self) -> &str {
        self.registry_server
            .split_once('.')
            .map(|(name, _)| name)
            .unwrap_or(&self.registry_server)
    }

    /// Looks up a configuration value by deployment tool parameter name
    pub fn parameter(&self, name: &str) -> Option<String> {
        let value = match name {
            "registry_server" => &self.registry_server,
            "tfstate_container_name" => &self.tfstate_container_name,
            "tfstate_resource_group_name" => &self.tfstate_resource_group_name,
            "tfstate_storage_account_name" => &self.tfstate_storage_account_name,
            "arm_subscription_id" => &self.arm_subscription_id,
            "arm_client_id" => &self.arm_client_id,
            "arm_tenant_id" => &self.arm_tenant_id,
            "arm_client_secret" => &self.arm_client_secret,
            "arm_use_msi" => return Some(self.arm_use_msi.to_string()),
            "vmss_msi_id" => return self.vmss_msi_id.clone(),
            _ => return None,
        };
        Some(value.clone())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.registry_server.is_empty() {
            bail!("registry_server cannot be empty");
        }

        if self.resource_request_queue.is_empty() || self.deployment_status_queue.is_empty() {
            bail!("queue names cannot be empty");
        }

        if self.resource_request_queue == self.deployment_status_queue {
            bail!("request and status queues must differ");
        }

        if self.number_processes == 0 {
            bail!("number_processes must be greater than 0");
        }

        if self.vmss_msi_id.is_none() && !self.arm_use_msi && self.arm_client_secret.is_empty() {
            bail!("ARM_CLIENT_SECRET is required without a managed identity");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let mut config = Self {
            registry_server: "tredev.azurecr.io".to_string(),
            tfstate_container_name: "tfstate".to_string(),
            tfstate_resource_group_name: "rg-tredev-mgmt".to_string(),
            tfstate_storage_account_name: "sttredevmgmt".to_string(),
            resource_request_queue: "resource-request".to_string(),
            deployment_status_queue: "deployment-status-update".to_string(),
            vmss_msi_id: None,
            number_processes: 1,
            arm_use_msi: false,
            arm_subscription_id: String::new(),
            arm_client_id: String::new(),
            arm_tenant_id: String::new(),
            arm_client_secret: String::new(),
            azure_environment: "AzureCloud".to_string(),
            porter_binary: "porter".to_string(),
            az_binary: "az".to_string(),
            bundle_params: HashMap::new(),
            porter_env: HashMap::new(),
            max_lock_renewal: Duration::from_secs(3600),
        };
        config.porter_env = config.build_porter_env(None, None);
        config
    }
}
