//! Porter command building and output parsing
//!
//! The bundle for a request is `<registry>/<name>:v<version>`. Its declared
//! parameters are discovered with `porter explain` and each is filled from the
//! request or the configuration.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use relay_core::domain::status::RequestAction;
use relay_core::dto::request::ResourceRequestMessage;
use relay_core::dto::status_update::Output;
use serde::Deserialize;
use serde_json::Value;

use crate::command::CommandSpec;
use crate::config::RunnerConfig;

/// Output porter adds to every installation, which only holds logs
const INVOCATION_IMAGE_LOGS: &str = "io.cnab.outputs.invocationImageLogs";

pub fn bundle_reference(config: &RunnerConfig, message: &ResourceRequestMessage) -> String {
    format!("{}/{}:v{}", config.registry_server, message.name, message.version)
}

/// `porter explain`, listing the parameters the bundle declares
pub fn explain_command(config: &RunnerConfig, message: &ResourceRequestMessage) -> CommandSpec {
    CommandSpec::new(
        &config.porter_binary,
        [
            "explain".to_string(),
            "--reference".to_string(),
            bundle_reference(config, message),
            "--output".to_string(),
            "json".to_string(),
        ],
    )
}

#[derive(Deserialize)]
struct Explain {
    #[serde(default)]
    parameters: Vec<ExplainParameter>,
}

#[derive(Deserialize)]
struct ExplainParameter {
    name: String,
}

pub fn parse_parameter_names(stdout: &str) -> Result<Vec<String>, serde_json::Error> {
    let explain: Explain = serde_json::from_str(stdout)?;
    Ok(explain.parameters.into_iter().map(|p| p.name).collect())
}

/// Finds the value for one bundle parameter
///
/// Looked up in order: the request's `parameters`, the configuration, a top
/// level field of the request, the request's user (`user_<field>`), and
/// finally parameters whose names differ from where their value lives.
pub fn resolve_parameter(config: &RunnerConfig, message: &ResourceRequestMessage, name: &str) -> Option<Value> {
    if let Some(value) = message.parameters.get(name) {
        return Some(value.clone()).filter(|v| !v.is_null());
    }

    if let Some(value) = config.parameter(name) {
        return Some(Value::String(value));
    }

    if let Some(value) = message.field(name) {
        return Some(value);
    }

    if let Some(user_field) = name.strip_prefix("user_")
        && let Some(value) = message
            .user
            .as_ref()
            .and_then(|user| serde_json::to_value(user).ok())
            .and_then(|user| user.get(user_field).cloned())
    {
        return Some(value);
    }

    special_parameter(config, message, name)
}

fn special_parameter(config: &RunnerConfig, message: &ResourceRequestMessage, name: &str) -> Option<Value> {
    let value = match name {
        "mgmt_acr_name" => Some(config.acr_name().to_string()),
        "mgmt_resource_group_name" => Some(config.tfstate_resource_group_name.clone()),
        "azure_environment" => Some(config.azure_environment.clone()),
        "workspace_id" => message.workspace_id.map(|id| id.to_string()),
        "parent_service_id" => message.parent_workspace_service_id.map(|id| id.to_string()),
        "owner_id" => message.owner_id.clone(),
        _ => config.bundle_params.get(&name.to_lowercase()).cloned(),
    };
    value.map(Value::String)
}

/// Renders a parameter value for the command line; structured values are base64 encoded JSON
pub fn encode_parameter(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => STANDARD.encode(value.to_string()),
        other => other.to_string(),
    }
}

/// The command running `action` for the request
///
/// `parameter_names` is `None` when the bundle's parameters could not be
/// discovered, in which case porter reports the missing ones itself.
pub fn action_command(
    config: &RunnerConfig,
    message: &ResourceRequestMessage,
    action: &RequestAction,
    parameter_names: Option<&[String]>,
) -> CommandSpec {
    let mut args: Vec<String> = Vec::new();

    if action.is_custom() {
        args.extend(["invoke".to_string(), "--action".to_string()]);
    }
    args.push(action.as_str().to_string());
    args.push(message.id.to_string());
    args.push("--reference".to_string());
    args.push(bundle_reference(config, message));

    for name in parameter_names.unwrap_or_default() {
        if let Some(value) = resolve_parameter(config, message, name) {
            args.push("--param".to_string());
            args.push(format!("{}={}", name, encode_parameter(&value)));
        }
    }

    args.extend(
        ["--force", "--credential-set", "arm_auth", "--credential-set", "aad_auth"]
            .map(String::from),
    );

    if *action == RequestAction::Upgrade {
        args.push("--force-upgrade".to_string());
    }

    CommandSpec::new(&config.porter_binary, args)
}

/// The command listing an installation's outputs as JSON
pub fn outputs_command(config: &RunnerConfig, message: &ResourceRequestMessage) -> CommandSpec {
    CommandSpec::new(
        &config.porter_binary,
        [
            "installations".to_string(),
            "output".to_string(),
            "list".to_string(),
            "--installation".to_string(),
            message.id.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ],
    )
}

/// Parses `porter installations output list` JSON
///
/// String values that look like embedded JSON are decoded so that consumers see
/// structured values; they are kept verbatim when they do not parse.
pub fn parse_outputs(stdout: &str) -> Result<Vec<Output>, serde_json::Error> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let outputs: Vec<Output> = serde_json::from_str(stdout)?;
    Ok(outputs
        .into_iter()
        .filter(|output| output.name != INVOCATION_IMAGE_LOGS)
        .map(|mut output| {
            if let Value::String(raw) = &output.value
                && (raw.contains('{') || raw.contains('['))
                && let Ok(decoded) = serde_json::from_str::<Value>(raw)
            {
                output.value = decoded;
            }
            output
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::domain::user::User;
    use serde_json::json;

    fn request(action: &str) -> ResourceRequestMessage {
        serde_json::from_value(json!({
            "id": "0f8e7d6c-5b4a-4392-8170-6f5e4d3c2b1a",
            "action": action,
            "stepId": "main",
            "operationId": "1a2b3c4d-5e6f-4a8b-9c0d-1e2f3a4b5c6d",
            "name": "tre-workspace-base",
            "version": "0.4.0",
            "workspaceId": "2b3c4d5e-6f7a-4b8c-9d0e-1f2a3b4c5d6e",
            "parameters": {
                "address_space": "10.1.0.0/24",
                "tfstate_container_name": "overridden",
                "nulled": null,
                "rules": [{ "name": "allow" }]
            },
            "user": { "id": "u1", "name": "Ada", "email": "ada@example.com" }
        }))
        .unwrap()
    }

    #[test]
    fn test_parameter_resolution_priority() {
        let mut config = RunnerConfig::default();
        config.bundle_params.insert("firewall_sku".to_string(), "Premium".to_string());
        let message = request("install");

        let resolve = |name: &str| resolve_parameter(&config, &message, name);

        assert_eq!(resolve("address_space"), Some(json!("10.1.0.0/24")));
        assert_eq!(resolve("tfstate_container_name"), Some(json!("overridden")));
        assert_eq!(resolve("tfstate_storage_account_name"), Some(json!("sttredevmgmt")));
        assert_eq!(resolve("id"), Some(json!("0f8e7d6c-5b4a-4392-8170-6f5e4d3c2b1a")));
        assert_eq!(resolve("user_email"), Some(json!("ada@example.com")));
        assert_eq!(resolve("mgmt_acr_name"), Some(json!("tredev")));
        assert_eq!(resolve("mgmt_resource_group_name"), Some(json!("rg-tredev-mgmt")));
        assert_eq!(resolve("workspace_id"), Some(json!("2b3c4d5e-6f7a-4b8c-9d0e-1f2a3b4c5d6e")));
        assert_eq!(resolve("FIREWALL_SKU"), Some(json!("Premium")));
        assert_eq!(resolve("nulled"), None);
        assert_eq!(resolve("parent_service_id"), None);
        assert_eq!(resolve("unknown"), None);
    }

    #[test]
    fn test_structured_values_are_base64_encoded() {
        let value = json!([{ "name": "allow" }]);
        let encoded = encode_parameter(&value);
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&decoded).unwrap(), value);
        assert_eq!(encode_parameter(&json!(true)), "true");
        assert_eq!(encode_parameter(&json!("plain")), "plain");
    }

    #[test]
    fn test_install_command_shape() {
        let config = RunnerConfig::default();
        let message = request("install");
        let names = vec!["address_space".to_string(), "missing".to_string()];

        let command = action_command(&config, &message, &RequestAction::Install, Some(&names));
        assert_eq!(command.program, "porter");
        assert_eq!(
            command.args[..4],
            [
                "install",
                "0f8e7d6c-5b4a-4392-8170-6f5e4d3c2b1a",
                "--reference",
                "tredev.azurecr.io/tre-workspace-base:v0.4.0"
            ]
        );
        assert!(command.args.contains(&"address_space=10.1.0.0/24".to_string()));
        assert_eq!(command.args.iter().filter(|a| *a == "--param").count(), 1);
        assert!(command.has_arg("--force"));
        assert!(!command.has_arg("--force-upgrade"));
    }

    #[test]
    fn test_upgrade_and_custom_action_commands() {
        let config = RunnerConfig::default();
        let message = request("upgrade");

        let upgrade = action_command(&config, &message, &RequestAction::Upgrade, None);
        assert!(upgrade.has_arg("--force-upgrade"));
        assert!(!upgrade.has_arg("--param"));

        let custom = RequestAction::from("start-vm");
        let invoke = action_command(&config, &message, &custom, None);
        assert_eq!(invoke.args[..3], ["invoke", "--action", "start-vm"]);
    }

    #[test]
    fn test_parse_parameter_names() {
        let stdout = r#"{ "name": "tre-workspace-base", "parameters": [ { "name": "id" }, { "name": "address_space", "type": "string" } ] }"#;
        assert_eq!(parse_parameter_names(stdout).unwrap(), vec!["id", "address_space"]);
        assert!(parse_parameter_names("oops").is_err());
    }

    #[test]
    fn test_parse_outputs_decodes_embedded_json() {
        let stdout = r#"[
            { "name": "ip", "value": "10.0.0.4", "type": "string" },
            { "name": "rules", "value": "[{\"name\": \"allow\"}]", "type": "string" },
            { "name": "broken", "value": "{not json", "type": "string" },
            { "name": "io.cnab.outputs.invocationImageLogs", "value": "...", "type": "string" }
        ]"#;

        let outputs = parse_outputs(stdout).unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].value, json!("10.0.0.4"));
        assert_eq!(outputs[1].value, json!([{ "name": "allow" }]));
        assert_eq!(outputs[2].value, json!("{not json"));

        assert!(parse_outputs("  ").unwrap().is_empty());
        assert!(parse_outputs("not json").is_err());
    }

    #[test]
    fn test_user_lookup_without_user() {
        let config = RunnerConfig::default();
        let mut message = request("install");
        message.user = None;
        assert_eq!(resolve_parameter(&config, &message, "user_email"), None);

        message.user = Some(User {
            id: "u2".to_string(),
            name: "Grace".to_string(),
            ..Default::default()
        });
        assert_eq!(resolve_parameter(&config, &message, "user_name"), Some(json!("Grace")));
    }
}
