//! Deployment status update DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::ParseError;
use crate::domain::status::Status;

/// Progress or result of one step, reported by the resource processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusUpdateMessage {
    pub operation_id: Uuid,
    pub step_id: String,
    /// Target resource id
    pub id: Uuid,
    pub status: Status,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

impl DeploymentStatusUpdateMessage {
    pub fn new(
        operation_id: Uuid,
        step_id: impl Into<String>,
        id: Uuid,
        status: Status,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation_id,
            step_id: step_id.into(),
            id,
            status,
            message: message.into(),
            outputs: Vec::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<Output>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        serde_json::from_slice(body).map_err(|e| ParseError::new("deployment status update", e))
    }

    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// One deployment output
///
/// The wire form uses capitalised keys. The deployment tool itself reports
/// lowercase keys, which are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "Value", alias = "value", default)]
    pub value: Value,
    #[serde(rename = "Type", alias = "type", default)]
    pub output_type: String,
}

impl Output {
    pub fn new(name: impl Into<String>, value: Value, output_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            output_type: output_type.into(),
        }
    }

    /// Value as it should be stored on the resource, or `None` when it carries nothing
    ///
    /// Strings lose one pair of surrounding quotes. Boolean outputs are parsed
    /// case-insensitively from their (possibly quoted) string form.
    pub fn property_value(&self) -> Option<Value> {
        match &self.value {
            Value::Null => None,
            Value::String(raw) => {
                let unquoted = strip_quotes(raw);
                if self.output_type.eq_ignore_ascii_case("boolean") {
                    Some(Value::Bool(unquoted.eq_ignore_ascii_case("true")))
                } else {
                    Some(Value::String(unquoted.to_string()))
                }
            }
            other => Some(other.clone()),
        }
    }
}

fn strip_quotes(raw: &str) -> &str {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}
