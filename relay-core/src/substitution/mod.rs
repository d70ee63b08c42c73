//! Substitution engine
//!
//! Computes the properties a pipeline step writes onto its target resource.
//! Step property values are templates such as
//! `"rule for {{ resource.properties.display_name }}"` which reference the
//! primary resource (`resource.`) and its ancestors (`resource.parent.`,
//! `resource.parent.parent.`). Everything here is a pure function; callers
//! persist the result.

mod context;
mod error;

pub use context::ResourceContext;
pub use error::SubstitutionError;

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::domain::resource::Resource;
use crate::domain::template::{ArraySubstitutionAction, PipelineStep, PipelineStepProperty};

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("token pattern is a valid regex"));

/// Substitutes every `{{ ... }}` token of a template string
///
/// Scalars are interpolated into the surrounding text. A token resolving to a
/// list or an object is returned as-is and the rest of the string is dropped.
pub fn substitute_value(template: &str, context: &ResourceContext) -> Result<Value, SubstitutionError> {
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for captures in TOKEN.captures_iter(template) {
        let (Some(whole), Some(token)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        let resolved = context.resolve(token.as_str())?;
        let text = match resolved {
            Value::Array(_) | Value::Object(_) => return Ok(resolved),
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        output.push_str(&template[last..whole.start()]);
        output.push_str(&text);
        last = whole.end();
    }

    output.push_str(&template[last..]);
    Ok(Value::String(output))
}

/// Substitutes every string nested anywhere inside a JSON value
pub fn substitute_json(value: &Value, context: &ResourceContext) -> Result<Value, SubstitutionError> {
    match value {
        Value::String(template) => substitute_value(template, context),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute_json(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(fields) => fields
            .iter()
            .map(|(key, field)| Ok((key.clone(), substitute_json(field, context)?)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Computes the properties `step` writes onto `resource_to_update`
///
/// Plain properties are substituted and written by name. Array properties that
/// declare an `arraySubstitutionAction` are combined with the array currently
/// stored on `resource_to_update`, matching elements on `arrayMatchField`.
pub fn substitute_properties(
    step: &PipelineStep,
    context: &ResourceContext,
    resource_to_update: &Resource,
) -> Result<Map<String, Value>, SubstitutionError> {
    let mut properties = Map::new();

    for property in &step.properties {
        let value = substitute_json(&property.value, context)?;

        let value = match property.array_substitution_action {
            Some(action) if property.is_array() => {
                let existing = properties
                    .get(&property.name)
                    .or_else(|| resource_to_update.properties.get(&property.name))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Value::Array(apply_array_action(property, action, existing, value)?)
            }
            _ => value,
        };

        properties.insert(property.name.clone(), value);
    }

    Ok(properties)
}

fn apply_array_action(
    property: &PipelineStepProperty,
    action: ArraySubstitutionAction,
    mut existing: Vec<Value>,
    item: Value,
) -> Result<Vec<Value>, SubstitutionError> {
    match action {
        ArraySubstitutionAction::Overwrite => return Ok(vec![item]),
        ArraySubstitutionAction::Append => {
            existing.push(item);
            return Ok(existing);
        }
        ArraySubstitutionAction::Remove | ArraySubstitutionAction::Replace => {}
    }

    let invalid = |reason: &str| SubstitutionError::InvalidArrayValue {
        property: property.name.clone(),
        reason: reason.to_string(),
    };
    let field = property
        .array_match_field
        .as_deref()
        .ok_or_else(|| invalid("arrayMatchField is required for remove and replace"))?;
    let key = item
        .get(field)
        .cloned()
        .ok_or_else(|| invalid("value has no match field"))?;

    let position = existing
        .iter()
        .position(|element| element.get(field) == Some(&key));

    match (action, position) {
        (ArraySubstitutionAction::Remove, Some(index)) => {
            existing.remove(index);
        }
        (ArraySubstitutionAction::Replace, Some(index)) => existing[index] = item,
        (ArraySubstitutionAction::Replace, None) => existing.push(item),
        _ => {}
    }

    Ok(existing)
}
