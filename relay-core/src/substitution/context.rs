//! The resources a template can reference and the path resolver over them

use serde_json::Value;

use super::error::SubstitutionError;
use crate::domain::resource::{Resource, ResourceType};

const ROOT: &str = "resource";
const PARENT: &str = "parent";
const MAX_PARENT_HOPS: usize = 2;

/// The primary resource of a substitution and up to two of its ancestors
///
/// Resources are held in their serialized (camelCase) form, so template paths
/// use the stored field names: `resource.templateName`, `resource.properties.x`.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    resource_type: ResourceType,
    primary: Value,
    parent: Option<Value>,
    grandparent: Option<Value>,
}

fn to_value(resource: &Resource) -> Value {
    serde_json::to_value(resource).unwrap_or(Value::Null)
}

impl ResourceContext {
    pub fn new(primary: &Resource) -> Self {
        Self {
            resource_type: primary.resource_type,
            primary: to_value(primary),
            parent: None,
            grandparent: None,
        }
    }

    pub fn with_parent(mut self, parent: &Resource) -> Self {
        self.parent = Some(to_value(parent));
        self
    }

    pub fn with_grandparent(mut self, grandparent: &Resource) -> Self {
        self.grandparent = Some(to_value(grandparent));
        self
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    /// Resolves a dotted token such as `resource.parent.properties.name`
    ///
    /// A key missing along the path resolves to an empty string.
    pub fn resolve(&self, token: &str) -> Result<Value, SubstitutionError> {
        let mut segments = token.split('.').map(str::trim);

        if segments.next() != Some(ROOT) {
            return Err(SubstitutionError::UnknownRoot {
                token: token.to_string(),
            });
        }

        let mut segments = segments.peekable();
        let mut depth = 0;
        while segments.next_if_eq(&PARENT).is_some() {
            depth += 1;
        }

        let mut current = self.level(token, depth)?;
        for segment in segments {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Ok(Value::String(String::new())),
            }
        }

        Ok(current.clone())
    }

    fn level(&self, token: &str, depth: usize) -> Result<&Value, SubstitutionError> {
        if depth > MAX_PARENT_HOPS {
            return Err(SubstitutionError::TooManyParents {
                token: token.to_string(),
            });
        }

        let allowed = self.resource_type.max_parent_depth();
        if depth > allowed {
            return Err(SubstitutionError::ParentNotAllowed {
                token: token.to_string(),
                resource_type: self.resource_type,
                depth,
                allowed,
            });
        }

        let level = match depth {
            0 => Some(&self.primary),
            1 => self.parent.as_ref(),
            _ => self.grandparent.as_ref(),
        };

        level.ok_or_else(|| SubstitutionError::MissingParent {
            token: token.to_string(),
            depth,
        })
    }
}
