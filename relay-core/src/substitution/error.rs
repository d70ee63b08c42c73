use thiserror::Error;

use crate::domain::resource::ResourceType;

#[derive(Debug, Error, PartialEq)]
pub enum SubstitutionError {
    #[error("'{token}' walks more than two parents up")]
    TooManyParents { token: String },

    #[error("'{token}' needs {depth} parent level(s) but a {resource_type} has {allowed}")]
    ParentNotAllowed {
        token: String,
        resource_type: ResourceType,
        depth: usize,
        allowed: usize,
    },

    #[error("'{token}' needs parent level {depth} but it was not supplied")]
    MissingParent { token: String, depth: usize },

    #[error("'{token}' must start with 'resource'")]
    UnknownRoot { token: String },

    #[error("array property '{property}': {reason}")]
    InvalidArrayValue { property: String, reason: String },
}
