//! User domain types

use serde::{Deserialize, Serialize};

/// The user on whose behalf an operation runs
///
/// Authentication happens upstream; the control plane only records who asked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}
