//! Credential table entries.

use serde_derive::{Deserialize, Serialize};

/// A user the exporter authenticates with, either against PostgreSQL
/// servers or (for admins) against the management surface.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub username: String,

    // Never echoed back by `conf get`.
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl User {
    pub fn new(username: &str, password: &str) -> User {
        User {
            username: username.into(),
            password: password.into(),
        }
    }
}
