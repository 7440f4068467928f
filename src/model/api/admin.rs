use serde::{Deserialize, Serialize};

use crate::model::db::admin::Admin;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Raw admin credentials, received from a user. These are never stored directly,
/// since the password is in plaintext.
#[derive(Clone, Deserialize, Serialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

impl AdminCredentials {
    /// Check the username is non-empty and the password meets the minimum length.
    pub fn is_acceptable(&self) -> bool {
        !self.username.trim().is_empty() && self.password.chars().count() >= MIN_PASSWORD_LENGTH
    }
}

/// Public view of an admin account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSummary {
    pub id: String,
    pub username: String,
}

impl From<Admin> for AdminSummary {
    fn from(admin: Admin) -> Self {
        Self {
            id: admin.id.to_string(),
            username: admin.admin.username,
        }
    }
}
