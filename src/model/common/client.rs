use serde::{Deserialize, Serialize};

/// Placeholder recorded when a piece of client metadata could not be obtained.
pub const UNKNOWN: &str = "unknown";

/// Client metadata attached to ballots and audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub user_agent: String,
    pub ip: String,
    /// Network description from the optional IP lookup service.
    pub network: String,
}

impl Default for ClientMetadata {
    fn default() -> Self {
        Self {
            user_agent: UNKNOWN.to_string(),
            ip: UNKNOWN.to_string(),
            network: UNKNOWN.to_string(),
        }
    }
}
