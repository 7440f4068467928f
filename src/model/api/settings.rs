use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::db::settings::ElectionSettings;

/// A partial update of the election phase flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_live_results: Option<bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.voting_open.is_none() && self.show_live_results.is_none()
    }

    /// Name recorded in the audit trail for this change.
    pub fn action_name(&self) -> &'static str {
        match (self.voting_open, self.show_live_results) {
            (Some(true), None) => "open_voting",
            (Some(false), None) => "close_voting",
            (None, Some(true)) => "show_results",
            (None, Some(false)) => "hide_results",
            _ => "update_settings",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsView {
    pub voting_open: bool,
    pub show_live_results: bool,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<ElectionSettings> for SettingsView {
    fn from(settings: ElectionSettings) -> Self {
        Self {
            voting_open: settings.voting_open,
            show_live_results: settings.show_live_results,
            version: settings.version,
            updated_at: settings.updated_at,
        }
    }
}
