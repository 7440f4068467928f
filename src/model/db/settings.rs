use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Document};
use serde::{Deserialize, Serialize};

use crate::model::api::settings::SettingsPatch;

/// ID of the single live settings record.
pub const SETTINGS_ID: i32 = 1;

/// The global election phase flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSettings {
    #[serde(rename = "_id")]
    pub id: i32,
    pub voting_open: bool,
    pub show_live_results: bool,
    /// Incremented on every committed change.
    pub version: u64,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl ElectionSettings {
    /// Settings of a freshly provisioned election: closed, results hidden.
    pub fn initial() -> Self {
        Self {
            id: SETTINGS_ID,
            voting_open: false,
            show_live_results: false,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Filter matching the settings record.
    pub fn filter() -> Document {
        doc! { "_id": SETTINGS_ID }
    }

    /// Apply a patch, bumping the version if anything changed.
    /// Returns whether anything changed.
    pub fn apply(&mut self, patch: &SettingsPatch) -> bool {
        let mut changed = false;
        if let Some(open) = patch.voting_open {
            changed |= self.voting_open != open;
            self.voting_open = open;
        }
        if let Some(show) = patch.show_live_results {
            changed |= self.show_live_results != show;
            self.show_live_results = show;
        }
        if changed {
            self.version += 1;
            self.updated_at = Utc::now();
        }
        changed
    }
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self::initial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_patch_bumps_version_only_on_change() {
        let mut settings = ElectionSettings::initial();
        let open = SettingsPatch {
            voting_open: Some(true),
            show_live_results: None,
        };
        assert!(settings.apply(&open));
        assert!(settings.voting_open);
        assert!(!settings.show_live_results);
        assert_eq!(settings.version, 1);

        // Re-applying the same value is a no-op.
        assert!(!settings.apply(&open));
        assert_eq!(settings.version, 1);

        let both = SettingsPatch {
            voting_open: Some(false),
            show_live_results: Some(true),
        };
        assert!(settings.apply(&both));
        assert!(!settings.voting_open);
        assert!(settings.show_live_results);
        assert_eq!(settings.version, 2);
    }
}
