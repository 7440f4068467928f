use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::audit::AuditKind,
    db::audit::{AuditDetail, AuditEvent},
    pagination::PaginationResult,
};

/// Filter for audit queries. Both fields are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub kind: Option<AuditKind>,
    pub nim: Option<String>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.kind.map_or(true, |kind| event.kind == kind)
            && self
                .nim
                .as_deref()
                .map_or(true, |nim| event.detail.nim.as_deref() == Some(nim))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub detail: AuditDetail,
}

impl From<AuditEvent> for AuditEntry {
    fn from(event: AuditEvent) -> Self {
        Self {
            id: event.id.to_string(),
            timestamp: event.event.timestamp,
            kind: event.event.kind,
            detail: event.event.detail,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub events: Vec<AuditEntry>,
    pub pagination: PaginationResult,
}
