use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{audit::AuditKind, client::ClientMetadata, identity::IdentityNumber, vote::RejectReason},
    db::candidate::CandidateId,
    mongodb::Id,
};

/// Structured detail of an audit event. Only the fields relevant to the
/// event kind are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nim: Option<String>,
    /// Credential failures recorded for this identity, including this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<CandidateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ballot_retracted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditDetail {
    fn with_client(mut self, client: &ClientMetadata) -> Self {
        self.ip = Some(client.ip.clone());
        self.user_agent = Some(client.user_agent.clone());
        self.network = Some(client.network.clone());
        self
    }
}

/// Core audit event data. Events are insert-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEventCore {
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub detail: AuditDetail,
}

impl AuditEventCore {
    pub fn new(kind: AuditKind, detail: AuditDetail) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            detail,
        }
    }

    /// A ballot was committed.
    pub fn vote_success(nim: &IdentityNumber, candidate_id: CandidateId, client: &ClientMetadata) -> Self {
        let detail = AuditDetail {
            nim: Some(nim.to_string()),
            candidate_id: Some(candidate_id),
            ..Default::default()
        };
        Self::new(AuditKind::VoteSuccess, detail.with_client(client))
    }

    /// A submission carrying a valid credential was turned away.
    pub fn vote_rejected(
        nim: &IdentityNumber,
        candidate_id: CandidateId,
        reason: RejectReason,
        client: &ClientMetadata,
    ) -> Self {
        let detail = AuditDetail {
            reason: Some(reason),
            nim: Some(nim.to_string()),
            candidate_id: Some(candidate_id),
            ..Default::default()
        };
        Self::new(AuditKind::VoteRejected, detail.with_client(client))
    }

    /// A credential check failed. `nim` is the raw submitted identity, which
    /// may not be well-formed.
    pub fn login_fail(nim: &str, attempt: u64, client: &ClientMetadata) -> Self {
        let detail = AuditDetail {
            reason: Some(RejectReason::InvalidCredential),
            nim: Some(nim.to_string()),
            attempt: Some(attempt),
            ..Default::default()
        };
        Self::new(AuditKind::LoginFail, detail.with_client(client))
    }

    /// A failed admin login.
    pub fn admin_login_fail(username: &str, client: &ClientMetadata) -> Self {
        let detail = AuditDetail {
            admin: Some(username.to_string()),
            action: Some("login".to_string()),
            ..Default::default()
        };
        Self::new(AuditKind::LoginFail, detail.with_client(client))
    }

    /// A privileged change, attributed to the acting admin.
    pub fn admin_action(admin: &str, action: &str) -> Self {
        let detail = AuditDetail {
            admin: Some(admin.to_string()),
            action: Some(action.to_string()),
            ..Default::default()
        };
        Self::new(AuditKind::AdminAction, detail)
    }

    /// A privileged change to one voter's record.
    pub fn admin_voter_action(admin: &str, action: &str, nim: &IdentityNumber) -> Self {
        let mut event = Self::admin_action(admin, action);
        event.detail.nim = Some(nim.to_string());
        event
    }

    /// An unexpected fault on a voter-facing path. The message is for
    /// operators and never reaches the voter.
    pub fn system_error(nim: Option<&str>, message: impl Into<String>) -> Self {
        let detail = AuditDetail {
            nim: nim.map(str::to_string),
            message: Some(message.into()),
            ..Default::default()
        };
        Self::new(AuditKind::SystemError, detail)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.detail.message = Some(message.into());
        self
    }
}

/// An audit event without an ID.
pub type NewAuditEvent = AuditEventCore;

/// An audit event from the database, with its unique ID. IDs increase with
/// insertion order, which breaks timestamp ties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub event: AuditEventCore,
}

impl Deref for AuditEvent {
    type Target = AuditEventCore;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl DerefMut for AuditEvent {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_omits_absent_fields() {
        let event = NewAuditEvent::admin_action("alice", "open_voting");
        let doc = mongodb::bson::to_document(&event).unwrap();
        let detail = doc.get_document("detail").unwrap();
        assert_eq!(detail.len(), 2);
        assert_eq!(detail.get_str("admin").unwrap(), "alice");
        assert_eq!(doc.get_str("kind").unwrap(), "ADMIN_ACTION");
    }

    #[test]
    fn login_failures_carry_client_and_attempt() {
        let client = ClientMetadata::default();
        let event = NewAuditEvent::login_fail("2235001", 3, &client);
        assert_eq!(event.kind, AuditKind::LoginFail);
        assert_eq!(event.detail.attempt, Some(3));
        assert_eq!(event.detail.reason, Some(RejectReason::InvalidCredential));
        assert_eq!(event.detail.ip.as_deref(), Some("unknown"));
    }
}
