use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::vote::RejectReason,
    db::{ballot::Ballot, candidate::CandidateId},
};

/// A voter's credential, as typed. Fields are kept raw so that malformed
/// input is rejected exactly like a wrong credential.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialRequest {
    pub nim: String,
    pub access_code: String,
}

/// Optional client-reported metadata.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientInfoRequest {
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// A ballot submission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoteRequest {
    pub nim: String,
    pub access_code: String,
    pub candidate_id: CandidateId,
    #[serde(default)]
    pub client_info: ClientInfoRequest,
}

impl VoteRequest {
    pub fn credential(&self) -> CredentialRequest {
        CredentialRequest {
            nim: self.nim.clone(),
            access_code: self.access_code.clone(),
        }
    }
}

/// Result of a credential pre-check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidateResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
            message: None,
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            message: Some(reason.message().to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteStatus {
    Success,
    Rejected,
}

/// Terminal result of a ballot submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub status: VoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ballot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast_at: Option<DateTime<Utc>>,
}

impl VoteResponse {
    pub fn success(ballot: &Ballot) -> Self {
        Self {
            status: VoteStatus::Success,
            reason: None,
            message: None,
            ballot_id: Some(ballot.id.to_string()),
            cast_at: Some(ballot.cast_at),
        }
    }

    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            status: VoteStatus::Rejected,
            reason: Some(reason),
            message: Some(reason.message().to_string()),
            ballot_id: None,
            cast_at: None,
        }
    }
}
