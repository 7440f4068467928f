use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{db::voter::Voter, pagination::PaginationResult};

/// A request to add one voter to the roll.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewVoterRequest {
    pub nim: String,
    pub name: String,
    /// Generated when absent.
    #[serde(default)]
    pub access_code: Option<String>,
}

/// Returned exactly once when a voter is added: the only time the plaintext
/// access code leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub nim: String,
    pub name: String,
    pub access_code: String,
}

/// A voter roll entry. Never includes the access code hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterSummary {
    pub nim: String,
    pub name: String,
    pub has_voted: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voted_at: Option<DateTime<Utc>>,
}

impl From<Voter> for VoterSummary {
    fn from(voter: Voter) -> Self {
        Self {
            nim: voter.nim.to_string(),
            name: voter.voter.name,
            has_voted: voter.voter.has_voted,
            created_at: voter.voter.created_at,
            voted_at: voter.voter.voted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VoterPage {
    pub voters: Vec<VoterSummary>,
    pub pagination: PaginationResult,
}

/// Result of an audited vote-status reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub nim: String,
    pub ballot_retracted: bool,
}
