use serde::{Deserialize, Serialize};

use crate::model::db::candidate::{Candidate, CandidateId};

/// A candidate pair as shown on the ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDescription {
    pub id: CandidateId,
    pub lead_name: String,
    pub running_mate_name: String,
    pub vision: String,
    pub mission: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl From<Candidate> for CandidateDescription {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            lead_name: candidate.lead_name,
            running_mate_name: candidate.running_mate_name,
            vision: candidate.vision,
            mission: candidate.mission,
            photo_url: candidate.photo_url,
        }
    }
}

impl From<CandidateDescription> for Candidate {
    fn from(desc: CandidateDescription) -> Self {
        Self {
            id: desc.id,
            lead_name: desc.lead_name.trim().to_string(),
            running_mate_name: desc.running_mate_name.trim().to_string(),
            vision: desc.vision,
            mission: desc.mission,
            photo_url: desc.photo_url,
        }
    }
}
