use serde::{Deserialize, Serialize};

use crate::model::db::candidate::CandidateId;

/// Materialised count of live ballots for one candidate.
/// Updated in the same transaction as the ballot it counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTotals {
    #[serde(rename = "_id")]
    pub candidate_id: CandidateId,
    pub total: u64,
}
