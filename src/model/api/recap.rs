use serde::{Deserialize, Serialize};

use crate::model::db::candidate::CandidateId;

/// One row of the recap: a candidate pair and its committed vote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecapEntry {
    pub candidate_id: CandidateId,
    pub candidate_name: String,
    pub total: u64,
}

/// A tally counter that disagrees with a recount of live ballots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyDrift {
    pub candidate_id: CandidateId,
    pub counted: u64,
    pub recounted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecapVerification {
    pub consistent: bool,
    pub drift: Vec<TallyDrift>,
}

/// Dashboard counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollStats {
    pub registered_voters: u64,
    pub voted: u64,
    pub live_ballots: u64,
}
