use serde::{Deserialize, Serialize};

/// Ballot position of a candidate pair.
pub type CandidateId = u32;

/// A candidate pair, as stored in the database. Owned by candidate
/// management; the vote path only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: CandidateId,
    pub lead_name: String,
    pub running_mate_name: String,
    #[serde(default)]
    pub vision: String,
    #[serde(default)]
    pub mission: String,
    #[serde(default)]
    pub photo_url: Option<String>,
}

impl Candidate {
    /// Display name of the pair.
    pub fn pair_name(&self) -> String {
        format!("{} & {}", self.lead_name, self.running_mate_name)
    }
}
