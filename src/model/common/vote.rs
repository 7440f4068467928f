use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Why a ballot submission (or a credential pre-check) was turned away.
/// These are expected business outcomes, not faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Unknown identity number, wrong access code, or malformed input.
    InvalidCredential,
    VotingClosed,
    AlreadyVoted,
    CandidateNotFound,
}

impl RejectReason {
    /// A message safe to show to the voter.
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "Identity number or access code is incorrect.",
            Self::VotingClosed => "Voting is currently closed.",
            Self::AlreadyVoted => "This identity number has already been used to vote.",
            Self::CandidateNotFound => "The selected candidate does not exist.",
        }
    }

    /// Stable machine-readable name, as serialized.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "INVALID_CREDENTIAL",
            Self::VotingClosed => "VOTING_CLOSED",
            Self::AlreadyVoted => "ALREADY_VOTED",
            Self::CandidateNotFound => "CANDIDATE_NOT_FOUND",
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
