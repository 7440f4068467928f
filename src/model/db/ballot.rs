use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{client::ClientMetadata, identity::IdentityNumber},
    db::candidate::CandidateId,
    mongodb::{optional_datetime, Id},
};

/// Core ballot data: one voter's choice of one candidate.
///
/// Ballots are never deleted. The audited vote-status reset marks a ballot as
/// retracted instead, which removes it from the tally and from the
/// one-live-ballot-per-voter uniqueness constraint while keeping the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotCore {
    pub voter_nim: IdentityNumber,
    pub candidate_id: CandidateId,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
    pub client: ClientMetadata,
    pub retracted: bool,
    #[serde(default, with = "optional_datetime")]
    pub retracted_at: Option<DateTime<Utc>>,
}

impl BallotCore {
    /// A live ballot cast now.
    pub fn new(voter_nim: IdentityNumber, candidate_id: CandidateId, client: ClientMetadata) -> Self {
        Self {
            voter_nim,
            candidate_id,
            cast_at: Utc::now(),
            client,
            retracted: false,
            retracted_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.retracted
    }

    /// Mark the ballot as retracted at the current time.
    pub fn retract(&mut self) {
        self.retracted = true;
        self.retracted_at = Some(Utc::now());
    }
}

/// A ballot without an ID.
pub type NewBallot = BallotCore;

/// A ballot from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub ballot: BallotCore,
}

impl Deref for Ballot {
    type Target = BallotCore;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}

impl DerefMut for Ballot {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ballot
    }
}
