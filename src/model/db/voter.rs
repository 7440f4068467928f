use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::identity::IdentityNumber,
    mongodb::{optional_datetime, Id},
};

/// Core voter data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    /// Roll identifier, unique across voters.
    pub nim: IdentityNumber,
    pub name: String,
    /// Encoded one-way hash of the access code. The plaintext is never stored.
    pub access_code_hash: String,
    /// True iff the voter has exactly one live ballot.
    pub has_voted: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "optional_datetime")]
    pub voted_at: Option<DateTime<Utc>>,
}

impl VoterCore {
    /// Create a voter who has not voted yet.
    pub fn new(nim: IdentityNumber, name: String, access_code_hash: String) -> Self {
        Self {
            nim,
            name,
            access_code_hash,
            has_voted: false,
            created_at: Utc::now(),
            voted_at: None,
        }
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}
