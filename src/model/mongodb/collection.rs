use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::db::{
    admin::{Admin, NewAdmin},
    audit::{AuditEvent, NewAuditEvent},
    ballot::{Ballot, NewBallot},
    candidate::Candidate,
    candidate_totals::CandidateTotals,
    settings::ElectionSettings,
    voter::{NewVoter, Voter},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Admin collections
const ADMINS: &str = "admins";
impl MongoCollection for Admin {
    const NAME: &'static str = ADMINS;
}
impl MongoCollection for NewAdmin {
    const NAME: &'static str = ADMINS;
}

// Voter collections
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for NewVoter {
    const NAME: &'static str = VOTERS;
}

// Candidate collection
impl MongoCollection for Candidate {
    const NAME: &'static str = "candidates";
}

// Ballot collections
const BALLOTS: &str = "ballots";
impl MongoCollection for Ballot {
    const NAME: &'static str = BALLOTS;
}
impl MongoCollection for NewBallot {
    const NAME: &'static str = BALLOTS;
}

// Candidate totals collection
impl MongoCollection for CandidateTotals {
    const NAME: &'static str = "candidate_totals";
}

// Settings collection, holding a single record
impl MongoCollection for ElectionSettings {
    const NAME: &'static str = "election_settings";
}

// Audit collections
const AUDIT_LOG: &str = "audit_log";
impl MongoCollection for AuditEvent {
    const NAME: &'static str = AUDIT_LOG;
}
impl MongoCollection for NewAuditEvent {
    const NAME: &'static str = AUDIT_LOG;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Voter collection.
    let voter_index = IndexModel::builder()
        .keys(doc! {"nim": 1})
        .options(unique.clone())
        .build();
    Coll::<Voter>::from_db(db)
        .create_index(voter_index, None)
        .await?;

    // Admin collection.
    let admin_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique.clone())
        .build();
    Coll::<Admin>::from_db(db)
        .create_index(admin_index, None)
        .await?;

    // Ballot collection: at most one live ballot per voter, across processes.
    let live_ballot_index = IndexModel::builder()
        .keys(doc! {"voter_nim": 1})
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(doc! {"retracted": false})
                .build(),
        )
        .build();
    let tally_index = IndexModel::builder()
        .keys(doc! {"candidate_id": 1, "retracted": 1})
        .build();
    Coll::<Ballot>::from_db(db)
        .create_indexes([live_ballot_index, tally_index], None)
        .await?;

    // Audit collection.
    let newest_first_index = IndexModel::builder()
        .keys(doc! {"timestamp": -1, "_id": -1})
        .build();
    let filter_index = IndexModel::builder()
        .keys(doc! {"kind": 1, "detail.nim": 1})
        .build();
    Coll::<AuditEvent>::from_db(db)
        .create_indexes([newest_first_index, filter_index], None)
        .await?;

    Ok(())
}
