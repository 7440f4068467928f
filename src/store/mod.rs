//! Persistence for the election: the voter roll, candidates, ballots and
//! tallies, the phase settings, admins and the audit trail.
//!
//! Every operation that changes more than one record takes the audit event
//! describing it and applies both atomically.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{
    api::{audit::AuditFilter, recap::RollStats, settings::SettingsPatch},
    common::{identity::IdentityNumber, vote::RejectReason},
    db::{
        admin::{Admin, NewAdmin},
        audit::{AuditEvent, NewAuditEvent},
        ballot::{Ballot, NewBallot},
        candidate::{Candidate, CandidateId},
        candidate_totals::CandidateTotals,
        settings::ElectionSettings,
        voter::{NewVoter, Voter},
    },
    mongodb::Id,
    pagination::Pagination,
};

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Shared handle on the configured store, held in Rocket managed state.
pub type Store = Arc<dyn ElectionStore>;

/// Result of an attempted ballot commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The ballot, tally increment, vote status and audit event were all written.
    Committed(Ballot),
    /// Nothing was written.
    Rejected(RejectReason),
}

/// Result of resetting a voter's vote status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    /// The live ballot that was retracted, if the voter had one.
    pub retracted: Option<Ballot>,
}

#[rocket::async_trait]
pub trait ElectionStore: Send + Sync {
    // Voter roll.
    async fn voter(&self, nim: &IdentityNumber) -> Result<Option<Voter>>;

    /// A page of voters, newest first, and the total roll size.
    async fn voters(&self, page: Pagination) -> Result<(Vec<Voter>, u64)>;

    /// Fails with `DuplicateIdentity` if the identity number is taken.
    async fn insert_voter(&self, voter: NewVoter, event: NewAuditEvent) -> Result<Voter>;

    /// Remove a voter with no live ballot. Returns false if the voter does
    /// not exist; fails with a conflict if the voter has a live ballot.
    async fn delete_voter(&self, nim: &IdentityNumber, event: NewAuditEvent) -> Result<bool>;

    /// Retract the voter's live ballot (if any), decrement its tally and
    /// clear the vote status. Returns `None` if the voter does not exist.
    async fn reset_vote_status(
        &self,
        nim: &IdentityNumber,
        event: NewAuditEvent,
    ) -> Result<Option<ResetOutcome>>;

    // Candidates.
    /// All candidates, ordered by ballot position.
    async fn candidates(&self) -> Result<Vec<Candidate>>;

    /// Fails with a conflict if the ballot position is taken.
    async fn insert_candidate(&self, candidate: Candidate, event: NewAuditEvent)
        -> Result<Candidate>;

    // Phase.
    async fn settings(&self) -> Result<ElectionSettings>;

    /// Apply the patch. If anything changed the version is bumped and the
    /// event recorded; otherwise nothing is written.
    async fn update_settings(
        &self,
        patch: &SettingsPatch,
        event: NewAuditEvent,
    ) -> Result<ElectionSettings>;

    // Ledger.
    /// Atomically re-check the phase, the voter's status and the candidate,
    /// then write the ballot, the tally increment, the vote status and the
    /// event. Either everything is written or nothing is.
    async fn commit_vote(&self, ballot: NewBallot, event: NewAuditEvent) -> Result<CommitOutcome>;

    /// Materialized tally counters. Candidates without votes may be absent.
    async fn totals(&self) -> Result<Vec<CandidateTotals>>;

    /// Count live ballots per candidate directly from the ledger.
    async fn count_live_ballots(&self) -> Result<HashMap<CandidateId, u64>>;

    async fn roll_stats(&self) -> Result<RollStats>;

    // Audit trail. Insert-only.
    async fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent>;

    /// A page of matching events, newest first, and the number of matches.
    async fn audit_events(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<(Vec<AuditEvent>, u64)>;

    async fn count_audit_events(&self, filter: &AuditFilter) -> Result<u64>;

    // Admins.
    async fn admin_by_username(&self, username: &str) -> Result<Option<Admin>>;

    async fn admin_by_id(&self, id: Id) -> Result<Option<Admin>>;

    async fn admins(&self) -> Result<Vec<Admin>>;

    /// Fails with a conflict if the username is taken.
    async fn insert_admin(&self, admin: NewAdmin, event: NewAuditEvent) -> Result<Admin>;
}
