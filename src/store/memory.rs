use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use super::{CommitOutcome, ElectionStore, ResetOutcome};
use crate::error::{Error, Result};
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

/// An in-process store for tests and single-node demos.
///
/// All records live behind one lock, so every mutation is a short critical
/// section with no `.await` inside it. Settings have their own lock so that
/// display reads never wait on the ledger; when both are needed the record
/// lock is taken first.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    records: RwLock<Records>,
    settings: RwLock<ElectionSettings>,
}

#[derive(Default)]
struct Records {
    voters: HashMap<IdentityNumber, Voter>,
    admins: Vec<Admin>,
    candidates: BTreeMap<CandidateId, Candidate>,
    ballots: Vec<Ballot>,
    /// Index into `ballots` of each voter's live ballot.
    live_ballots: HashMap<IdentityNumber, usize>,
    totals: BTreeMap<CandidateId, u64>,
    /// In insertion order.
    audit: Vec<AuditEvent>,
}

impl Records {
    fn append_audit(&mut self, event: NewAuditEvent) -> AuditEvent {
        let event = AuditEvent {
            id: Id::new(),
            event,
        };
        self.audit.push(event.clone());
        event
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> RwLockReadGuard<'_, Records> {
        self.inner
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn records_mut(&self) -> RwLockWriteGuard<'_, Records> {
        self.inner
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn settings_ref(&self) -> RwLockReadGuard<'_, ElectionSettings> {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn settings_mut(&self) -> RwLockWriteGuard<'_, ElectionSettings> {
        self.inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Every ballot ever cast by the voter, live or retracted.
    #[cfg(test)]
    pub fn ballots_for(&self, nim: &IdentityNumber) -> Vec<Ballot> {
        self.records()
            .ballots
            .iter()
            .filter(|ballot| &ballot.voter_nim == nim)
            .cloned()
            .collect()
    }

    /// The whole audit trail, oldest first.
    #[cfg(test)]
    pub fn audit_trail(&self) -> Vec<AuditEvent> {
        self.records().audit.clone()
    }
}

#[rocket::async_trait]
impl ElectionStore for MemoryStore {
    async fn voter(&self, nim: &IdentityNumber) -> Result<Option<Voter>> {
        Ok(self.records().voters.get(nim).cloned())
    }

    async fn voters(&self, page: Pagination) -> Result<(Vec<Voter>, u64)> {
        let records = self.records();
        let mut voters: Vec<&Voter> = records.voters.values().collect();
        voters.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        let total = voters.len() as u64;
        let page = page.apply(voters.into_iter()).cloned().collect();
        Ok((page, total))
    }

    async fn insert_voter(&self, voter: NewVoter, event: NewAuditEvent) -> Result<Voter> {
        let mut records = self.records_mut();
        if records.voters.contains_key(&voter.nim) {
            return Err(Error::DuplicateIdentity(voter.nim));
        }
        let voter = Voter {
            id: Id::new(),
            voter,
        };
        records.voters.insert(voter.nim.clone(), voter.clone());
        records.append_audit(event);
        Ok(voter)
    }

    async fn delete_voter(&self, nim: &IdentityNumber, event: NewAuditEvent) -> Result<bool> {
        let mut records = self.records_mut();
        let voted = match records.voters.get(nim) {
            Some(voter) => voter.has_voted || records.live_ballots.contains_key(nim),
            None => return Ok(false),
        };
        if voted {
            return Err(Error::conflict(format!(
                "Voter {nim} has a recorded ballot and cannot be deleted"
            )));
        }
        records.voters.remove(nim);
        records.append_audit(event);
        Ok(true)
    }

    async fn reset_vote_status(
        &self,
        nim: &IdentityNumber,
        mut event: NewAuditEvent,
    ) -> Result<Option<ResetOutcome>> {
        let mut records = self.records_mut();
        if !records.voters.contains_key(nim) {
            return Ok(None);
        }

        let retracted = match records.live_ballots.remove(nim) {
            Some(index) => {
                let ballot = &mut records.ballots[index];
                ballot.retract();
                let ballot = ballot.clone();
                if let Some(total) = records.totals.get_mut(&ballot.candidate_id) {
                    *total = total.saturating_sub(1);
                }
                Some(ballot)
            }
            None => None,
        };

        if let Some(voter) = records.voters.get_mut(nim) {
            voter.has_voted = false;
            voter.voted_at = None;
        }
        event.detail.ballot_retracted = Some(retracted.is_some());
        records.append_audit(event);
        Ok(Some(ResetOutcome { retracted }))
    }

    async fn candidates(&self) -> Result<Vec<Candidate>> {
        Ok(self.records().candidates.values().cloned().collect())
    }

    async fn insert_candidate(
        &self,
        candidate: Candidate,
        event: NewAuditEvent,
    ) -> Result<Candidate> {
        let mut records = self.records_mut();
        if records.candidates.contains_key(&candidate.id) {
            return Err(Error::conflict(format!(
                "Ballot position {} is already taken",
                candidate.id
            )));
        }
        records.candidates.insert(candidate.id, candidate.clone());
        records.append_audit(event);
        Ok(candidate)
    }

    async fn settings(&self) -> Result<ElectionSettings> {
        Ok(self.settings_ref().clone())
    }

    async fn update_settings(
        &self,
        patch: &SettingsPatch,
        event: NewAuditEvent,
    ) -> Result<ElectionSettings> {
        let mut records = self.records_mut();
        let mut settings = self.settings_mut();
        if settings.apply(patch) {
            records.append_audit(event);
        }
        Ok(settings.clone())
    }

    async fn commit_vote(&self, ballot: NewBallot, event: NewAuditEvent) -> Result<CommitOutcome> {
        let mut records = self.records_mut();
        if !self.settings_ref().voting_open {
            return Ok(CommitOutcome::Rejected(RejectReason::VotingClosed));
        }
        match records.voters.get(&ballot.voter_nim) {
            None => return Ok(CommitOutcome::Rejected(RejectReason::InvalidCredential)),
            Some(voter) if voter.has_voted => {
                return Ok(CommitOutcome::Rejected(RejectReason::AlreadyVoted))
            }
            Some(_) => {}
        }
        if records.live_ballots.contains_key(&ballot.voter_nim) {
            return Ok(CommitOutcome::Rejected(RejectReason::AlreadyVoted));
        }
        if !records.candidates.contains_key(&ballot.candidate_id) {
            return Ok(CommitOutcome::Rejected(RejectReason::CandidateNotFound));
        }

        let ballot = Ballot {
            id: Id::new(),
            ballot,
        };
        records.ballots.push(ballot.clone());
        let index = records.ballots.len() - 1;
        records.live_ballots.insert(ballot.voter_nim.clone(), index);
        *records.totals.entry(ballot.candidate_id).or_insert(0) += 1;
        if let Some(voter) = records.voters.get_mut(&ballot.voter_nim) {
            voter.has_voted = true;
            voter.voted_at = Some(ballot.cast_at);
        }
        records.append_audit(event);
        debug!("Committed ballot {} for voter {}", ballot.id, ballot.voter_nim);
        Ok(CommitOutcome::Committed(ballot))
    }

    async fn totals(&self) -> Result<Vec<CandidateTotals>> {
        Ok(self
            .records()
            .totals
            .iter()
            .map(|(&candidate_id, &total)| CandidateTotals {
                candidate_id,
                total,
            })
            .collect())
    }

    async fn count_live_ballots(&self) -> Result<HashMap<CandidateId, u64>> {
        let mut counts = HashMap::new();
        for ballot in self.records().ballots.iter().filter(|b| b.is_live()) {
            *counts.entry(ballot.candidate_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn roll_stats(&self) -> Result<RollStats> {
        let records = self.records();
        Ok(RollStats {
            registered_voters: records.voters.len() as u64,
            voted: records.voters.values().filter(|v| v.has_voted).count() as u64,
            live_ballots: records.live_ballots.len() as u64,
        })
    }

    async fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent> {
        Ok(self.records_mut().append_audit(event))
    }

    async fn audit_events(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<(Vec<AuditEvent>, u64)> {
        let records = self.records();
        let matching = || records.audit.iter().rev().filter(|e| filter.matches(e));
        let total = matching().count() as u64;
        let events = page.apply(matching()).cloned().collect();
        Ok((events, total))
    }

    async fn count_audit_events(&self, filter: &AuditFilter) -> Result<u64> {
        let records = self.records();
        Ok(records.audit.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn admin_by_username(&self, username: &str) -> Result<Option<Admin>> {
        Ok(self
            .records()
            .admins
            .iter()
            .find(|admin| admin.username == username)
            .cloned())
    }

    async fn admin_by_id(&self, id: Id) -> Result<Option<Admin>> {
        Ok(self
            .records()
            .admins
            .iter()
            .find(|admin| admin.id == id)
            .cloned())
    }

    async fn admins(&self) -> Result<Vec<Admin>> {
        Ok(self.records().admins.clone())
    }

    async fn insert_admin(&self, admin: NewAdmin, event: NewAuditEvent) -> Result<Admin> {
        let mut records = self.records_mut();
        if records.admins.iter().any(|a| a.username == admin.username) {
            return Err(Error::conflict(format!(
                "Admin username already in use: {}",
                admin.username
            )));
        }
        let admin = Admin {
            id: Id::new(),
            admin,
        };
        records.admins.push(admin.clone());
        records.append_audit(event);
        Ok(admin)
    }
}
