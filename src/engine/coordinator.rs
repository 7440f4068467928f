use log::info;
use rocket::tokio;

use super::{
    audit::AuditTrail,
    client_info::{ClientInfo, IpEnricher},
    credentials::CredentialStore,
    locks::VoterLocks,
    phase::ElectionPhaseGate,
};
use crate::error::{Error, Result};
use crate::model::{
    api::vote::{CredentialRequest, ValidateResponse, VoteRequest},
    common::{client::ClientMetadata, identity::IdentityNumber, vote::RejectReason},
    db::{
        audit::NewAuditEvent,
        ballot::{Ballot, NewBallot},
        candidate::CandidateId,
    },
};
use crate::store::{CommitOutcome, Store};

/// Terminal result of a ballot submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Success(Ballot),
    Rejected(RejectReason),
}

/// Turns a submission into exactly one committed ballot or one rejection,
/// with exactly one audit event either way.
#[derive(Clone)]
pub struct VoteTransactionCoordinator {
    store: Store,
    credentials: CredentialStore,
    phase: ElectionPhaseGate,
    audit: AuditTrail,
    locks: VoterLocks,
    enricher: IpEnricher,
}

impl VoteTransactionCoordinator {
    pub fn new(
        store: Store,
        credentials: CredentialStore,
        phase: ElectionPhaseGate,
        audit: AuditTrail,
        enricher: IpEnricher,
    ) -> Self {
        Self {
            store,
            credentials,
            phase,
            audit,
            locks: VoterLocks::new(),
            enricher,
        }
    }

    /// Pre-check a credential before the voter enters the ballot screen.
    /// Failed credentials are recorded; nothing else is written.
    pub async fn validate_voter(
        &self,
        credential: CredentialRequest,
        client: ClientInfo,
    ) -> Result<ValidateResponse> {
        let (validation, metadata) = tokio::join!(
            self.credentials.validate(&credential),
            self.enricher.metadata(&client, None)
        );
        let voter = match validation? {
            Ok(voter) => voter,
            Err(reason) => {
                self.audit
                    .record_login_failure(&credential.nim, &metadata)
                    .await?;
                return Ok(ValidateResponse::rejected(reason));
            }
        };
        if voter.has_voted {
            return Ok(ValidateResponse::rejected(RejectReason::AlreadyVoted));
        }
        if !self.phase.is_voting_open().await? {
            return Ok(ValidateResponse::rejected(RejectReason::VotingClosed));
        }
        Ok(ValidateResponse::ok())
    }

    /// Submit a ballot.
    ///
    /// The work runs in its own task, so it completes (and is audited) even
    /// if the caller goes away mid-request.
    pub async fn submit_vote(&self, request: VoteRequest, client: ClientInfo) -> Result<VoteOutcome> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run_submission(request, client).await })
            .await
            .map_err(|err| Error::internal(format!("Vote submission task failed: {err}")))?
    }

    async fn run_submission(&self, request: VoteRequest, client: ClientInfo) -> Result<VoteOutcome> {
        match self.process(&request, &client).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.audit
                    .record_system_error(Some(&request.nim), err.to_string())
                    .await;
                Err(err)
            }
        }
    }

    async fn process(&self, request: &VoteRequest, client: &ClientInfo) -> Result<VoteOutcome> {
        let credential = request.credential();
        let (validation, metadata) = tokio::join!(
            self.credentials.validate(&credential),
            self.enricher
                .metadata(client, request.client_info.user_agent.as_deref())
        );

        let voter = match validation? {
            Ok(voter) => voter,
            Err(reason) => {
                self.audit
                    .record_login_failure(&request.nim, &metadata)
                    .await?;
                info!("Vote rejected: {reason}");
                return Ok(VoteOutcome::Rejected(reason));
            }
        };
        let nim = &voter.nim;

        if !self.phase.authoritative().await?.voting_open {
            return self
                .reject(nim, request.candidate_id, RejectReason::VotingClosed, &metadata)
                .await;
        }

        let ballot = NewBallot::new(nim.clone(), request.candidate_id, metadata.clone());
        let event = NewAuditEvent::vote_success(nim, request.candidate_id, &metadata);
        let outcome = {
            let _guard = self.locks.lock(nim).await;
            self.store.commit_vote(ballot, event).await?
        };

        match outcome {
            CommitOutcome::Committed(ballot) => {
                info!("Ballot {} committed for voter {nim}", ballot.id);
                Ok(VoteOutcome::Success(ballot))
            }
            CommitOutcome::Rejected(reason) => {
                self.reject(nim, request.candidate_id, reason, &metadata)
                    .await
            }
        }
    }

    async fn reject(
        &self,
        nim: &IdentityNumber,
        candidate_id: CandidateId,
        reason: RejectReason,
        metadata: &ClientMetadata,
    ) -> Result<VoteOutcome> {
        self.audit
            .append(NewAuditEvent::vote_rejected(nim, candidate_id, reason, metadata))
            .await?;
        info!("Vote by {nim} rejected: {reason}");
        Ok(VoteOutcome::Rejected(reason))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::engine::Engine;
    use crate::model::{
        api::voter::NewVoterRequest,
        common::audit::AuditKind,
        db::{audit::AuditEvent, candidate::Candidate},
    };
    use crate::model::{
        api::{audit::AuditFilter, recap::RollStats, settings::SettingsPatch},
        db::{
            admin::{Admin, NewAdmin},
            candidate_totals::CandidateTotals,
            settings::ElectionSettings,
            voter::{NewVoter, Voter},
        },
        mongodb::Id,
        pagination::Pagination,
    };
    use crate::store::{ElectionStore, MemoryStore, ResetOutcome};

    /// A store whose ballot commits always fail; everything else works.
    struct UnavailableLedger(MemoryStore);

    #[rocket::async_trait]
    impl ElectionStore for UnavailableLedger {
        async fn voter(&self, nim: &IdentityNumber) -> Result<Option<Voter>> {
            self.0.voter(nim).await
        }

        async fn voters(&self, page: Pagination) -> Result<(Vec<Voter>, u64)> {
            self.0.voters(page).await
        }

        async fn insert_voter(&self, voter: NewVoter, event: NewAuditEvent) -> Result<Voter> {
            self.0.insert_voter(voter, event).await
        }

        async fn delete_voter(&self, nim: &IdentityNumber, event: NewAuditEvent) -> Result<bool> {
            self.0.delete_voter(nim, event).await
        }

        async fn reset_vote_status(
            &self,
            nim: &IdentityNumber,
            event: NewAuditEvent,
        ) -> Result<Option<ResetOutcome>> {
            self.0.reset_vote_status(nim, event).await
        }

        async fn candidates(&self) -> Result<Vec<Candidate>> {
            self.0.candidates().await
        }

        async fn insert_candidate(
            &self,
            candidate: Candidate,
            event: NewAuditEvent,
        ) -> Result<Candidate> {
            self.0.insert_candidate(candidate, event).await
        }

        async fn settings(&self) -> Result<ElectionSettings> {
            self.0.settings().await
        }

        async fn update_settings(
            &self,
            patch: &SettingsPatch,
            event: NewAuditEvent,
        ) -> Result<ElectionSettings> {
            self.0.update_settings(patch, event).await
        }

        async fn commit_vote(&self, _ballot: NewBallot, _event: NewAuditEvent) -> Result<CommitOutcome> {
            Err(Error::TransientStore("ledger unreachable".to_string()))
        }

        async fn totals(&self) -> Result<Vec<CandidateTotals>> {
            self.0.totals().await
        }

        async fn count_live_ballots(&self) -> Result<HashMap<CandidateId, u64>> {
            self.0.count_live_ballots().await
        }

        async fn roll_stats(&self) -> Result<RollStats> {
            self.0.roll_stats().await
        }

        async fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent> {
            self.0.append_audit(event).await
        }

        async fn audit_events(
            &self,
            filter: &AuditFilter,
            page: Pagination,
        ) -> Result<(Vec<AuditEvent>, u64)> {
            self.0.audit_events(filter, page).await
        }

        async fn count_audit_events(&self, filter: &AuditFilter) -> Result<u64> {
            self.0.count_audit_events(filter).await
        }

        async fn admin_by_username(&self, username: &str) -> Result<Option<Admin>> {
            self.0.admin_by_username(username).await
        }

        async fn admin_by_id(&self, id: Id) -> Result<Option<Admin>> {
            self.0.admin_by_id(id).await
        }

        async fn admins(&self) -> Result<Vec<Admin>> {
            self.0.admins().await
        }

        async fn insert_admin(&self, admin: NewAdmin, event: NewAuditEvent) -> Result<Admin> {
            self.0.insert_admin(admin, event).await
        }
    }

    async fn election(store: &MemoryStore, open: bool) -> Engine {
        let engine = Engine::for_tests(Arc::new(store.clone()));
        for id in 1..=2 {
            store
                .insert_candidate(Candidate::numbered(id), NewAuditEvent::admin_action("t", "add"))
                .await
                .unwrap();
        }
        engine
            .credentials
            .add_voter(NewVoterRequest::example(), "panitia")
            .await
            .unwrap();
        if open {
            engine.phase.set_voting_open(true, "panitia").await.unwrap();
        }
        engine
    }

    fn events_since(store: &MemoryStore, start: usize) -> Vec<AuditEvent> {
        store.audit_trail().split_off(start)
    }

    #[rocket::async_test]
    async fn first_vote_succeeds_and_second_is_rejected() {
        let store = MemoryStore::new();
        let engine = election(&store, true).await;
        let start = store.audit_trail().len();

        let first = engine
            .coordinator
            .submit_vote(VoteRequest::example(), ClientInfo::default())
            .await
            .unwrap();
        let ballot = match first {
            VoteOutcome::Success(ballot) => ballot,
            other => panic!("Expected success, got {other:?}"),
        };
        assert_eq!(ballot.candidate_id, 1);

        let second = engine
            .coordinator
            .submit_vote(VoteRequest::example(), ClientInfo::default())
            .await
            .unwrap();
        assert_eq!(second, VoteOutcome::Rejected(RejectReason::AlreadyVoted));

        let recap = engine.recap.recap().await.unwrap();
        assert_eq!(recap[0].candidate_id, 1);
        assert_eq!(recap[0].total, 1);
        assert_eq!(recap[1].total, 0);

        let kinds: Vec<AuditKind> = events_since(&store, start).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![AuditKind::VoteSuccess, AuditKind::VoteRejected]);
    }

    #[rocket::async_test]
    async fn concurrent_submissions_commit_one_ballot() {
        const SUBMISSIONS: usize = 16;
        let store = MemoryStore::new();
        let engine = election(&store, true).await;

        let handles: Vec<_> = (0..SUBMISSIONS)
            .map(|i| {
                let coordinator = engine.coordinator.clone();
                let request = VoteRequest::for_candidate(1 + (i % 2) as CandidateId);
                tokio::spawn(async move {
                    coordinator
                        .submit_vote(request, ClientInfo::default())
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let successes = outcomes
            .iter()
            .filter(|o| matches!(o, VoteOutcome::Success(_)))
            .count();
        let already_voted = outcomes
            .iter()
            .filter(|o| **o == VoteOutcome::Rejected(RejectReason::AlreadyVoted))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(already_voted, SUBMISSIONS - 1);

        let nim = "2235001".parse().unwrap();
        assert_eq!(store.ballots_for(&nim).len(), 1);
        let total: u64 = engine.recap.recap().await.unwrap().iter().map(|e| e.total).sum();
        assert_eq!(total, 1);
        assert!(engine.recap.verify().await.unwrap().consistent);
    }

    #[rocket::async_test]
    async fn store_fault_is_reported_and_audited() {
        let store = MemoryStore::new();
        // Set up the election on the working store, then vote through the failing one.
        let setup = election(&store, true).await;
        let recap_before = setup.recap.recap().await.unwrap();
        let engine = Engine::for_tests(Arc::new(UnavailableLedger(store.clone())));
        let start = store.audit_trail().len();

        let err = engine
            .coordinator
            .submit_vote(VoteRequest::example(), ClientInfo::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.status(), rocket::http::Status::ServiceUnavailable);

        let events = events_since(&store, start);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::SystemError);
        assert_eq!(events[0].detail.nim.as_deref(), Some("2235001"));

        let nim = "2235001".parse().unwrap();
        assert!(store.ballots_for(&nim).is_empty());
        assert!(!store.voter(&nim).await.unwrap().unwrap().has_voted);
        assert_eq!(engine.recap.recap().await.unwrap(), recap_before);
        assert!(engine.recap.verify().await.unwrap().consistent);
    }

    #[rocket::async_test]
    async fn closed_election_rejects_without_ballot() {
        let store = MemoryStore::new();
        let engine = election(&store, false).await;
        let start = store.audit_trail().len();

        let outcome = engine
            .coordinator
            .submit_vote(VoteRequest::example(), ClientInfo::default())
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::Rejected(RejectReason::VotingClosed));
        assert!(store.ballots_for(&"2235001".parse().unwrap()).is_empty());

        let events = events_since(&store, start);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::VoteRejected);
        assert_eq!(events[0].detail.reason, Some(RejectReason::VotingClosed));
    }

    #[rocket::async_test]
    async fn every_outcome_is_audited_once() {
        let store = MemoryStore::new();
        let engine = election(&store, true).await;
        let start = store.audit_trail().len();

        let mut wrong_code = VoteRequest::example();
        wrong_code.access_code = "WRONG1".into();
        let mut unknown = VoteRequest::example();
        unknown.nim = "2235999".into();
        let mut malformed = VoteRequest::example();
        malformed.nim = "not-a-nim".into();
        let requests = [
            wrong_code,
            unknown,
            malformed,
            VoteRequest::for_candidate(7),
            VoteRequest::example(),
            VoteRequest::example(),
        ];

        let mut outcomes = Vec::new();
        for request in requests {
            outcomes.push(
                engine
                    .coordinator
                    .submit_vote(request, ClientInfo::default())
                    .await
                    .unwrap(),
            );
        }
        let invalid = VoteOutcome::Rejected(RejectReason::InvalidCredential);
        assert_eq!(outcomes[0], invalid);
        assert_eq!(outcomes[1], invalid);
        assert_eq!(outcomes[2], invalid);
        assert_eq!(outcomes[3], VoteOutcome::Rejected(RejectReason::CandidateNotFound));
        assert!(matches!(outcomes[4], VoteOutcome::Success(_)));
        assert_eq!(outcomes[5], VoteOutcome::Rejected(RejectReason::AlreadyVoted));

        let events = events_since(&store, start);
        assert_eq!(events.len(), outcomes.len());
        let kinds: Vec<AuditKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AuditKind::LoginFail,
                AuditKind::LoginFail,
                AuditKind::LoginFail,
                AuditKind::VoteRejected,
                AuditKind::VoteSuccess,
                AuditKind::VoteRejected,
            ]
        );
        // Failures record the identity exactly as submitted.
        assert_eq!(events[0].detail.nim.as_deref(), Some("2235001"));
        assert_eq!(events[2].detail.nim.as_deref(), Some("not-a-nim"));
        assert_eq!(events[0].detail.attempt, Some(1));
    }

    #[rocket::async_test]
    async fn tallies_match_ballots_after_reset() {
        let store = MemoryStore::new();
        let engine = election(&store, true).await;
        let mut expected: HashMap<CandidateId, u64> = HashMap::new();
        for (i, nim) in ["2235010", "2235011", "2235012", "2235013", "2235014"]
            .into_iter()
            .enumerate()
        {
            let issued = engine
                .credentials
                .add_voter(NewVoterRequest::generated(nim), "panitia")
                .await
                .unwrap();
            let candidate_id = 1 + (i % 2) as CandidateId;
            let request = VoteRequest {
                nim: nim.into(),
                access_code: issued.access_code,
                candidate_id,
                client_info: Default::default(),
            };
            let outcome = engine
                .coordinator
                .submit_vote(request, ClientInfo::default())
                .await
                .unwrap();
            assert!(matches!(outcome, VoteOutcome::Success(_)));
            *expected.entry(candidate_id).or_default() += 1;
        }

        // Retract one vote for candidate 1.
        let nim: IdentityNumber = "2235010".parse().unwrap();
        let reset = engine
            .credentials
            .reset_vote_status(&nim, "panitia")
            .await
            .unwrap();
        assert!(reset.ballot_retracted);
        let voter = store.voter(&nim).await.unwrap().unwrap();
        assert!(!voter.has_voted);
        let reset_event = store.audit_trail().pop().unwrap();
        assert_eq!(reset_event.kind, AuditKind::AdminAction);
        assert_eq!(reset_event.detail.ballot_retracted, Some(true));

        *expected.get_mut(&1).unwrap() -= 1;
        assert_eq!(engine.recap.recount().await.unwrap(), expected);
        let stats = engine.recap.stats().await.unwrap();
        assert_eq!(stats.registered_voters, 6);
        assert_eq!(stats.voted, 4);
        assert_eq!(stats.live_ballots, 4);

        // The retracted ballot is kept as history.
        let ballots = store.ballots_for(&nim);
        assert_eq!(ballots.len(), 1);
        assert!(ballots[0].retracted);

        let verification = engine.recap.verify().await.unwrap();
        assert!(verification.consistent, "{verification:?}");
        let recap = engine.recap.recap().await.unwrap();
        for entry in recap {
            assert_eq!(Some(&entry.total), expected.get(&entry.candidate_id));
        }
    }

    #[rocket::async_test]
    async fn validation_reports_gates_after_credentials() {
        let store = MemoryStore::new();
        let engine = election(&store, false).await;

        let closed = engine
            .coordinator
            .validate_voter(CredentialRequest::example(), ClientInfo::default())
            .await
            .unwrap();
        assert_eq!(closed, ValidateResponse::rejected(RejectReason::VotingClosed));

        let mut wrong = CredentialRequest::example();
        wrong.access_code = "WRONG1".into();
        let start = store.audit_trail().len();
        let invalid = engine
            .coordinator
            .validate_voter(wrong, ClientInfo::default())
            .await
            .unwrap();
        assert_eq!(invalid, ValidateResponse::rejected(RejectReason::InvalidCredential));
        assert_eq!(events_since(&store, start)[0].kind, AuditKind::LoginFail);

        engine.phase.set_voting_open(true, "panitia").await.unwrap();
        let ok = engine
            .coordinator
            .validate_voter(CredentialRequest::example(), ClientInfo::default())
            .await
            .unwrap();
        assert_eq!(ok, ValidateResponse::ok());
        // Validation casts nothing.
        assert!(store.ballots_for(&"2235001".parse().unwrap()).is_empty());
    }
}
