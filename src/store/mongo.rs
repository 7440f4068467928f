use std::collections::HashMap;

use log::{debug, info, warn};
use mongodb::{
    bson::{doc, from_document, DateTime as BsonDateTime, Document},
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{FindOptions, UpdateOptions},
    results::InsertOneResult,
    Client, ClientSession, Database,
};
use rocket::futures::TryStreamExt;

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
    mongodb::{ensure_indexes_exist, is_duplicate_key_error, Coll, Id},
    pagination::Pagination,
};

/// Attempts at a whole transaction before giving up on transient errors.
const MAX_TRANSACTION_ATTEMPTS: u32 = 5;
/// Attempts at a commit whose result is unknown.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// How a transaction body wants the transaction to end.
enum TxOutcome<T> {
    Commit(T),
    Abort(T),
}

/// MongoDB-backed store. Multi-record changes run as multi-document
/// transactions, so the server must be a replica set.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    /// Connect, create indexes, and make sure the settings record exists.
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let store = Self::from_client(client, db_name);
        ensure_indexes_exist(&store.db).await?;
        store.ensure_settings_exist().await?;
        info!("Using MongoDB database {db_name}");
        Ok(store)
    }

    pub fn from_client(client: Client, db_name: &str) -> Self {
        let db = client.database(db_name);
        Self { client, db }
    }

    async fn ensure_settings_exist(&self) -> Result<()> {
        let initial = ElectionSettings::initial();
        let insert = doc! {
            "$setOnInsert": {
                "voting_open": initial.voting_open,
                "show_live_results": initial.show_live_results,
                "version": 0_i64,
                "updated_at": BsonDateTime::from_chrono(initial.updated_at),
            }
        };
        let upsert = UpdateOptions::builder().upsert(true).build();
        Coll::<ElectionSettings>::from_db(&self.db)
            .update_one(ElectionSettings::filter(), insert, upsert)
            .await?;
        Ok(())
    }

    fn coll<T>(&self) -> Coll<T>
    where
        T: crate::model::mongodb::MongoCollection,
    {
        Coll::from_db(&self.db)
    }

    async fn begin(&self) -> Result<ClientSession> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;
        Ok(session)
    }

    async fn insert_audit_in(
        &self,
        session: &mut ClientSession,
        event: &NewAuditEvent,
    ) -> Result<Id> {
        let result = self
            .coll::<NewAuditEvent>()
            .insert_one_with_session(event, None, session)
            .await?;
        inserted_id(result)
    }

    async fn insert_voter_in(
        &self,
        session: &mut ClientSession,
        voter: &NewVoter,
        event: &NewAuditEvent,
    ) -> Result<TxOutcome<Voter>> {
        let result = self
            .coll::<NewVoter>()
            .insert_one_with_session(voter, None, session)
            .await;
        let id = match result {
            Ok(result) => inserted_id(result)?,
            Err(err) if is_duplicate_key_error(&err) => {
                return Err(Error::DuplicateIdentity(voter.nim.clone()))
            }
            Err(err) => return Err(err.into()),
        };
        self.insert_audit_in(session, event).await?;
        Ok(TxOutcome::Commit(Voter {
            id,
            voter: voter.clone(),
        }))
    }

    async fn delete_voter_in(
        &self,
        session: &mut ClientSession,
        nim: &IdentityNumber,
        event: &NewAuditEvent,
    ) -> Result<TxOutcome<bool>> {
        let voter = self
            .coll::<Voter>()
            .find_one_with_session(doc! {"nim": nim}, None, session)
            .await?;
        let voter = match voter {
            Some(voter) => voter,
            None => return Ok(TxOutcome::Abort(false)),
        };
        let live_ballot = self
            .coll::<Ballot>()
            .find_one_with_session(live_ballot_filter(nim), None, session)
            .await?;
        if voter.has_voted || live_ballot.is_some() {
            return Err(Error::conflict(format!(
                "Voter {nim} has a recorded ballot and cannot be deleted"
            )));
        }
        self.coll::<Voter>()
            .delete_one_with_session(voter.id.as_doc(), None, session)
            .await?;
        self.insert_audit_in(session, event).await?;
        Ok(TxOutcome::Commit(true))
    }

    async fn reset_vote_status_in(
        &self,
        session: &mut ClientSession,
        nim: &IdentityNumber,
        event: &NewAuditEvent,
    ) -> Result<TxOutcome<Option<ResetOutcome>>> {
        let voter = self
            .coll::<Voter>()
            .find_one_with_session(doc! {"nim": nim}, None, session)
            .await?;
        if voter.is_none() {
            return Ok(TxOutcome::Abort(None));
        }

        let live_ballot = self
            .coll::<Ballot>()
            .find_one_with_session(live_ballot_filter(nim), None, session)
            .await?;
        let retracted = match live_ballot {
            Some(mut ballot) => {
                ballot.retract();
                let retracted_at = ballot.retracted_at.map(BsonDateTime::from_chrono);
                let retract = doc! {
                    "$set": {"retracted": true, "retracted_at": retracted_at}
                };
                self.coll::<Ballot>()
                    .update_one_with_session(ballot.id.as_doc(), retract, None, session)
                    .await?;
                let decrement = doc! {"$inc": {"total": -1_i64}};
                self.coll::<CandidateTotals>()
                    .update_one_with_session(
                        doc! {"_id": i64::from(ballot.candidate_id), "total": {"$gt": 0}},
                        decrement,
                        None,
                        session,
                    )
                    .await?;
                Some(ballot)
            }
            None => None,
        };

        let clear = doc! {"$set": {"has_voted": false, "voted_at": null}};
        self.coll::<Voter>()
            .update_one_with_session(doc! {"nim": nim}, clear, None, session)
            .await?;

        let mut event = event.clone();
        event.detail.ballot_retracted = Some(retracted.is_some());
        self.insert_audit_in(session, &event).await?;
        Ok(TxOutcome::Commit(Some(ResetOutcome { retracted })))
    }

    async fn insert_candidate_in(
        &self,
        session: &mut ClientSession,
        candidate: &Candidate,
        event: &NewAuditEvent,
    ) -> Result<TxOutcome<Candidate>> {
        let result = self
            .coll::<Candidate>()
            .insert_one_with_session(candidate, None, session)
            .await;
        match result {
            Ok(_) => {}
            Err(err) if is_duplicate_key_error(&err) => {
                return Err(Error::conflict(format!(
                    "Ballot position {} is already taken",
                    candidate.id
                )))
            }
            Err(err) => return Err(err.into()),
        }
        self.insert_audit_in(session, event).await?;
        Ok(TxOutcome::Commit(candidate.clone()))
    }

    async fn update_settings_in(
        &self,
        session: &mut ClientSession,
        patch: &SettingsPatch,
        event: &NewAuditEvent,
    ) -> Result<TxOutcome<ElectionSettings>> {
        let mut settings = self
            .coll::<ElectionSettings>()
            .find_one_with_session(ElectionSettings::filter(), None, session)
            .await?
            .unwrap_or_default();
        if !settings.apply(patch) {
            return Ok(TxOutcome::Abort(settings));
        }
        let upsert = mongodb::options::ReplaceOptions::builder()
            .upsert(true)
            .build();
        self.coll::<ElectionSettings>()
            .replace_one_with_session(ElectionSettings::filter(), &settings, upsert, session)
            .await?;
        self.insert_audit_in(session, event).await?;
        Ok(TxOutcome::Commit(settings))
    }

    async fn commit_vote_in(
        &self,
        session: &mut ClientSession,
        ballot: &NewBallot,
        event: &NewAuditEvent,
    ) -> Result<TxOutcome<CommitOutcome>> {
        let rejected = |reason: RejectReason| -> Result<TxOutcome<CommitOutcome>> {
            Ok(TxOutcome::Abort(CommitOutcome::Rejected(reason)))
        };

        // Commit-time phase check; never served from a cache.
        let settings = self
            .coll::<ElectionSettings>()
            .find_one_with_session(ElectionSettings::filter(), None, session)
            .await?
            .unwrap_or_default();
        if !settings.voting_open {
            return rejected(RejectReason::VotingClosed);
        }

        // The conditional flip is the row lock: a concurrent transaction
        // touching the same voter hits a write conflict and is retried.
        let mark_voted = doc! {
            "$set": {
                "has_voted": true,
                "voted_at": BsonDateTime::from_chrono(ballot.cast_at),
            }
        };
        let result = self
            .coll::<Voter>()
            .update_one_with_session(
                doc! {"nim": &ballot.voter_nim, "has_voted": false},
                mark_voted,
                None,
                session,
            )
            .await?;
        if result.matched_count == 0 {
            let exists = self
                .coll::<Voter>()
                .find_one_with_session(doc! {"nim": &ballot.voter_nim}, None, session)
                .await?
                .is_some();
            return rejected(if exists {
                RejectReason::AlreadyVoted
            } else {
                RejectReason::InvalidCredential
            });
        }

        let candidate = self
            .coll::<Candidate>()
            .find_one_with_session(doc! {"_id": i64::from(ballot.candidate_id)}, None, session)
            .await?;
        if candidate.is_none() {
            return rejected(RejectReason::CandidateNotFound);
        }

        let result = self
            .coll::<NewBallot>()
            .insert_one_with_session(ballot, None, session)
            .await;
        let id = match result {
            Ok(result) => inserted_id(result)?,
            Err(err) if is_duplicate_key_error(&err) => {
                return rejected(RejectReason::AlreadyVoted);
            }
            Err(err) => return Err(err.into()),
        };

        let increment = doc! {"$inc": {"total": 1_i64}};
        let upsert = UpdateOptions::builder().upsert(true).build();
        self.coll::<CandidateTotals>()
            .update_one_with_session(
                doc! {"_id": i64::from(ballot.candidate_id)},
                increment,
                upsert,
                session,
            )
            .await?;

        self.insert_audit_in(session, event).await?;
        Ok(TxOutcome::Commit(CommitOutcome::Committed(Ballot {
            id,
            ballot: ballot.clone(),
        })))
    }

    async fn insert_admin_in(
        &self,
        session: &mut ClientSession,
        admin: &NewAdmin,
        event: &NewAuditEvent,
    ) -> Result<TxOutcome<Admin>> {
        let result = self
            .coll::<NewAdmin>()
            .insert_one_with_session(admin, None, session)
            .await;
        let id = match result {
            Ok(result) => inserted_id(result)?,
            Err(err) if is_duplicate_key_error(&err) => {
                return Err(Error::conflict(format!(
                    "Admin username already in use: {}",
                    admin.username
                )))
            }
            Err(err) => return Err(err.into()),
        };
        self.insert_audit_in(session, event).await?;
        Ok(TxOutcome::Commit(Admin {
            id,
            admin: admin.clone(),
        }))
    }
}

/// Commit or abort according to the body's result.
async fn finish<T>(session: &mut ClientSession, result: Result<TxOutcome<T>>) -> Result<T> {
    match result {
        Ok(TxOutcome::Commit(value)) => {
            commit(session).await?;
            Ok(value)
        }
        Ok(TxOutcome::Abort(value)) => {
            abort(session).await;
            Ok(value)
        }
        Err(err) => {
            abort(session).await;
            Err(err)
        }
    }
}

async fn commit(session: &mut ClientSession) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(err) if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) => {
                if attempt >= MAX_COMMIT_ATTEMPTS {
                    return Err(Error::TransientStore(format!(
                        "transaction commit result unknown: {err}"
                    )));
                }
                warn!("Commit result unknown, retrying (attempt {attempt}): {err}");
            }
            Err(err) => return Err(err.into()),
        }
    }
}

async fn abort(session: &mut ClientSession) {
    // The server may already have aborted the transaction after a write error.
    if let Err(err) = session.abort_transaction().await {
        debug!("Ignoring abort failure: {err}");
    }
}

/// Should a failed transaction be run again from the start?
fn should_retry(err: &Error, attempt: &mut u32) -> bool {
    *attempt += 1;
    match err {
        Error::Db(db_err) if db_err.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
            if *attempt >= MAX_TRANSACTION_ATTEMPTS {
                warn!("Giving up on transaction after {attempt} attempts: {db_err}");
                return false;
            }
            debug!("Transient transaction error, retrying (attempt {attempt}): {db_err}");
            true
        }
        _ => false,
    }
}

fn inserted_id(result: InsertOneResult) -> Result<Id> {
    result
        .inserted_id
        .as_object_id()
        .map(Id::from)
        .ok_or_else(|| Error::internal("Database returned a non-ObjectId key"))
}

fn live_ballot_filter(nim: &IdentityNumber) -> Document {
    doc! {"voter_nim": nim, "retracted": false}
}

fn audit_filter_doc(filter: &AuditFilter) -> Document {
    let mut query = Document::new();
    if let Some(kind) = filter.kind {
        query.insert("kind", kind);
    }
    if let Some(ref nim) = filter.nim {
        query.insert("detail.nim", nim.as_str());
    }
    query
}

#[rocket::async_trait]
impl ElectionStore for MongoStore {
    async fn voter(&self, nim: &IdentityNumber) -> Result<Option<Voter>> {
        Ok(self.coll::<Voter>().find_one(doc! {"nim": nim}, None).await?)
    }

    async fn voters(&self, page: Pagination) -> Result<(Vec<Voter>, u64)> {
        let options = FindOptions::builder()
            .sort(doc! {"created_at": -1, "_id": -1})
            .skip(page.skip())
            .limit(page.page_size() as i64)
            .build();
        let voters = self.coll::<Voter>();
        let page = voters.find(None, options).await?.try_collect().await?;
        let total = voters.count_documents(None, None).await?;
        Ok((page, total))
    }

    async fn insert_voter(&self, voter: NewVoter, event: NewAuditEvent) -> Result<Voter> {
        let mut attempt = 0;
        loop {
            let mut session = self.begin().await?;
            let result = self.insert_voter_in(&mut session, &voter, &event).await;
            match finish(&mut session, result).await {
                Err(err) if should_retry(&err, &mut attempt) => continue,
                result => return result,
            }
        }
    }

    async fn delete_voter(&self, nim: &IdentityNumber, event: NewAuditEvent) -> Result<bool> {
        let mut attempt = 0;
        loop {
            let mut session = self.begin().await?;
            let result = self.delete_voter_in(&mut session, nim, &event).await;
            match finish(&mut session, result).await {
                Err(err) if should_retry(&err, &mut attempt) => continue,
                result => return result,
            }
        }
    }

    async fn reset_vote_status(
        &self,
        nim: &IdentityNumber,
        event: NewAuditEvent,
    ) -> Result<Option<ResetOutcome>> {
        let mut attempt = 0;
        loop {
            let mut session = self.begin().await?;
            let result = self.reset_vote_status_in(&mut session, nim, &event).await;
            match finish(&mut session, result).await {
                Err(err) if should_retry(&err, &mut attempt) => continue,
                result => return result,
            }
        }
    }

    async fn candidates(&self) -> Result<Vec<Candidate>> {
        let options = FindOptions::builder().sort(doc! {"_id": 1}).build();
        let candidates = self
            .coll::<Candidate>()
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn insert_candidate(
        &self,
        candidate: Candidate,
        event: NewAuditEvent,
    ) -> Result<Candidate> {
        let mut attempt = 0;
        loop {
            let mut session = self.begin().await?;
            let result = self
                .insert_candidate_in(&mut session, &candidate, &event)
                .await;
            match finish(&mut session, result).await {
                Err(err) if should_retry(&err, &mut attempt) => continue,
                result => return result,
            }
        }
    }

    async fn settings(&self) -> Result<ElectionSettings> {
        Ok(self
            .coll::<ElectionSettings>()
            .find_one(ElectionSettings::filter(), None)
            .await?
            .unwrap_or_default())
    }

    async fn update_settings(
        &self,
        patch: &SettingsPatch,
        event: NewAuditEvent,
    ) -> Result<ElectionSettings> {
        let mut attempt = 0;
        loop {
            let mut session = self.begin().await?;
            let result = self.update_settings_in(&mut session, patch, &event).await;
            match finish(&mut session, result).await {
                Err(err) if should_retry(&err, &mut attempt) => continue,
                result => return result,
            }
        }
    }

    async fn commit_vote(&self, ballot: NewBallot, event: NewAuditEvent) -> Result<CommitOutcome> {
        let mut attempt = 0;
        loop {
            let mut session = self.begin().await?;
            let result = self.commit_vote_in(&mut session, &ballot, &event).await;
            match finish(&mut session, result).await {
                Err(err) if should_retry(&err, &mut attempt) => continue,
                result => return result,
            }
        }
    }

    async fn totals(&self) -> Result<Vec<CandidateTotals>> {
        let options = FindOptions::builder().sort(doc! {"_id": 1}).build();
        let totals = self
            .coll::<CandidateTotals>()
            .find(None, options)
            .await?
            .try_collect()
            .await?;
        Ok(totals)
    }

    async fn count_live_ballots(&self) -> Result<HashMap<CandidateId, u64>> {
        let pipeline = [
            doc! {"$match": {"retracted": false}},
            doc! {"$group": {"_id": "$candidate_id", "total": {"$sum": 1}}},
        ];
        let groups: Vec<Document> = self
            .coll::<Ballot>()
            .aggregate(pipeline, None)
            .await?
            .try_collect()
            .await?;
        groups
            .into_iter()
            .map(|group| -> Result<(CandidateId, u64)> {
                let counted: CandidateTotals = from_document(group)
                    .map_err(|err| Error::internal(format!("Malformed ballot count: {err}")))?;
                Ok((counted.candidate_id, counted.total))
            })
            .collect()
    }

    async fn roll_stats(&self) -> Result<RollStats> {
        let voters = self.coll::<Voter>();
        Ok(RollStats {
            registered_voters: voters.count_documents(None, None).await?,
            voted: voters.count_documents(doc! {"has_voted": true}, None).await?,
            live_ballots: self
                .coll::<Ballot>()
                .count_documents(doc! {"retracted": false}, None)
                .await?,
        })
    }

    async fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent> {
        let result = self
            .coll::<NewAuditEvent>()
            .insert_one(&event, None)
            .await?;
        Ok(AuditEvent {
            id: inserted_id(result)?,
            event,
        })
    }

    async fn audit_events(
        &self,
        filter: &AuditFilter,
        page: Pagination,
    ) -> Result<(Vec<AuditEvent>, u64)> {
        let options = FindOptions::builder()
            .sort(doc! {"timestamp": -1, "_id": -1})
            .skip(page.skip())
            .limit(page.page_size() as i64)
            .build();
        let events = self.coll::<AuditEvent>();
        let page = events
            .find(audit_filter_doc(filter), options)
            .await?
            .try_collect()
            .await?;
        let total = events.count_documents(audit_filter_doc(filter), None).await?;
        Ok((page, total))
    }

    async fn count_audit_events(&self, filter: &AuditFilter) -> Result<u64> {
        Ok(self
            .coll::<AuditEvent>()
            .count_documents(audit_filter_doc(filter), None)
            .await?)
    }

    async fn admin_by_username(&self, username: &str) -> Result<Option<Admin>> {
        Ok(self
            .coll::<Admin>()
            .find_one(doc! {"username": username}, None)
            .await?)
    }

    async fn admin_by_id(&self, id: Id) -> Result<Option<Admin>> {
        Ok(self.coll::<Admin>().find_one(id.as_doc(), None).await?)
    }

    async fn admins(&self) -> Result<Vec<Admin>> {
        let admins = self
            .coll::<Admin>()
            .find(None, None)
            .await?
            .try_collect()
            .await?;
        Ok(admins)
    }

    async fn insert_admin(&self, admin: NewAdmin, event: NewAuditEvent) -> Result<Admin> {
        let mut attempt = 0;
        loop {
            let mut session = self.begin().await?;
            let result = self.insert_admin_in(&mut session, &admin, &event).await;
            match finish(&mut session, result).await {
                Err(err) if should_retry(&err, &mut attempt) => continue,
                result => return result,
            }
        }
    }
}
