use std::sync::Arc;

use log::info;
use rocket::tokio::task::spawn_blocking;

use super::hasher::CredentialHasher;
use crate::error::{Error, Result};
use crate::model::{
    api::{
        vote::CredentialRequest,
        voter::{IssuedCredential, NewVoterRequest, ResetResponse, VoterPage, VoterSummary},
    },
    common::{
        identity::{AccessCode, IdentityNumber},
        vote::RejectReason,
    },
    db::{audit::NewAuditEvent, voter::NewVoter, voter::Voter},
    pagination::Pagination,
};
use crate::store::Store;

/// Outcome of a credential check.
pub type Validation = std::result::Result<Voter, RejectReason>;

/// The voter roll and its one-time access codes.
#[derive(Clone)]
pub struct CredentialStore {
    store: Store,
    hasher: Arc<dyn CredentialHasher>,
}

impl CredentialStore {
    pub fn new(store: Store, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { store, hasher }
    }

    /// Verify on a blocking thread. Without a stored hash the dummy hash is
    /// checked instead and the result is always false.
    pub async fn verify(&self, plain: String, hash: Option<String>) -> Result<bool> {
        let hasher = self.hasher.clone();
        spawn_blocking(move || match hash {
            Some(hash) => hasher.verify(&plain, &hash),
            None => hasher.verify(&plain, hasher.dummy_hash()).map(|_| false),
        })
        .await
        .map_err(|err| Error::internal(format!("Credential check task failed: {err}")))?
    }

    /// Hash on a blocking thread.
    pub async fn hash(&self, plain: String) -> Result<String> {
        let hasher = self.hasher.clone();
        spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|err| Error::internal(format!("Hashing task failed: {err}")))?
    }

    /// The voter the credential belongs to, or why it was refused.
    ///
    /// Malformed input, unknown identities and wrong codes all reduce to
    /// `InvalidCredential` and are indistinguishable, including in how long
    /// they take. Never changes election state; callers decide which further
    /// gates (phase, vote status) to apply.
    pub async fn validate(&self, credential: &CredentialRequest) -> Result<Validation> {
        let nim = credential.nim.parse::<IdentityNumber>();
        let code = credential.access_code.parse::<AccessCode>();
        let (nim, code) = match (nim, code) {
            (Ok(nim), Ok(code)) => (nim, code),
            _ => {
                self.verify(credential.access_code.clone(), None).await?;
                return Ok(Err(RejectReason::InvalidCredential));
            }
        };

        let voter = self.store.voter(&nim).await?;
        let hash = voter.as_ref().map(|voter| voter.access_code_hash.clone());
        let matches = self.verify(code.into_plaintext(), hash).await?;
        Ok(voter
            .filter(|_| matches)
            .ok_or(RejectReason::InvalidCredential))
    }

    /// Add a voter to the roll. Returns the plaintext access code, which is
    /// not retrievable afterwards.
    pub async fn add_voter(&self, request: NewVoterRequest, admin: &str) -> Result<IssuedCredential> {
        let nim: IdentityNumber = request
            .nim
            .parse()
            .map_err(|err| Error::bad_request(format!("Invalid identity number: {err}")))?;
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::bad_request("Voter name must not be empty"));
        }
        let code = match request.access_code {
            Some(code) => code
                .parse::<AccessCode>()
                .map_err(|err| Error::bad_request(format!("Invalid access code: {err}")))?,
            None => AccessCode::random(),
        };

        let hash = self.hash(code.expose().to_string()).await?;
        let event = NewAuditEvent::admin_voter_action(admin, "add_voter", &nim);
        let voter = self
            .store
            .insert_voter(NewVoter::new(nim, name, hash), event)
            .await?;
        info!("Voter {} added by {admin}", voter.nim);

        Ok(IssuedCredential {
            nim: voter.nim.to_string(),
            name: voter.voter.name,
            access_code: code.into_plaintext(),
        })
    }

    /// Remove a voter who has not voted.
    pub async fn delete_voter(&self, nim: &IdentityNumber, admin: &str) -> Result<()> {
        let event = NewAuditEvent::admin_voter_action(admin, "delete_voter", nim);
        if !self.store.delete_voter(nim, event).await? {
            return Err(Error::not_found(format!("Voter {nim}")));
        }
        info!("Voter {nim} deleted by {admin}");
        Ok(())
    }

    /// Privileged override: retract the voter's live ballot, if any, and let
    /// them vote again.
    pub async fn reset_vote_status(&self, nim: &IdentityNumber, admin: &str) -> Result<ResetResponse> {
        let event = NewAuditEvent::admin_voter_action(admin, "reset_vote_status", nim);
        let outcome = self
            .store
            .reset_vote_status(nim, event)
            .await?
            .ok_or_else(|| Error::not_found(format!("Voter {nim}")))?;
        if let Some(ref ballot) = outcome.retracted {
            info!("Ballot {} of voter {nim} retracted by {admin}", ballot.id);
        }
        Ok(ResetResponse {
            nim: nim.to_string(),
            ballot_retracted: outcome.retracted.is_some(),
        })
    }

    pub async fn voters(&self, page: Pagination) -> Result<VoterPage> {
        let (voters, total) = self.store.voters(page).await?;
        Ok(VoterPage {
            voters: voters.into_iter().map(VoterSummary::from).collect(),
            pagination: page.result(total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::hasher::Argon2Hasher;
    use crate::model::common::audit::AuditKind;
    use crate::store::{ElectionStore, MemoryStore};

    fn credentials(store: &MemoryStore) -> CredentialStore {
        CredentialStore::new(Arc::new(store.clone()), Arc::new(Argon2Hasher::fast()))
    }

    fn credential(nim: &str, code: &str) -> CredentialRequest {
        CredentialRequest {
            nim: nim.into(),
            access_code: code.into(),
        }
    }

    #[rocket::async_test]
    async fn add_and_validate() {
        let store = MemoryStore::new();
        let credentials = credentials(&store);
        let issued = credentials
            .add_voter(NewVoterRequest::example(), "panitia")
            .await
            .unwrap();
        assert_eq!(issued.access_code, "ABC123");

        let voter = credentials
            .validate(&CredentialRequest::example())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(voter.nim.as_str(), "2235001");
        assert!(!voter.access_code_hash.contains("ABC123"));

        let event = store.audit_trail().pop().unwrap();
        assert_eq!(event.kind, AuditKind::AdminAction);
        assert_eq!(event.detail.action.as_deref(), Some("add_voter"));
        assert_eq!(event.detail.nim.as_deref(), Some("2235001"));
    }

    #[rocket::async_test]
    async fn invalid_credentials_are_indistinguishable() {
        let store = MemoryStore::new();
        let credentials = credentials(&store);
        credentials
            .add_voter(NewVoterRequest::example(), "panitia")
            .await
            .unwrap();

        let reason = |validation: Validation| validation.err();
        let wrong_code = reason(credentials.validate(&credential("2235001", "ABC124")).await.unwrap());
        let unknown = reason(credentials.validate(&credential("2235999", "ABC123")).await.unwrap());
        let malformed = reason(credentials.validate(&credential("22-35", "")).await.unwrap());
        assert_eq!(wrong_code, Some(RejectReason::InvalidCredential));
        assert_eq!(wrong_code, unknown);
        assert_eq!(wrong_code, malformed);
    }

    #[rocket::async_test]
    async fn generated_codes_are_returned_once() {
        let store = MemoryStore::new();
        let credentials = credentials(&store);
        let issued = credentials
            .add_voter(NewVoterRequest::generated("2235002"), "panitia")
            .await
            .unwrap();
        assert_eq!(issued.access_code.len(), 8);
        assert!(credentials
            .validate(&credential("2235002", &issued.access_code))
            .await
            .unwrap()
            .is_ok());

        let page = credentials.voters(Pagination::default()).await.unwrap();
        let listed = rocket::serde::json::to_string(&page.voters).unwrap();
        assert!(!listed.contains(&issued.access_code));
        assert!(!listed.contains("argon2"));
    }

    #[rocket::async_test]
    async fn roll_validation() {
        let store = MemoryStore::new();
        let credentials = credentials(&store);
        credentials
            .add_voter(NewVoterRequest::example(), "panitia")
            .await
            .unwrap();

        let err = credentials
            .add_voter(NewVoterRequest::example(), "panitia")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentity(_)));

        let mut bad = NewVoterRequest::generated("2235003");
        bad.nim = "NIM2235003".into();
        let err = credentials.add_voter(bad, "panitia").await.unwrap_err();
        assert_eq!(err.status(), rocket::http::Status::BadRequest);

        let mut bad = NewVoterRequest::generated("2235003");
        bad.access_code = Some("abc".into());
        let err = credentials.add_voter(bad, "panitia").await.unwrap_err();
        assert_eq!(err.status(), rocket::http::Status::BadRequest);

        let missing: IdentityNumber = "2235099".parse().unwrap();
        let err = credentials.delete_voter(&missing, "panitia").await.unwrap_err();
        assert_eq!(err.status(), rocket::http::Status::NotFound);
        let err = credentials.reset_vote_status(&missing, "panitia").await.unwrap_err();
        assert_eq!(err.status(), rocket::http::Status::NotFound);

        let nim: IdentityNumber = "2235001".parse().unwrap();
        let reset = credentials.reset_vote_status(&nim, "panitia").await.unwrap();
        assert!(!reset.ballot_retracted);
        credentials.delete_voter(&nim, "panitia").await.unwrap();
        assert!(store.voter(&nim).await.unwrap().is_none());
    }
}
