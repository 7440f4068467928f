use log::{error, warn};

use crate::error::Result;
use crate::model::{
    api::audit::{AuditEntry, AuditFilter, AuditPage},
    common::{audit::AuditKind, client::ClientMetadata},
    db::audit::{AuditEvent, NewAuditEvent},
    pagination::Pagination,
};
use crate::store::Store;

/// Longest submitted identity recorded with a failure.
const MAX_RECORDED_NIM_LENGTH: usize = 64;

/// Append-only trail of security and admin events.
#[derive(Clone)]
pub struct AuditTrail {
    store: Store,
    brute_force_threshold: u64,
}

impl AuditTrail {
    pub fn new(store: Store, brute_force_threshold: u64) -> Self {
        Self {
            store,
            brute_force_threshold,
        }
    }

    /// Record an event. Failure here fails the enclosing operation.
    pub async fn append(&self, event: NewAuditEvent) -> Result<AuditEvent> {
        self.store.append_audit(event).await
    }

    pub async fn query(&self, filter: &AuditFilter, page: Pagination) -> Result<AuditPage> {
        let (events, total) = self.store.audit_events(filter, page).await?;
        Ok(AuditPage {
            events: events.into_iter().map(AuditEntry::from).collect(),
            pagination: page.result(total),
        })
    }

    /// Record a failed voter credential check, numbering it among the
    /// failures already recorded for the same identity.
    pub async fn record_login_failure(
        &self,
        nim: &str,
        client: &ClientMetadata,
    ) -> Result<AuditEvent> {
        let nim = truncate_nim(nim);
        let prior = AuditFilter {
            kind: Some(AuditKind::LoginFail),
            nim: Some(nim.clone()),
        };
        let attempt = self.store.count_audit_events(&prior).await? + 1;
        if self.brute_force_threshold > 0 && attempt >= self.brute_force_threshold {
            warn!(
                "Possible brute force: {attempt} failed credential checks for {nim:?} (last from {})",
                client.ip
            );
        }
        self.append(NewAuditEvent::login_fail(&nim, attempt, client))
            .await
    }

    /// Record an unexpected fault. Best effort: a failure to record is only
    /// logged, since the caller is already reporting an error.
    pub async fn record_system_error(&self, nim: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        let nim = nim.map(truncate_nim);
        if let Err(err) = self
            .append(NewAuditEvent::system_error(nim.as_deref(), message.clone()))
            .await
        {
            error!("Failed to record system error ({message}) in audit trail: {err}");
        }
    }
}

fn truncate_nim(nim: &str) -> String {
    nim.chars().take(MAX_RECORDED_NIM_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::MemoryStore;

    #[rocket::async_test]
    async fn login_failures_are_numbered_per_identity() {
        let store = MemoryStore::new();
        let trail = AuditTrail::new(Arc::new(store.clone()), 3);
        let client = ClientMetadata::default();

        for expected in 1..=4 {
            let event = trail.record_login_failure("2235001", &client).await.unwrap();
            assert_eq!(event.detail.attempt, Some(expected));
        }
        let other = trail.record_login_failure("2235002", &client).await.unwrap();
        assert_eq!(other.detail.attempt, Some(1));

        let filter = AuditFilter {
            kind: Some(AuditKind::LoginFail),
            nim: Some("2235001".into()),
        };
        let page = trail.query(&filter, Pagination::default()).await.unwrap();
        assert_eq!(page.events.len(), 4);
        assert_eq!(page.events[0].detail.attempt, Some(4));
    }

    #[rocket::async_test]
    async fn oversized_identities_are_truncated() {
        let store = MemoryStore::new();
        let trail = AuditTrail::new(Arc::new(store.clone()), 0);
        let client = ClientMetadata::default();
        let submitted = "9".repeat(10_000);

        trail.record_login_failure(&submitted, &client).await.unwrap();
        let event = trail.record_login_failure(&submitted, &client).await.unwrap();
        let recorded = event.detail.nim.clone().unwrap();
        assert_eq!(recorded.len(), MAX_RECORDED_NIM_LENGTH);
        assert!(submitted.starts_with(&recorded));
        assert_eq!(event.detail.attempt, Some(2));
    }

    #[rocket::async_test]
    async fn system_errors_are_recorded() {
        let store = MemoryStore::new();
        let trail = AuditTrail::new(Arc::new(store.clone()), 0);
        trail.record_system_error(Some("2235001"), "boom").await;
        let event = store.audit_trail().pop().unwrap();
        assert_eq!(event.kind, AuditKind::SystemError);
        assert_eq!(event.detail.message.as_deref(), Some("boom"));
    }
}
