use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::info;

use crate::error::{Error, Result};
use crate::model::{
    api::settings::SettingsPatch,
    db::{audit::NewAuditEvent, settings::ElectionSettings},
};
use crate::store::Store;

#[derive(Debug, Clone)]
struct CachedSettings {
    settings: ElectionSettings,
    fetched_at: Instant,
}

/// Single read/write authority over the election phase flags.
///
/// Display reads go through a short-lived cache. The vote path uses
/// [`ElectionPhaseGate::authoritative`], and the store re-reads the flag
/// inside the commit itself.
#[derive(Clone)]
pub struct ElectionPhaseGate {
    store: Store,
    cache: Arc<RwLock<Option<CachedSettings>>>,
    ttl: Duration,
}

impl ElectionPhaseGate {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(None)),
            ttl,
        }
    }

    /// Settings for display, at most `ttl` old.
    pub async fn current(&self) -> Result<ElectionSettings> {
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.settings.clone());
        match cached {
            Some(settings) => Ok(settings),
            None => self.authoritative().await,
        }
    }

    pub async fn is_voting_open(&self) -> Result<bool> {
        Ok(self.current().await?.voting_open)
    }

    pub async fn is_results_visible(&self) -> Result<bool> {
        Ok(self.current().await?.show_live_results)
    }

    /// Settings read straight from the store.
    pub async fn authoritative(&self) -> Result<ElectionSettings> {
        let settings = self.store.settings().await?;
        self.remember(settings.clone());
        Ok(settings)
    }

    /// Apply an admin's change to the flags, recording it in the audit trail.
    pub async fn update(&self, patch: SettingsPatch, admin: &str) -> Result<ElectionSettings> {
        if patch.is_empty() {
            return Err(Error::bad_request("Settings patch is empty"));
        }
        let event = NewAuditEvent::admin_action(admin, patch.action_name());
        let settings = self.store.update_settings(&patch, event).await?;
        info!(
            "Election settings v{} by {admin}: voting_open={}, show_live_results={}",
            settings.version, settings.voting_open, settings.show_live_results
        );
        self.remember(settings.clone());
        Ok(settings)
    }

    #[cfg(test)]
    pub async fn set_voting_open(&self, open: bool, admin: &str) -> Result<ElectionSettings> {
        let patch = SettingsPatch {
            voting_open: Some(open),
            ..Default::default()
        };
        self.update(patch, admin).await
    }

    #[cfg(test)]
    pub async fn set_results_visible(&self, visible: bool, admin: &str) -> Result<ElectionSettings> {
        let patch = SettingsPatch {
            show_live_results: Some(visible),
            ..Default::default()
        };
        self.update(patch, admin).await
    }

    /// Replace the cached copy unless it is newer than `settings`.
    fn remember(&self, settings: ElectionSettings) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let stale = cache
            .as_ref()
            .map_or(true, |cached| cached.settings.version <= settings.version);
        if stale {
            *cache = Some(CachedSettings {
                settings,
                fetched_at: Instant::now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::common::audit::AuditKind;
    use crate::store::{ElectionStore, MemoryStore};

    fn gate(store: &MemoryStore, ttl: Duration) -> ElectionPhaseGate {
        ElectionPhaseGate::new(Arc::new(store.clone()), ttl)
    }

    #[rocket::async_test]
    async fn display_reads_are_cached_but_commit_reads_are_not() {
        let store = MemoryStore::new();
        let gate = gate(&store, Duration::from_secs(60));
        assert!(!gate.is_voting_open().await.unwrap());

        // A change made elsewhere is not visible through the cache...
        let open = SettingsPatch {
            voting_open: Some(true),
            ..Default::default()
        };
        store
            .update_settings(&open, NewAuditEvent::admin_action("other", "open_voting"))
            .await
            .unwrap();
        assert!(!gate.is_voting_open().await.unwrap());

        // ...but is visible to authoritative reads, which refresh the cache.
        assert!(gate.authoritative().await.unwrap().voting_open);
        assert!(gate.is_voting_open().await.unwrap());
    }

    #[rocket::async_test]
    async fn local_writes_invalidate_the_cache() {
        let store = MemoryStore::new();
        let gate = gate(&store, Duration::from_secs(60));
        assert!(!gate.is_results_visible().await.unwrap());

        let settings = gate.set_results_visible(true, "panitia").await.unwrap();
        assert_eq!(settings.version, 1);
        assert!(gate.is_results_visible().await.unwrap());

        let event = store.audit_trail().pop().unwrap();
        assert_eq!(event.kind, AuditKind::AdminAction);
        assert_eq!(event.detail.action.as_deref(), Some("show_results"));
        assert_eq!(event.detail.admin.as_deref(), Some("panitia"));
    }

    #[rocket::async_test]
    async fn zero_ttl_always_reads_through() {
        let store = MemoryStore::new();
        let gate = gate(&store, Duration::ZERO);
        assert!(!gate.is_voting_open().await.unwrap());
        let open = SettingsPatch {
            voting_open: Some(true),
            ..Default::default()
        };
        store
            .update_settings(&open, NewAuditEvent::admin_action("other", "open_voting"))
            .await
            .unwrap();
        assert!(gate.is_voting_open().await.unwrap());
    }

    #[rocket::async_test]
    async fn empty_and_no_op_patches() {
        let store = MemoryStore::new();
        let gate = gate(&store, Duration::from_secs(60));
        let err = gate.update(SettingsPatch::default(), "panitia").await.unwrap_err();
        assert_eq!(err.status(), rocket::http::Status::BadRequest);

        // Closing an already closed election changes nothing.
        let settings = gate.set_voting_open(false, "panitia").await.unwrap();
        assert_eq!(settings.version, 0);
        assert!(store.audit_trail().is_empty());
    }
}
