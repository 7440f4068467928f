//! The ballot-integrity engine: credential checks, the election phase gate,
//! the vote transaction, the audit trail and the recap.

use std::sync::Arc;
use std::time::Duration;

pub mod audit;
pub mod client_info;
pub mod coordinator;
pub mod credentials;
pub mod hasher;
pub mod locks;
pub mod phase;
pub mod recap;

use crate::store::Store;
use audit::AuditTrail;
use client_info::IpEnricher;
use coordinator::VoteTransactionCoordinator;
use credentials::CredentialStore;
use hasher::CredentialHasher;
use phase::ElectionPhaseGate;
use recap::RecapAggregator;

/// All engine components, wired to one store.
#[derive(Clone)]
pub struct Engine {
    pub credentials: CredentialStore,
    pub phase: ElectionPhaseGate,
    pub audit: AuditTrail,
    pub recap: RecapAggregator,
    pub coordinator: VoteTransactionCoordinator,
    pub enricher: IpEnricher,
}

impl Engine {
    pub fn new(
        store: Store,
        hasher: Arc<dyn CredentialHasher>,
        enricher: IpEnricher,
        settings_cache_ttl: Duration,
        brute_force_threshold: u64,
    ) -> Self {
        let credentials = CredentialStore::new(store.clone(), hasher);
        let phase = ElectionPhaseGate::new(store.clone(), settings_cache_ttl);
        let audit = AuditTrail::new(store.clone(), brute_force_threshold);
        let recap = RecapAggregator::new(store.clone());
        let coordinator = VoteTransactionCoordinator::new(
            store,
            credentials.clone(),
            phase.clone(),
            audit.clone(),
            enricher.clone(),
        );
        Self {
            credentials,
            phase,
            audit,
            recap,
            coordinator,
            enricher,
        }
    }

    #[cfg(test)]
    pub fn for_tests(store: Store) -> Self {
        Self::new(
            store,
            Arc::new(hasher::Argon2Hasher::fast()),
            IpEnricher::disabled(),
            Duration::from_secs(10),
            5,
        )
    }
}
