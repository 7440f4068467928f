use std::collections::{BTreeSet, HashMap};

use log::warn;

use crate::error::Result;
use crate::model::{
    api::recap::{RecapEntry, RecapVerification, RollStats, TallyDrift},
    db::candidate::CandidateId,
};
use crate::store::Store;

/// Read-only view over the tallies.
#[derive(Clone)]
pub struct RecapAggregator {
    store: Store,
}

impl RecapAggregator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Every registered candidate with its committed vote count, ordered by
    /// ballot position.
    pub async fn recap(&self) -> Result<Vec<RecapEntry>> {
        let totals: HashMap<CandidateId, u64> = self
            .store
            .totals()
            .await?
            .into_iter()
            .map(|totals| (totals.candidate_id, totals.total))
            .collect();
        let candidates = self.store.candidates().await?;
        Ok(candidates
            .into_iter()
            .map(|candidate| RecapEntry {
                candidate_id: candidate.id,
                candidate_name: candidate.pair_name(),
                total: totals.get(&candidate.id).copied().unwrap_or(0),
            })
            .collect())
    }

    /// Totals recomputed from the live ballots themselves.
    pub async fn recount(&self) -> Result<HashMap<CandidateId, u64>> {
        self.store.count_live_ballots().await
    }

    /// Compare the materialized counters with a recount.
    pub async fn verify(&self) -> Result<RecapVerification> {
        let counted: HashMap<CandidateId, u64> = self
            .store
            .totals()
            .await?
            .into_iter()
            .map(|totals| (totals.candidate_id, totals.total))
            .collect();
        let recounted = self.recount().await?;

        let ids: BTreeSet<CandidateId> = counted.keys().chain(recounted.keys()).copied().collect();
        let drift: Vec<TallyDrift> = ids
            .into_iter()
            .filter_map(|candidate_id| {
                let counted = counted.get(&candidate_id).copied().unwrap_or(0);
                let recounted = recounted.get(&candidate_id).copied().unwrap_or(0);
                (counted != recounted).then_some(TallyDrift {
                    candidate_id,
                    counted,
                    recounted,
                })
            })
            .collect();
        if !drift.is_empty() {
            warn!("Tally drift detected: {drift:?}");
        }
        Ok(RecapVerification {
            consistent: drift.is_empty(),
            drift,
        })
    }

    pub async fn stats(&self) -> Result<RollStats> {
        self.store.roll_stats().await
    }
}
