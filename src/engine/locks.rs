use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use rocket::tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::common::identity::IdentityNumber;

type LockTable = Arc<Mutex<HashMap<IdentityNumber, Arc<AsyncMutex<()>>>>>;

/// Per-voter async locks. Submissions for the same voter queue up; different
/// voters never contend. Entries are dropped once nobody holds or waits on
/// them, so the table only ever holds in-flight voters.
#[derive(Clone, Default)]
pub struct VoterLocks {
    table: LockTable,
}

impl VoterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to the given voter.
    pub async fn lock(&self, nim: &IdentityNumber) -> VoterGuard {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entry(nim.clone()).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        VoterGuard {
            table: self.table.clone(),
            nim: nim.clone(),
            guard: Some(guard),
        }
    }

    /// Number of voters currently locked or awaited.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one voter, released on drop.
pub struct VoterGuard {
    table: LockTable,
    nim: IdentityNumber,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VoterGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Release first so a waiter's `Arc` is the only other reference.
        drop(self.guard.take());
        // One reference in the table; any other belongs to a waiter.
        if let Some(mutex) = table.get(&self.nim) {
            if Arc::strong_count(mutex) == 1 {
                table.remove(&self.nim);
            }
        }
    }
}
