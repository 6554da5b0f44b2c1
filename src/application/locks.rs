use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::UserId;

/// One async mutex per user id, created on demand.
///
/// Locks are always taken in ascending id order, so two operations touching
/// the same pair of users in opposite directions cannot wait on each other.
#[derive(Debug, Default)]
pub struct UserLocks {
    slots: StdMutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

/// Guards held for the lifetime of an operation; released on drop.
#[derive(Debug)]
pub struct LockSet {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, ids: &[UserId]) -> LockSet {
        let mut ordered = ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let slots: Vec<Arc<Mutex<()>>> = {
            let mut map = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            // Nobody else holds these, so they can be recreated when needed
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            ordered
                .iter()
                .map(|id| Arc::clone(map.entry(*id).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(slots.len());
        for slot in slots {
            guards.push(slot.lock_owned().await);
        }
        tracing::debug!(count = guards.len(), "user locks acquired");
        LockSet { guards }
    }

    /// Number of users with a live lock slot.
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
