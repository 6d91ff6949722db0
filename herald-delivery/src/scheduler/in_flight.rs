use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};
use herald_store::NotificationId;
use tokio::time::Instant;

/// Scheduled notifications currently sitting in the dispatch queue
///
/// A due record stays pending until its delivery settles, so the redelivery
/// loop claims it here to avoid enqueueing it again on the next poll. Claims
/// expire after `lease`, which bounds how long a job lost from the queue
/// (cleared, or dropped on a full requeue) keeps its record from being retried.
#[derive(Debug)]
pub struct InFlight {
    lease: Duration,
    claims: DashMap<NotificationId, Instant>,
}

impl InFlight {
    #[must_use]
    pub fn new(lease: Duration) -> Self {
        Self {
            lease,
            claims: DashMap::new(),
        }
    }

    /// Claim `id`, returning `false` if it is already claimed and the lease
    /// has not run out
    pub fn try_claim(&self, id: &NotificationId) -> bool {
        let now = Instant::now();

        match self.claims.entry(id.clone()) {
            Entry::Occupied(mut claim) => {
                if now.duration_since(*claim.get()) < self.lease {
                    return false;
                }
                claim.insert(now);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn release(&self, id: &NotificationId) {
        self.claims.remove(id);
    }

    #[must_use]
    pub fn contains(&self, id: &NotificationId) -> bool {
        self.claims.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
