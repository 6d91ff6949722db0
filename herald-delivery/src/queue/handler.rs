use async_trait::async_trait;

use crate::{error::DeliveryError, types::NotificationJob};

/// Invoked by the dispatch queue for every drained job
///
/// A terminal error drops the job; any other error sends it, and the rest of
/// its batch, back into the queue at a lower priority.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, job: &NotificationJob) -> Result<(), DeliveryError>;
}
