pub mod aggregator;
pub mod poller;

#[cfg(test)]
mod tests;

pub use aggregator::SnapshotAggregator;
pub use poller::{Poller, PollerHandle, PollerStats};

use std::{sync::Arc, time::Duration};

use crate::{error::PollerError, utils::store::SnapshotStore};

/// Starts a poller whose results land in `store`.
pub fn start_sync(
    aggregator: Arc<SnapshotAggregator>,
    interval: Duration,
    store: SnapshotStore,
) -> Result<PollerHandle, PollerError> {
    let snapshot_store = store.clone();
    Poller::new(aggregator, interval).start(
        move |snapshot| {
            snapshot_store.publish_snapshot(snapshot);
        },
        move |error| store.publish_error(error),
    )
}
