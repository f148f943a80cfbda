//! Watches chunk metadata changes cluster-wide.
//!
//! This is where chunk-placement or rebalancing logic would hang off;
//! for now every event is only logged.

use crate::api::metastore::{MetaClient, MetaStoreError};
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct ChunkWatcher {
    meta: Arc<MetaClient>,
}

impl ChunkWatcher {
    pub fn new(meta: Arc<MetaClient>) -> Self {
        Self { meta }
    }

    /// Subscribes to chunk-key changes past the current revision and logs
    /// each one until the subscription ends or shutdown fires. The
    /// subscription is not re-established once it drops.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), MetaStoreError> {
        let (_snapshot, rev) = self.meta.chunks_snapshot_with_rev().await?;
        let mut events = self.meta.watch_chunks(rev + 1).await?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                event = events.recv() => match event {
                    Some(ev) => info!("watcher: {:?} {:?} : {:?}", ev.kind, ev.key, ev.value),
                    None => {
                        warn!("chunk watch stream closed");
                        return Ok(());
                    }
                },
            }
        }
    }
}
