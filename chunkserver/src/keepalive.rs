//! Lease-renewed liveness registration.

use crate::api::metastore::MetaClient;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Announcer {
    meta: Arc<MetaClient>,
    node_name: String,
    node_addr: String,
    period: Duration,
    lease_ttl_secs: i64,
}

impl Announcer {
    pub fn new(
        meta: Arc<MetaClient>,
        node_name: &str,
        node_addr: &str,
        period: Duration,
        lease_ttl_secs: i64,
    ) -> Self {
        Self {
            meta,
            node_name: node_name.to_string(),
            node_addr: node_addr.to_string(),
            period,
            lease_ttl_secs,
        }
    }

    /// Renews the registration until cancelled. The lease TTL outlives the
    /// renewal period, so continuous renewal keeps the key alive; once
    /// renewal stops (cancellation or crash) the key expires on its own.
    /// There is no explicit deregistration.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            let lease = match self.meta.grant_lease(self.lease_ttl_secs).await {
                Ok(id) => id,
                Err(e) => {
                    error!("failed to grant lease: {e}");
                    continue;
                }
            };
            match self
                .meta
                .put_worker(&self.node_name, &self.node_addr, lease)
                .await
            {
                Ok(()) => info!(
                    "refreshed worker {} -> {}",
                    self.node_name, self.node_addr
                ),
                Err(e) => error!(
                    "failed to put {} -> {}: {e}",
                    self.node_name, self.node_addr
                ),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.period) => {}
            }
        }
    }
}
