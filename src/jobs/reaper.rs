//! Stale-component reaper (§4.4): marks gateways and controllers offline
//! when their last heartbeat is older than the threshold. Both marker
//! operations are idempotent `UPDATE ... WHERE status != 'offline'`
//! statements, so running this from every replica on the same tick is
//! safe — no leader election, no distributed lock.
//!
//! Structured like the teacher's `rotation.rs::RotationScheduler`: an
//! `Arc<Self>`-based spawn loop that logs and continues on error rather
//! than aborting the tick loop.

use std::sync::Arc;
use std::time::Duration;

use crate::store::Store;

/// About 2x the gateway lease TTL, 3x the controller heartbeat (§4.4).
pub const STALE_THRESHOLD_SECS: i64 = 30;
const TICK_INTERVAL: Duration = Duration::from_secs(15);

pub struct Reaper {
    store: Arc<dyn Store>,
}

impl Reaper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Spawn the background reaper task. Runs forever, ticking every 15s.
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            tracing::info!("stale-component reaper started");
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_tick().await {
                    tracing::error!("reaper tick failed: {}", e);
                }
            }
        });
    }

    async fn run_tick(&self) -> anyhow::Result<()> {
        let offlined_instances = self
            .store
            .mark_stale_instances(STALE_THRESHOLD_SECS)
            .await?;
        if !offlined_instances.is_empty() {
            tracing::info!(
                count = offlined_instances.len(),
                "marked gateway instances offline"
            );
        }

        let offlined_controllers = self
            .store
            .mark_stale_controllers(STALE_THRESHOLD_SECS)
            .await?;
        if !offlined_controllers.is_empty() {
            tracing::info!(
                count = offlined_controllers.len(),
                "marked controllers offline"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn tick_is_idempotent() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::default());
        store
            .ensure_namespace("default")
            .await
            .unwrap();
        store
            .upsert_instance_status("default", "gw-1", "online", 0)
            .await
            .unwrap();

        let reaper = Reaper::new(store.clone());
        // Freshly-updated instance is not yet stale.
        reaper.run_tick().await.unwrap();
        let first = store.list_instance_status("default").await.unwrap();
        assert_eq!(first[0].status, "online");
    }
}
