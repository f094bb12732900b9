//! Activate handler: drop stale generations and take over open pages.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::info;

use crate::cache::CacheStore;
use crate::clients::ClientControl;
use crate::event::ExtendableEvent;
use crate::ServiceWorkerError;

/// Outcome of an activation.
#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
    pub kept: String,
    pub deleted: Vec<String>,
    pub claimed: usize,
}

#[derive(Clone)]
pub struct Activator {
    cache_name: String,
    store: Arc<dyn CacheStore>,
    control: Arc<dyn ClientControl>,
}

impl Activator {
    pub fn new(
        cache_name: impl Into<String>,
        store: Arc<dyn CacheStore>,
        control: Arc<dyn ClientControl>,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            store,
            control,
        }
    }

    /// Register the activation work with `event`.
    pub fn handle(&self, event: &mut ExtendableEvent) -> oneshot::Receiver<ActivateReport> {
        let (tx, rx) = oneshot::channel();
        let activator = self.clone();
        event.wait_until(async move {
            let report = activator.run().await?;
            let _ = tx.send(report);
            Ok(())
        });
        rx
    }

    /// Delete every generation but the current one, then claim clients.
    pub async fn run(&self) -> Result<ActivateReport, ServiceWorkerError> {
        info!(cache = %self.cache_name, "Activating offline worker");

        let stale: Vec<String> = self
            .store
            .keys()
            .await
            .into_iter()
            .filter(|name| *name != self.cache_name)
            .collect();

        let outcomes = join_all(stale.iter().map(|name| async move {
            info!(cache = %name, "Deleting old cache");
            self.store.delete(name).await
        }))
        .await;

        let deleted = stale
            .into_iter()
            .zip(outcomes)
            .filter_map(|(name, removed)| removed.then_some(name))
            .collect();

        let claimed = self.control.claim().await?;
        info!(cache = %self.cache_name, claimed, "Worker activated, app fully offline");

        Ok(ActivateReport {
            kept: self.cache_name.clone(),
            deleted,
            claimed,
        })
    }
}
