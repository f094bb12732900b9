//! Install handler: populate the current cache generation.

use std::sync::Arc;

use futures::future::join_all;
use shellkit_common::WorkerConfig;
use shellkit_net::Fetcher;
use tokio::sync::oneshot;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheHandle, CacheStore};
use crate::clients::ClientControl;
use crate::event::ExtendableEvent;
use crate::ServiceWorkerError;

/// A best-effort resource that could not be cached.
#[derive(Debug, Clone)]
pub struct SkippedResource {
    pub url: Url,
    pub reason: String,
}

/// Outcome of a successful install.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    pub cache_name: String,
    pub core_cached: usize,
    pub optional_cached: usize,
    pub skipped: Vec<SkippedResource>,
}

/// Caches the bootstrap resources when a new version is installed.
#[derive(Clone)]
pub struct Installer {
    config: Arc<WorkerConfig>,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    control: Arc<dyn ClientControl>,
}

impl Installer {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        control: Arc<dyn ClientControl>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            control,
        }
    }

    /// Register the install work with `event`. The report arrives once the
    /// event settles successfully.
    pub fn handle(&self, event: &mut ExtendableEvent) -> oneshot::Receiver<InstallReport> {
        let (tx, rx) = oneshot::channel();
        let installer = self.clone();
        event.wait_until(async move {
            let report = installer.run().await?;
            let _ = tx.send(report);
            Ok(())
        });
        rx
    }

    /// Cache the core tier (all or nothing), then each best-effort resource
    /// on its own, then ask to skip waiting.
    pub async fn run(&self) -> Result<InstallReport, ServiceWorkerError> {
        let cache_name = self.config.cache_name.clone();
        info!(cache = %cache_name, "Installing offline worker");

        let core = self.config.core_urls()?;
        let optional = self.config.optional_urls()?;

        let cache = CacheHandle::open(
            Arc::clone(&self.store),
            Arc::clone(&self.fetcher),
            &cache_name,
        )
        .await?;

        cache
            .add_all(&core)
            .await
            .map_err(|source| ServiceWorkerError::CoreTier {
                cache: cache_name.clone(),
                source,
            })?;
        info!(cache = %cache_name, count = core.len(), "Core resources cached");

        let attempts = join_all(optional.into_iter().map(|url| {
            let cache = cache.clone();
            async move {
                let result = cache.add(url.clone()).await;
                (url, result)
            }
        }))
        .await;

        let mut report = InstallReport {
            cache_name: cache_name.clone(),
            core_cached: core.len(),
            ..Default::default()
        };
        for (url, result) in attempts {
            match result {
                Ok(()) => report.optional_cached += 1,
                Err(e) => {
                    warn!(url = %url, error = %e, "Could not cache optional resource");
                    report.skipped.push(SkippedResource {
                        url,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.control.skip_waiting().await?;
        info!(
            cache = %cache_name,
            optional = report.optional_cached,
            skipped = report.skipped.len(),
            "Core app cached, ready for offline use"
        );
        Ok(report)
    }
}
