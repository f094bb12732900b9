//! Fetch handler: cache first, network second, shell document when offline.

use std::sync::Arc;

use http::Method;
use shellkit_common::{MatchScope, WorkerConfig};
use shellkit_net::{Fetcher, NetError, Request, Response};
use tracing::{debug, trace, warn};

use crate::background::BackgroundWrites;
use crate::cache::CacheStore;
use crate::event::FetchEvent;
use crate::ServiceWorkerError;

/// Answers GET requests from the cache generations, populating the current
/// generation from successful network responses.
#[derive(Clone)]
pub struct RequestInterceptor {
    config: Arc<WorkerConfig>,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    background: BackgroundWrites,
}

impl RequestInterceptor {
    pub fn new(
        config: Arc<WorkerConfig>,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        background: BackgroundWrites,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            background,
        }
    }

    /// Respond to GET requests; anything else is left to the network.
    pub fn handle(&self, event: &mut FetchEvent) -> Result<(), ServiceWorkerError> {
        if event.request().method != Method::GET {
            trace!(url = %event.request().url, method = %event.request().method, "Not intercepting");
            return Ok(());
        }

        let interceptor = self.clone();
        let request = event.request().clone();
        event.respond_with(async move { interceptor.respond(request).await })
    }

    /// Produce the response for a GET request.
    pub async fn respond(&self, request: Request) -> Result<Response, NetError> {
        if let Some(cached) = self.lookup(&request).await {
            debug!(request = request.id.raw(), url = %request.url, "Serving from cache");
            return Ok(cached);
        }

        debug!(request = request.id.raw(), url = %request.url, "Fetching from network");
        match self.fetcher.fetch(&request).await {
            Ok(response) if response.ok() => {
                self.store_in_background(request, response.clone());
                Ok(response)
            }
            Ok(response) => {
                debug!(url = %request.url, status = %response.status, "Not caching unsuccessful response");
                Ok(response)
            }
            Err(error) => {
                warn!(url = %request.url, error = %error, "Network fetch failed");
                if request.is_navigation() {
                    if let Some(shell) = self.shell_document().await {
                        debug!(url = %request.url, "Serving cached app shell");
                        return Ok(shell);
                    }
                }
                Err(error)
            }
        }
    }

    async fn lookup(&self, request: &Request) -> Option<Response> {
        match self.config.match_scope {
            MatchScope::AllGenerations => self.store.match_any(request).await,
            MatchScope::CurrentGeneration => {
                self.store.match_in(&self.config.cache_name, request).await
            }
        }
    }

    async fn shell_document(&self) -> Option<Response> {
        let url = self.config.shell_url().ok()?;
        self.lookup(&Request::get(url)).await
    }

    fn store_in_background(&self, request: Request, response: Response) {
        let store = Arc::clone(&self.store);
        let cache_name = self.config.cache_name.clone();
        // Never reopen: a generation deleted by a newer version stays deleted.
        self.background.spawn(async move {
            match store.put(&cache_name, &request, &response).await {
                Ok(()) => trace!(cache = %cache_name, url = %request.url, "Cached network response"),
                Err(e) => warn!(cache = %cache_name, url = %request.url, error = %e, "Background cache write failed"),
            }
        });
    }
}
