//! Cache generations.
//!
//! A [`CacheStore`] holds named generations of GET request/response pairs.
//! [`CacheStorage`] is the in-memory store; [`CacheHandle`] binds one
//! generation to a [`Fetcher`] so resources can be fetched and stored in one
//! step.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::try_join_all;
use hashbrown::HashMap;
use http::{Method, StatusCode};
use shellkit_net::{Fetcher, NetError, Request, Response};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};
use url::Url;

/// Errors raised by cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(Method),

    #[error("Refusing to cache {url}: status {status}")]
    UnsuccessfulResponse { url: String, status: StatusCode },

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("No cache generation named {0:?}")]
    NotFound(String),
}

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request identity (URL without fragment).
    pub key: String,

    /// Frozen response.
    pub response: Response,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Reject anything that must never be stored.
fn check_storable(request: &Request, response: &Response) -> Result<(), CacheError> {
    if request.method != Method::GET {
        return Err(CacheError::UnsupportedMethod(request.method.clone()));
    }
    if !response.ok() {
        return Err(CacheError::UnsuccessfulResponse {
            url: request.url.to_string(),
            status: response.status,
        });
    }
    Ok(())
}

/// One cache generation.
#[derive(Debug)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Creation order among generations.
    created: u64,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    fn new(name: &str, created: u64) -> Self {
        Self {
            name: name.to_string(),
            created,
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        if request.method != Method::GET {
            return None;
        }
        self.entries.get(&request.cache_key())
    }

    /// Store a response, replacing any entry for the same request.
    pub fn put(&mut self, request: &Request, mut response: Response) -> Result<(), CacheError> {
        check_storable(request, &response)?;
        let key = request.cache_key();
        response.from_cache = false;
        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                response,
                cached_at: now_millis(),
            },
        );
        Ok(())
    }

    /// Delete entry.
    pub fn delete(&mut self, request: &Request) -> bool {
        self.entries.remove(&request.cache_key()).is_some()
    }

    /// Request keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The platform cache store, shared by every handler.
///
/// Each call is atomic on its own; callers must not assume anything about
/// interleaving between calls.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the generation if it does not exist yet.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    async fn has(&self, name: &str) -> bool;

    /// Store one entry in an existing generation.
    async fn put(&self, name: &str, request: &Request, response: &Response)
        -> Result<(), CacheError>;

    /// Store several entries at once; nothing is stored if any is rejected.
    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>)
        -> Result<(), CacheError>;

    /// Look up a request in one generation.
    async fn match_in(&self, name: &str, request: &Request) -> Option<Response>;

    /// Look up a request in every generation, oldest first.
    async fn match_any(&self, request: &Request) -> Option<Response>;

    /// Generation names in creation order.
    async fn keys(&self) -> Vec<String>;

    /// Delete a generation. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> bool;

    /// Request keys stored in a generation.
    async fn entries(&self, name: &str) -> Option<Vec<String>>;
}

#[derive(Debug, Default)]
struct Generations {
    caches: HashMap<String, Cache>,
    next_seq: u64,
}

impl Generations {
    fn ordered(&self) -> Vec<&Cache> {
        let mut caches: Vec<&Cache> = self.caches.values().collect();
        caches.sort_by_key(|c| c.created);
        caches
    }
}

/// In-memory cache store.
#[derive(Debug, Default)]
pub struct CacheStorage {
    inner: RwLock<Generations>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for CacheStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        if !inner.caches.contains_key(name) {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.caches.insert(name.to_string(), Cache::new(name, seq));
            debug!(cache = %name, "Created cache generation");
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> bool {
        self.inner.read().await.caches.contains_key(name)
    }

    async fn put(
        &self,
        name: &str,
        request: &Request,
        response: &Response,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        let cache = inner
            .caches
            .get_mut(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        cache.put(request, response.clone())?;
        trace!(cache = %name, url = %request.url, "Stored entry");
        Ok(())
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), CacheError> {
        for (request, response) in &entries {
            check_storable(request, response)?;
        }
        let mut inner = self.inner.write().await;
        let cache = inner
            .caches
            .get_mut(name)
            .ok_or_else(|| CacheError::NotFound(name.to_string()))?;
        for (request, response) in entries {
            cache.put(&request, response)?;
        }
        Ok(())
    }

    async fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
        let inner = self.inner.read().await;
        inner
            .caches
            .get(name)?
            .match_request(request)
            .map(|entry| entry.response.clone().into_cached())
    }

    async fn match_any(&self, request: &Request) -> Option<Response> {
        let inner = self.inner.read().await;
        inner
            .ordered()
            .into_iter()
            .find_map(|cache| cache.match_request(request))
            .map(|entry| entry.response.clone().into_cached())
    }

    async fn keys(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.ordered().into_iter().map(|c| c.name.clone()).collect()
    }

    async fn delete(&self, name: &str) -> bool {
        self.inner.write().await.caches.remove(name).is_some()
    }

    async fn entries(&self, name: &str) -> Option<Vec<String>> {
        self.inner.read().await.caches.get(name).map(Cache::keys)
    }
}

/// An opened generation bound to the network, like a platform `Cache` object.
#[derive(Clone)]
pub struct CacheHandle {
    name: String,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
}

impl CacheHandle {
    /// Open (creating if absent) the named generation.
    pub async fn open(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        name: &str,
    ) -> Result<Self, CacheError> {
        store.open(name).await?;
        Ok(Self {
            name: name.to_string(),
            store,
            fetcher,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch a location and return the response only if it may be stored.
    async fn fetch_storable(&self, url: Url) -> Result<(Request, Response), CacheError> {
        let request = Request::get(url);
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|source| CacheError::Fetch {
                url: request.url.to_string(),
                source,
            })?;
        check_storable(&request, &response)?;
        Ok((request, response))
    }

    /// Fetch one location and store it.
    pub async fn add(&self, url: Url) -> Result<(), CacheError> {
        let (request, response) = self.fetch_storable(url).await?;
        self.store.put(&self.name, &request, &response).await
    }

    /// Fetch every location and store them all, or none if any fails.
    pub async fn add_all(&self, urls: &[Url]) -> Result<(), CacheError> {
        let fetched = try_join_all(urls.iter().cloned().map(|url| self.fetch_storable(url))).await?;
        self.store.put_all(&self.name, fetched).await
    }

    pub async fn put(&self, request: &Request, response: &Response) -> Result<(), CacheError> {
        self.store.put(&self.name, request, response).await
    }

    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        self.store.match_in(&self.name, request).await
    }

    /// Request keys in this generation.
    pub async fn keys(&self) -> Vec<String> {
        self.store.entries(&self.name).await.unwrap_or_default()
    }
}
