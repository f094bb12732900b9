//! # ShellKit Service Worker
//!
//! Offline worker for a single-page app: one versioned cache generation,
//! populated at install, served cache-first, replaced at activation.
//!
//! ## Features
//!
//! - **Install**: core tier cached all-or-nothing, best-effort tier per resource
//! - **Fetch**: cache first, network fallback, opportunistic population,
//!   app shell for offline navigations
//! - **Activate**: stale generations deleted, open pages claimed
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost
//!     ├── ServiceWorkerRegistration (installing / waiting / active)
//!     ├── Clients
//!     ├── Installer ──────────┐
//!     ├── RequestInterceptor ─┼── CacheStore (generation → Request → Response)
//!     └── Activator ──────────┘        │
//!                                  Fetcher (network)
//! ```

use shellkit_common::ConfigError;
use shellkit_net::NetError;
use thiserror::Error;

pub mod activate;
pub mod background;
pub mod cache;
pub mod clients;
pub mod event;
pub mod host;
pub mod install;
pub mod intercept;
pub mod lifecycle;

pub use activate::{ActivateReport, Activator};
pub use background::BackgroundWrites;
pub use cache::{Cache, CacheEntry, CacheError, CacheHandle, CacheStorage, CacheStore};
pub use clients::{Client, ClientControl, ClientId, Clients};
pub use event::{ExtendableEvent, FetchEvent, LifecycleEvent};
pub use host::{LifecycleReport, ServiceWorkerHost};
pub use install::{InstallReport, Installer, SkippedResource};
pub use intercept::RequestInterceptor;
pub use lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Core resources for {cache} could not be cached: {source}")]
    CoreTier {
        cache: String,
        #[source]
        source: CacheError,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    StateError(String),
}
