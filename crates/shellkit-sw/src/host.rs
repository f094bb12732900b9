//! The platform side: owns the registration, clients and collaborators, and
//! dispatches install, activate and fetch events to the handlers of each
//! worker version.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use shellkit_common::WorkerConfig;
use shellkit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::activate::{ActivateReport, Activator};
use crate::background::BackgroundWrites;
use crate::cache::{CacheStorage, CacheStore};
use crate::clients::{Client, ClientControl, ClientId, Clients};
use crate::event::{ExtendableEvent, FetchEvent, LifecycleEvent};
use crate::install::{InstallReport, Installer};
use crate::intercept::RequestInterceptor;
use crate::lifecycle::{ServiceWorker, ServiceWorkerId, ServiceWorkerRegistration};
use crate::ServiceWorkerError;

/// What `update()` did.
#[derive(Debug, Clone)]
pub struct LifecycleReport {
    pub install: InstallReport,
    /// Present when the new worker skipped waiting and activated.
    pub activate: Option<ActivateReport>,
}

/// `self.skipWaiting()` and `self.clients` as seen from inside the worker.
struct WorkerScope {
    registration: Arc<RwLock<ServiceWorkerRegistration>>,
    clients: Arc<RwLock<Clients>>,
}

#[async_trait]
impl ClientControl for WorkerScope {
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        self.registration.write().await.request_skip_waiting();
        Ok(())
    }

    async fn claim(&self) -> Result<usize, ServiceWorkerError> {
        let (worker, scope) = {
            let registration = self.registration.read().await;
            (registration.claiming_worker()?, registration.scope.clone())
        };
        let claimed = self.clients.write().await.claim(worker, &scope);
        debug!(worker = worker.raw(), claimed, "Claimed clients");
        Ok(claimed)
    }
}

/// The handlers of one worker version, all bound to its configuration.
struct WorkerScript {
    config: Arc<WorkerConfig>,
    installer: Installer,
    interceptor: RequestInterceptor,
    activator: Activator,
}

/// Hosts one offline worker registration across versions.
pub struct ServiceWorkerHost {
    /// Configuration the next install uses.
    config: RwLock<Arc<WorkerConfig>>,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    registration: Arc<RwLock<ServiceWorkerRegistration>>,
    clients: Arc<RwLock<Clients>>,
    control: Arc<dyn ClientControl>,
    background: BackgroundWrites,
    scripts: RwLock<HashMap<ServiceWorkerId, Arc<WorkerScript>>>,
    /// Install and activate never overlap.
    lifecycle: Mutex<()>,
}

impl ServiceWorkerHost {
    /// Wire a host around the given collaborators. `config` is the first
    /// version to install.
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;

        let registration = Arc::new(RwLock::new(ServiceWorkerRegistration::new(
            config.scope.clone(),
        )));
        let clients = Arc::new(RwLock::new(Clients::new()));
        let control: Arc<dyn ClientControl> = Arc::new(WorkerScope {
            registration: Arc::clone(&registration),
            clients: Arc::clone(&clients),
        });

        Ok(Self {
            config: RwLock::new(Arc::new(config)),
            store,
            fetcher,
            registration,
            clients,
            control,
            background: BackgroundWrites::new(),
            scripts: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        })
    }

    /// Host backed by a fresh in-memory cache store.
    pub fn with_memory_store(
        config: WorkerConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        Self::new(config, Arc::new(CacheStorage::new()), fetcher)
    }

    /// Configuration of the most recently staged version.
    pub async fn config(&self) -> Arc<WorkerConfig> {
        Arc::clone(&*self.config.read().await)
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        Arc::clone(&self.store)
    }

    fn script(&self, config: Arc<WorkerConfig>) -> WorkerScript {
        WorkerScript {
            installer: Installer::new(
                Arc::clone(&config),
                Arc::clone(&self.store),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.control),
            ),
            interceptor: RequestInterceptor::new(
                Arc::clone(&config),
                Arc::clone(&self.store),
                Arc::clone(&self.fetcher),
                self.background.clone(),
            ),
            activator: Activator::new(
                config.cache_name.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.control),
            ),
            config,
        }
    }

    /// Register an open page. It stays uncontrolled until claimed.
    pub async fn connect_client(&self, url: Url) -> ClientId {
        self.clients.write().await.add(url)
    }

    /// Forget a closed page.
    pub async fn disconnect_client(&self, id: ClientId) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    pub async fn client(&self, id: ClientId) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Number of clients controlled by the active worker.
    pub async fn controlled_clients(&self) -> usize {
        let registration = self.registration.read().await;
        match registration.active.as_ref() {
            Some(worker) => self.clients.read().await.controlled_by(worker.id).len(),
            None => 0,
        }
    }

    pub async fn active_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.active.clone()
    }

    pub async fn waiting_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.waiting.clone()
    }

    /// The last worker whose install failed.
    pub async fn failed_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.failed.clone()
    }

    /// The last active worker superseded by a newer version.
    pub async fn replaced_worker(&self) -> Option<ServiceWorker> {
        self.registration.read().await.replaced.clone()
    }

    pub async fn cache_names(&self) -> Vec<String> {
        self.store.keys().await
    }

    /// Stage `config` as the next version. It must share the registration
    /// scope.
    async fn stage(&self, config: WorkerConfig) -> Result<(), ServiceWorkerError> {
        config.validate()?;
        let scope = self.registration.read().await.scope.clone();
        if config.scope != scope {
            return Err(ServiceWorkerError::StateError(format!(
                "Version {} has scope {}, registration scope is {}",
                config.cache_name, config.scope, scope
            )));
        }
        *self.config.write().await = Arc::new(config);
        Ok(())
    }

    /// Dispatch the install event for a new worker built from the staged
    /// configuration.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        let _phase = self.lifecycle.lock().await;
        let script = Arc::new(self.script(self.config().await));
        let id = self
            .registration
            .write()
            .await
            .begin_install(&script.config.cache_name);
        self.scripts.write().await.insert(id, Arc::clone(&script));

        let mut event = ExtendableEvent::new(LifecycleEvent::Install);
        let report = script.installer.handle(&mut event);
        let outcome = match event.settle().await {
            Ok(()) => report.await.map_err(|_| {
                ServiceWorkerError::StateError("Install handler produced no report".to_string())
            }),
            Err(e) => Err(e),
        };

        let mut registration = self.registration.write().await;
        match outcome {
            Ok(report) => {
                registration.install_complete();
                drop(registration);
                self.retire_scripts().await;
                Ok(report)
            }
            Err(e) => {
                error!(cache = %script.config.cache_name, error = %e, "Install failed");
                registration.install_failed(&e);
                drop(registration);
                self.retire_scripts().await;
                Err(e)
            }
        }
    }

    /// Stage `config` and install it.
    pub async fn install_version(
        &self,
        config: WorkerConfig,
    ) -> Result<InstallReport, ServiceWorkerError> {
        self.stage(config).await?;
        self.install().await
    }

    /// Dispatch the activate event for the waiting worker. The previously
    /// active worker becomes redundant and stops handling fetches.
    pub async fn activate(&self) -> Result<ActivateReport, ServiceWorkerError> {
        let _phase = self.lifecycle.lock().await;
        let id = self.registration.write().await.begin_activation()?;
        let script = self.scripts.read().await.get(&id).cloned().ok_or_else(|| {
            ServiceWorkerError::StateError(format!("No handlers for worker {}", id.raw()))
        })?;
        self.retire_scripts().await;

        // Writes started by the old worker land before its generation goes.
        self.background.flush().await;

        let mut event = ExtendableEvent::new(LifecycleEvent::Activate);
        let report = script.activator.handle(&mut event);
        if let Err(e) = event.settle().await {
            error!(cache = %script.config.cache_name, error = %e, "Activation failed");
            return Err(e);
        }
        let report = report.await.map_err(|_| {
            ServiceWorkerError::StateError("Activate handler produced no report".to_string())
        })?;

        self.registration.write().await.activation_complete();
        Ok(report)
    }

    /// Install, then activate right away if the new worker skipped waiting.
    pub async fn update(&self) -> Result<LifecycleReport, ServiceWorkerError> {
        let install = self.install().await?;
        let skip_waiting = self.registration.write().await.take_skip_waiting();
        let activate = if skip_waiting {
            Some(self.activate().await?)
        } else {
            None
        };
        Ok(LifecycleReport { install, activate })
    }

    /// Move the registration to a new version: stage, install, activate.
    pub async fn update_to(
        &self,
        config: WorkerConfig,
    ) -> Result<LifecycleReport, ServiceWorkerError> {
        self.stage(config).await?;
        info!(cache = %self.config().await.cache_name, "Updating offline worker");
        self.update().await
    }

    /// Drop the handlers of workers that no longer occupy a slot.
    async fn retire_scripts(&self) {
        let live: Vec<ServiceWorkerId> = {
            let registration = self.registration.read().await;
            [
                registration.installing.as_ref(),
                registration.waiting.as_ref(),
                registration.active.as_ref(),
            ]
            .into_iter()
            .flatten()
            .map(|worker| worker.id)
            .collect()
        };
        self.scripts.write().await.retain(|id, _| live.contains(id));
    }

    /// Handlers of the worker currently controlling fetches.
    async fn controller_script(&self) -> Option<(ServiceWorkerId, Arc<WorkerScript>)> {
        let id = self.registration.read().await.controller().map(|w| w.id)?;
        let script = self.scripts.read().await.get(&id).cloned()?;
        Some((id, script))
    }

    /// Route a request through the active worker, or straight to the
    /// network when no worker is active.
    pub async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        match self.controller_script().await {
            Some((_, script)) => self.dispatch_fetch(&script, FetchEvent::new(request)).await,
            None => self.fetcher.fetch(&request).await,
        }
    }

    /// Fetch on behalf of a page. Pages the active worker does not control
    /// go straight to the network.
    pub async fn fetch_for(&self, client: ClientId, request: Request) -> Result<Response, NetError> {
        let controller = self.controller_script().await;
        let script = match controller {
            Some((worker, script)) => self
                .clients
                .read()
                .await
                .get(client)
                .is_some_and(|c| c.controller == Some(worker))
                .then_some(script),
            None => None,
        };
        match script {
            Some(script) => {
                let event = FetchEvent::new(request).with_client(client);
                self.dispatch_fetch(&script, event).await
            }
            None => {
                debug!(?client, url = %request.url, "Uncontrolled client, bypassing worker");
                self.fetcher.fetch(&request).await
            }
        }
    }

    async fn dispatch_fetch(
        &self,
        script: &WorkerScript,
        mut event: FetchEvent,
    ) -> Result<Response, NetError> {
        if let Err(e) = script.interceptor.handle(&mut event) {
            warn!(error = %e, "Fetch handler failed");
        }

        match event.into_parts() {
            (_, Some(response)) => response.await,
            (request, None) => self.fetcher.fetch(&request).await,
        }
    }

    /// Wait until every background cache write has finished.
    pub async fn flush_background(&self) {
        self.background.flush().await;
    }
}
