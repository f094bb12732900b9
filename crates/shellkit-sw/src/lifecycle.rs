//! Worker lifecycle: the installing, waiting and active slots of a registration.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceWorkerState {
    /// Created, install event not dispatched yet.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed).
    Redundant,
}

/// A service worker instance, bound to one cache generation.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Cache generation this worker was built for.
    pub cache_name: String,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Error message if install failed.
    pub error: Option<String>,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            cache_name: cache_name.into(),
            state: ServiceWorkerState::Parsed,
            error: None,
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        debug!(worker = self.id.raw(), from = ?self.state, to = ?state, "Worker state change");
        self.state = state;
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Whether `clients.claim()` is allowed from this worker.
    pub fn can_claim(&self) -> bool {
        matches!(
            self.state,
            ServiceWorkerState::Activating | ServiceWorkerState::Activated
        )
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }
}

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,

    /// Last worker whose install failed.
    pub failed: Option<ServiceWorker>,

    /// Last active worker displaced by a newer version.
    pub replaced: Option<ServiceWorker>,

    skip_waiting: bool,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            failed: None,
            replaced: None,
            skip_waiting: false,
        }
    }

    /// Start installing a new worker for `cache_name`.
    pub fn begin_install(&mut self, cache_name: &str) -> ServiceWorkerId {
        if let Some(mut previous) = self.installing.take() {
            previous.set_state(ServiceWorkerState::Redundant);
        }
        let mut worker = ServiceWorker::new(cache_name);
        worker.set_state(ServiceWorkerState::Installing);
        let id = worker.id;
        self.installing = Some(worker);
        self.skip_waiting = false;
        id
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self) -> Option<ServiceWorkerId> {
        let mut worker = self.installing.take()?;
        worker.set_state(ServiceWorkerState::Installed);
        if let Some(mut superseded) = self.waiting.replace(worker) {
            superseded.set_state(ServiceWorkerState::Redundant);
        }
        self.waiting.as_ref().map(|w| w.id)
    }

    /// The installing worker failed; it becomes redundant and never waits.
    pub fn install_failed(&mut self, error: &ServiceWorkerError) {
        if let Some(mut worker) = self.installing.take() {
            worker.error = Some(error.to_string());
            worker.set_state(ServiceWorkerState::Redundant);
            self.failed = Some(worker);
        }
        self.skip_waiting = false;
    }

    /// Record that the installing worker asked to skip waiting.
    pub fn request_skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    /// Consume the skip-waiting request.
    pub fn take_skip_waiting(&mut self) -> bool {
        std::mem::take(&mut self.skip_waiting)
    }

    /// Promote the waiting worker; the old active worker becomes redundant.
    pub fn begin_activation(&mut self) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let mut worker = self.waiting.take().ok_or_else(|| {
            ServiceWorkerError::StateError("No installed worker is waiting to activate".to_string())
        })?;
        worker.set_state(ServiceWorkerState::Activating);

        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
            self.replaced = Some(old);
        }

        let id = worker.id;
        self.active = Some(worker);
        Ok(id)
    }

    /// Mark the active worker as fully activated.
    pub fn activation_complete(&mut self) {
        if let Some(worker) = self.active.as_mut() {
            worker.set_state(ServiceWorkerState::Activated);
        }
    }

    /// The worker allowed to claim clients right now.
    pub fn claiming_worker(&self) -> Result<ServiceWorkerId, ServiceWorkerError> {
        self.active
            .as_ref()
            .filter(|w| w.can_claim())
            .map(|w| w.id)
            .ok_or_else(|| {
                ServiceWorkerError::StateError("Only an active worker can claim clients".to_string())
            })
    }

    /// The worker that answers fetch events.
    pub fn controller(&self) -> Option<&ServiceWorker> {
        self.active.as_ref().filter(|w| w.is_active())
    }
}
