//! Open client pages and the client-control collaborator.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

/// Client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// An open page.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Worker currently serving this client's requests.
    pub controller: Option<ServiceWorkerId>,
}

/// Clients known to the host.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uncontrolled client.
    pub fn add(&mut self, url: Url) -> ClientId {
        let id = ClientId::new();
        self.clients.insert(
            id,
            Client {
                id,
                url,
                controller: None,
            },
        );
        id
    }

    /// Get a client by ID.
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Remove a client (page closed).
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Clients controlled by `worker`.
    pub fn controlled_by(&self, worker: ServiceWorkerId) -> Vec<&Client> {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .collect()
    }

    /// Make `worker` the controller of every client inside `scope`.
    ///
    /// Returns how many clients changed controller.
    pub fn claim(&mut self, worker: ServiceWorkerId, scope: &Url) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.url.as_str().starts_with(scope.as_str()) && client.controller != Some(worker)
            {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        claimed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Lifecycle controls a worker can exercise over its registration.
#[async_trait]
pub trait ClientControl: Send + Sync {
    /// Activate as soon as install finishes instead of waiting for old pages.
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError>;

    /// Take control of every open client in scope.
    async fn claim(&self) -> Result<usize, ServiceWorkerError>;
}
