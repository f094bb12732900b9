//! Lifecycle and fetch events.
//!
//! Handlers never run work on their own: they register futures with the
//! event, and whoever dispatched the event decides when it has settled.

use std::fmt;
use std::future::Future;

use futures::future::{try_join_all, BoxFuture, FutureExt};
use shellkit_net::{NetError, Request, Response};

use crate::clients::ClientId;
use crate::ServiceWorkerError;

/// Work registered through [`ExtendableEvent::wait_until`].
pub type PendingWork = BoxFuture<'static, Result<(), ServiceWorkerError>>;

/// Response supplied through [`FetchEvent::respond_with`].
pub type PendingResponse = BoxFuture<'static, Result<Response, NetError>>;

/// Which lifecycle phase an extendable event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Install,
    Activate,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Install => f.write_str("install"),
            LifecycleEvent::Activate => f.write_str("activate"),
        }
    }
}

/// An install or activate event.
pub struct ExtendableEvent {
    kind: LifecycleEvent,
    pending: Vec<PendingWork>,
}

impl ExtendableEvent {
    pub fn new(kind: LifecycleEvent) -> Self {
        Self {
            kind,
            pending: Vec::new(),
        }
    }

    pub fn kind(&self) -> LifecycleEvent {
        self.kind
    }

    /// Defer completion of the event until `work` finishes.
    pub fn wait_until<F>(&mut self, work: F)
    where
        F: Future<Output = Result<(), ServiceWorkerError>> + Send + 'static,
    {
        self.pending.push(work.boxed());
    }

    /// Number of registered futures.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drive every registered future; the first failure fails the event.
    pub async fn settle(self) -> Result<(), ServiceWorkerError> {
        try_join_all(self.pending).await.map(|_| ())
    }
}

/// A request made by a controlled page.
pub struct FetchEvent {
    request: Request,
    client_id: Option<ClientId>,
    response: Option<PendingResponse>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
            response: None,
        }
    }

    /// Attach the client that issued the request.
    pub fn with_client(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Supply the response for this request. Only one handler may respond.
    pub fn respond_with<F>(&mut self, response: F) -> Result<(), ServiceWorkerError>
    where
        F: Future<Output = Result<Response, NetError>> + Send + 'static,
    {
        if self.response.is_some() {
            return Err(ServiceWorkerError::StateError(format!(
                "respond_with already called for {}",
                self.request.url
            )));
        }
        self.response = Some(response.boxed());
        Ok(())
    }

    /// Whether a handler took over this request.
    pub fn is_handled(&self) -> bool {
        self.response.is_some()
    }

    /// Split into the request and the supplied response, if any.
    pub fn into_parts(self) -> (Request, Option<PendingResponse>) {
        (self.request, self.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use url::Url;

    #[tokio::test]
    async fn test_settle_runs_all_work() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut event = ExtendableEvent::new(LifecycleEvent::Install);
        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            event.wait_until(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        assert_eq!(event.pending(), 3);
        event.settle().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_settle_fails_on_any_failure() {
        let mut event = ExtendableEvent::new(LifecycleEvent::Activate);
        event.wait_until(async { Ok(()) });
        event.wait_until(async { Err(ServiceWorkerError::StateError("nope".to_string())) });

        assert!(event.settle().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_event_settles() {
        assert!(ExtendableEvent::new(LifecycleEvent::Install)
            .settle()
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_respond_with_once() {
        let url = Url::parse("https://example.com/").unwrap();
        let mut event = FetchEvent::new(Request::get(url.clone()));
        assert!(!event.is_handled());

        let first = Response::ok_with_body(url.clone(), "first");
        event.respond_with(async move { Ok(first) }).unwrap();
        let second = Response::ok_with_body(url, "second");
        assert!(event.respond_with(async move { Ok(second) }).is_err());

        let (_, response) = event.into_parts();
        let response = response.unwrap().await.unwrap();
        assert_eq!(response.text().unwrap(), "first");
    }

    #[test]
    fn test_lifecycle_event_display() {
        assert_eq!(LifecycleEvent::Install.to_string(), "install");
        assert_eq!(LifecycleEvent::Activate.to_string(), "activate");
    }
}
