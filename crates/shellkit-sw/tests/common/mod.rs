//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use shellkit_common::{BootstrapList, WorkerConfig};
use shellkit_net::{Fetcher, NetError, Request, Response};
use shellkit_sw::{CacheError, CacheStorage, CacheStore, ClientControl, ServiceWorkerError};
use url::Url;

pub const SCOPE: &str = "https://invoices.example.com/app/";
pub const JSPDF: &str = "https://cdn.example.net/jspdf.umd.min.js";
pub const AUTOTABLE: &str = "https://cdn.example.net/jspdf.plugin.autotable.min.js";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Resolve a location against the test scope.
pub fn url(location: &str) -> Url {
    Url::parse(SCOPE).unwrap().join(location).unwrap()
}

pub fn app_config(cache_name: &str) -> WorkerConfig {
    WorkerConfig::invoice_generator(Url::parse(SCOPE).unwrap())
        .with_cache_name(cache_name)
        .with_bootstrap(BootstrapList::new(
            ["./", "./index.html", "./manifest.json"],
            [JSPDF, AUTOTABLE],
        ))
}

enum Route {
    Respond { status: StatusCode, body: String },
    Fail,
}

/// In-process network that records every request it sees.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A network serving the whole bootstrap list.
    pub fn serving_app() -> Arc<Self> {
        let net = Self::new();
        net.serve(url("./").as_str(), "<html>root</html>");
        net.serve(url("./index.html").as_str(), "<html>shell</html>");
        net.serve(url("./manifest.json").as_str(), r#"{"name":"Invoices"}"#);
        net.serve(JSPDF, "/* jspdf */");
        net.serve(AUTOTABLE, "/* autotable */");
        net
    }

    pub fn serve(&self, url: &str, body: &str) {
        self.route(
            url,
            Route::Respond {
                status: StatusCode::OK,
                body: body.to_string(),
            },
        );
    }

    pub fn serve_status(&self, url: &str, status: u16) {
        self.route(
            url,
            Route::Respond {
                status: StatusCode::from_u16(status).unwrap(),
                body: String::new(),
            },
        );
    }

    pub fn fail(&self, url: &str) {
        self.route(url, Route::Fail);
    }

    fn route(&self, url: &str, route: Route) {
        let key = Url::parse(url).unwrap().to_string();
        self.routes.lock().unwrap().insert(key, route);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        let key = request.cache_key();
        self.calls.lock().unwrap().push(key.clone());
        tokio::task::yield_now().await;

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed(format!("offline: {key}")));
        }

        let routes = self.routes.lock().unwrap();
        match routes.get(&key) {
            Some(Route::Respond { status, body }) => Ok(Response::new(
                request.url.clone(),
                *status,
                HeaderMap::new(),
                body.clone(),
            )),
            Some(Route::Fail) | None => {
                Err(NetError::RequestFailed(format!("connection refused: {key}")))
            }
        }
    }
}

/// Client control that only counts calls.
#[derive(Default)]
pub struct RecordingControl {
    pub skip_waiting_calls: AtomicUsize,
    pub claim_calls: AtomicUsize,
    pub claimable: usize,
    pub fail_claim: bool,
}

impl RecordingControl {
    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting_calls.load(Ordering::SeqCst)
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClientControl for RecordingControl {
    async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        self.skip_waiting_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn claim(&self) -> Result<usize, ServiceWorkerError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_claim {
            return Err(ServiceWorkerError::StateError("claim refused".to_string()));
        }
        Ok(self.claimable)
    }
}

/// Store whose single-entry writes always fail; batch writes still work.
#[derive(Default)]
pub struct ReadOnlyPuts {
    inner: CacheStorage,
}

#[async_trait]
impl CacheStore for ReadOnlyPuts {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> bool {
        self.inner.has(name).await
    }

    async fn put(
        &self,
        name: &str,
        _request: &Request,
        _response: &Response,
    ) -> Result<(), CacheError> {
        Err(CacheError::NotFound(format!("{name} (writes disabled)")))
    }

    async fn put_all(
        &self,
        name: &str,
        entries: Vec<(Request, Response)>,
    ) -> Result<(), CacheError> {
        self.inner.put_all(name, entries).await
    }

    async fn match_in(&self, name: &str, request: &Request) -> Option<Response> {
        self.inner.match_in(name, request).await
    }

    async fn match_any(&self, request: &Request) -> Option<Response> {
        self.inner.match_any(request).await
    }

    async fn keys(&self) -> Vec<String> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> bool {
        self.inner.delete(name).await
    }

    async fn entries(&self, name: &str) -> Option<Vec<String>> {
        self.inner.entries(name).await
    }
}
