//! Scripted collaborators for the refresh tests.
//!
//! `FakeApi` accepts a set of bearer tokens and answers every other request
//! with a 401 problem document. Unauthorized responses for selected URLs can
//! be held back until the test releases them, which is how the tests line
//! up arrivals against a running renewal cycle. `FakeCredentials` renews by
//! minting `fresh-<n>` tokens and, when gated, waits for the test before
//! settling.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use authfetch_core::{
    ApiClient, ChannelPrompt, ClientConfig, CredentialSource, HttpRequest, HttpResponse, ReauthRequest, Transport,
    TransportError,
};
use tokio::sync::{mpsc, Semaphore};

pub const BASE_URL: &str = "http://api.test";
pub const STALE_TOKEN: &str = "stale";

#[derive(Default)]
pub struct FakeApi {
    accepted: Mutex<HashSet<String>>,
    routes: Mutex<HashMap<String, HttpResponse>>,
    forbidden: Mutex<HashSet<String>>,
    held: Mutex<HashMap<String, Arc<Semaphore>>>,
    requests: Mutex<Vec<HttpRequest>>,
    offline: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accept(&self, token: &str) {
        self.accepted.lock().unwrap().insert(token.to_string());
    }

    /// Response for authorized calls to `path`.
    pub fn route(&self, path: &str, response: HttpResponse) {
        self.routes.lock().unwrap().insert(url(path), response);
    }

    /// `path` answers 403 regardless of the token.
    pub fn forbid(&self, path: &str) {
        self.forbidden.lock().unwrap().insert(url(path));
    }

    /// Hold unauthorized responses for `path` until `release` is called.
    pub fn hold_rejection(&self, path: &str) {
        self.held.lock().unwrap().insert(url(path), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, path: &str) {
        if let Some(gate) = self.held.lock().unwrap().get(&url(path)) {
            gate.add_permits(1);
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        let target = url(path);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == target)
            .cloned()
            .collect()
    }
}

pub fn url(path: &str) -> String {
    format!("{BASE_URL}{path}")
}

pub fn json(status: u16, body: &str) -> HttpResponse {
    HttpResponse::new(status, "application/json", body)
}

#[async_trait]
impl Transport for FakeApi {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("network unreachable".to_string()));
        }

        let authorized = request
            .bearer_token()
            .is_some_and(|t| self.accepted.lock().unwrap().contains(t));
        if !authorized {
            let gate = self.held.lock().unwrap().get(&request.url).cloned();
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            return Ok(json(401, r#"{"type":"unauthenticated","detail":"token expired"}"#));
        }
        if self.forbidden.lock().unwrap().contains(&request.url) {
            return Ok(json(403, r#"{"type":"forbidden","detail":"not allowed"}"#));
        }
        let response = self.routes.lock().unwrap().get(&request.url).cloned();
        Ok(response.unwrap_or_else(|| json(404, r#"{"title":"Not Found"}"#)))
    }
}

pub struct FakeCredentials {
    api: Arc<FakeApi>,
    token: Mutex<Option<String>>,
    /// Outcomes for successive renewals; once empty every renewal succeeds.
    outcomes: Mutex<VecDeque<bool>>,
    gate: Option<Semaphore>,
    /// Whether renewed tokens are registered with the API.
    honored: bool,
    renewals: AtomicUsize,
}

impl FakeCredentials {
    pub fn new(api: Arc<FakeApi>) -> Self {
        Self {
            api,
            token: Mutex::new(Some(STALE_TOKEN.to_string())),
            outcomes: Mutex::new(VecDeque::new()),
            gate: None,
            honored: true,
            renewals: AtomicUsize::new(0),
        }
    }

    pub fn with_outcomes(self, outcomes: &[bool]) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.iter().copied().collect();
        self
    }

    /// Renewals wait for `release_renewal` before settling.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Renewals succeed but the API keeps rejecting the new token.
    pub fn unhonored(mut self) -> Self {
        self.honored = false;
        self
    }

    pub fn release_renewal(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for FakeCredentials {
    async fn current(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    async fn renew(&self) -> bool {
        let n = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let succeed = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
        if succeed {
            let token = format!("fresh-{n}");
            if self.honored {
                self.api.accept(&token);
            }
            *self.token.lock().unwrap() = Some(token);
        } else {
            *self.token.lock().unwrap() = None;
        }
        succeed
    }
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub credentials: Arc<FakeCredentials>,
    pub prompt: Arc<ChannelPrompt>,
    pub prompts: mpsc::UnboundedReceiver<ReauthRequest>,
    pub client: ApiClient,
}

impl Harness {
    pub fn new(configure: impl FnOnce(FakeCredentials) -> FakeCredentials) -> Self {
        Self::with_config(ClientConfig::new(BASE_URL).unwrap(), configure)
    }

    pub fn with_config(config: ClientConfig, configure: impl FnOnce(FakeCredentials) -> FakeCredentials) -> Self {
        let api = FakeApi::new();
        let credentials = Arc::new(configure(FakeCredentials::new(api.clone())));
        let (prompt, prompts) = ChannelPrompt::channel();
        let prompt = Arc::new(prompt);
        let client = ApiClient::builder(config)
            .transport(api.clone())
            .credentials(credentials.clone())
            .prompt(prompt.clone())
            .build()
            .unwrap();
        Self {
            api,
            credentials,
            prompt,
            prompts,
            client,
        }
    }

    /// Prompts received so far.
    pub fn drain_prompts(&mut self) -> Vec<ReauthRequest> {
        let mut seen = Vec::new();
        while let Ok(request) = self.prompts.try_recv() {
            seen.push(request);
        }
        seen
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
