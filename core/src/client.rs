//! Authenticated request dispatcher.
//!
//! # Design
//! `ApiClient` is a cheap handle (`Arc` inside) around one dispatcher and
//! one refresh coordinator, so every clone shares the same renewal state
//! while separate clients stay independent. `dispatch` never fails: transport
//! errors, bad bodies and failed renewals all come back as a
//! `NormalizedResult`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::coordinator::{RefreshCoordinator, Replay};
use crate::credentials::{CredentialSource, SessionCredentials};
use crate::error::{ApiError, ConfigError, TransportError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, RequestOptions};
use crate::normalize::{normalize, NormalizedResult};
use crate::reauth::{NoopPrompt, ReauthPrompt};
use crate::transport::Transport;

/// Handle for issuing authenticated requests.
///
/// Requests must be dispatched from within a tokio runtime: a rejected
/// credential spawns the renewal cycle onto the current runtime.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Dispatcher>,
}

struct Dispatcher {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSource>,
    coordinator: Arc<RefreshCoordinator>,
}

/// Statuses handed to the refresh coordinator.
fn is_auth_rejection(status: u16) -> bool {
    status == 401 || status == 403
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            transport: None,
            credentials: None,
            prompt: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Whether a renewal cycle is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.coordinator.is_refreshing()
    }

    /// Requests waiting on the current renewal cycle.
    pub fn pending(&self) -> usize {
        self.inner.coordinator.pending()
    }

    /// Renewal cycles started since the client was built.
    pub fn renewal_cycles(&self) -> u64 {
        self.inner.coordinator.cycles()
    }

    /// Send a request, renewing the credential on 401/403 unless the
    /// options opt out.
    ///
    /// A caller-supplied `Authorization` header is sent as-is and its
    /// rejection is returned without renewal, since the credential source
    /// did not issue it.
    pub async fn dispatch(&self, url: &str, options: RequestOptions) -> NormalizedResult {
        let url = self.inner.config.resolve(url);
        let request_id = Uuid::new_v4();

        let response = match self.inner.send(&url, &options, request_id).await {
            Ok(response) => response,
            Err(err) => return network_failure(&url, request_id, &err),
        };

        if is_auth_rejection(response.status) && !options.skip_auth_refresh && !options.has_header("authorization") {
            let status = response.status;
            debug!(%request_id, %url, status, "rejected credential; waiting for renewal");
            let replayer: Arc<dyn Replay> = self.inner.clone();
            let receiver = self.inner.coordinator.submit(replayer, url, options, status);
            return receiver
                .await
                .unwrap_or_else(|_| NormalizedResult::failure(ApiError::session_ended(status)));
        }

        normalize(&response)
    }

    pub async fn get(&self, url: &str) -> NormalizedResult {
        self.dispatch(url, RequestOptions::new(HttpMethod::Get)).await
    }

    pub async fn delete(&self, url: &str) -> NormalizedResult {
        self.dispatch(url, RequestOptions::new(HttpMethod::Delete)).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> NormalizedResult {
        self.send_json(HttpMethod::Post, url, body).await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> NormalizedResult {
        self.send_json(HttpMethod::Put, url, body).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> NormalizedResult {
        self.send_json(HttpMethod::Patch, url, body).await
    }

    async fn send_json<B: Serialize + ?Sized>(&self, method: HttpMethod, url: &str, body: &B) -> NormalizedResult {
        match RequestOptions::json(method, body) {
            Ok(options) => self.dispatch(url, options).await,
            Err(err) => NormalizedResult::failure(err),
        }
    }
}

fn network_failure(url: &str, request_id: Uuid, err: &TransportError) -> NormalizedResult {
    warn!(%request_id, %url, error = %err, "transport failure");
    NormalizedResult::failure(ApiError::network(err))
}

impl Dispatcher {
    /// One round-trip with the current credential attached.
    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        request_id: Uuid,
    ) -> Result<HttpResponse, TransportError> {
        let mut headers = options.headers.clone();
        if !options.has_header("authorization") {
            if let Some(token) = self.credentials.current().await {
                headers.push(("authorization".to_string(), format!("Bearer {token}")));
            }
        }
        let request = HttpRequest {
            method: options.method,
            url: url.to_string(),
            headers,
            body: options.body.as_ref().and_then(|b| b.take_for_send()),
        };

        debug!(%request_id, method = options.method.as_str(), %url, "dispatching");
        let response = self.transport.send(request).await?;
        debug!(%request_id, %url, status = response.status, "response received");
        Ok(response)
    }
}

#[async_trait]
impl Replay for Dispatcher {
    async fn replay(&self, url: &str, options: &RequestOptions) -> NormalizedResult {
        let request_id = Uuid::new_v4();
        match self.send(url, options, request_id).await {
            Ok(response) => normalize(&response),
            Err(err) => network_failure(url, request_id, &err),
        }
    }
}

/// Assembles an `ApiClient` from its collaborators.
///
/// With the `client` feature the transport defaults to `ReqwestTransport`
/// and the credentials to a `SessionCredentials` renewing through the
/// configured refresh path. The prompt defaults to `NoopPrompt`.
pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialSource>>,
    prompt: Option<Arc<dyn ReauthPrompt>>,
}

impl ApiClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn ReauthPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn build(self) -> Result<ApiClient, ConfigError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let credentials: Arc<dyn CredentialSource> = match self.credentials {
            Some(credentials) => credentials,
            None => Arc::new(SessionCredentials::new(Arc::clone(&transport), self.config.refresh_url())),
        };
        let prompt: Arc<dyn ReauthPrompt> = match self.prompt {
            Some(prompt) => prompt,
            None => Arc::new(NoopPrompt),
        };
        let coordinator = Arc::new(RefreshCoordinator::new(
            Arc::clone(&credentials),
            prompt,
            self.config.renewal_timeout(),
        ));

        Ok(ApiClient {
            inner: Arc::new(Dispatcher {
                config: self.config,
                transport,
                credentials,
                coordinator,
            }),
        })
    }
}

#[cfg(feature = "client")]
fn default_transport() -> Result<Arc<dyn Transport>, ConfigError> {
    Ok(Arc::new(crate::transport::ReqwestTransport::new()?))
}

#[cfg(not(feature = "client"))]
fn default_transport() -> Result<Arc<dyn Transport>, ConfigError> {
    Err(ConfigError::MissingTransport)
}
