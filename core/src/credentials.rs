//! Credential sources.
//!
//! The request layer never stores credentials itself. It asks a
//! `CredentialSource` for the current bearer token on every send and asks it
//! to renew when the server rejects the token.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::http::{HttpMethod, HttpRequest};
use crate::normalize::normalize;
use crate::transport::Transport;

#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Current bearer token, or `None` for anonymous calls.
    async fn current(&self) -> Option<String>;

    /// Try to obtain a new credential. `false` means the session is over.
    async fn renew(&self) -> bool;
}

/// A fixed token that can never be renewed.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: Some(token.into()) }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn current(&self) -> Option<String> {
        self.token.clone()
    }

    async fn renew(&self) -> bool {
        false
    }
}

/// Body returned by the renewal endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalResponse {
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
}

/// Token cell renewed through the cookie-identified renewal endpoint.
///
/// The renewal call is a bodiless `POST` over the same transport as regular
/// requests so the session cookie goes along with it.
pub struct SessionCredentials {
    token: RwLock<Option<String>>,
    user: RwLock<Option<Value>>,
    transport: Arc<dyn Transport>,
    refresh_url: String,
}

impl SessionCredentials {
    pub fn new(transport: Arc<dyn Transport>, refresh_url: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(None),
            user: RwLock::new(None),
            transport,
            refresh_url: refresh_url.into(),
        }
    }

    /// Store the token obtained at sign-in.
    pub async fn set(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub async fn clear(&self) {
        *self.token.write().await = None;
        *self.user.write().await = None;
    }

    /// User object returned by the last successful renewal.
    pub async fn user(&self) -> Option<Value> {
        self.user.read().await.clone()
    }

    async fn request_renewal(&self) -> Result<RenewalResponse, String> {
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.refresh_url.clone(),
            headers: Vec::new(),
            body: None,
        };
        let response = self.transport.send(request).await.map_err(|e| e.to_string())?;
        normalize(&response)
            .decode::<RenewalResponse>()
            .into_result()
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl CredentialSource for SessionCredentials {
    async fn current(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn renew(&self) -> bool {
        match self.request_renewal().await {
            Ok(RenewalResponse { success: true, token, user }) => {
                match token {
                    Some(token) => {
                        *self.token.write().await = Some(token);
                        info!(url = %self.refresh_url, "session token renewed");
                    }
                    None => debug!(url = %self.refresh_url, "session renewed without a new token"),
                }
                if user.is_some() {
                    *self.user.write().await = user;
                }
                true
            }
            Ok(_) => {
                warn!(url = %self.refresh_url, "renewal endpoint refused the session");
                self.clear().await;
                false
            }
            Err(error) => {
                warn!(url = %self.refresh_url, %error, "session renewal failed");
                self.clear().await;
                false
            }
        }
    }
}
