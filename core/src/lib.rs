//! Authenticated request layer.
//!
//! # Overview
//! `ApiClient` issues HTTP calls on behalf of the rest of an application,
//! attaches the current bearer credential, and transparently renews it when
//! the server answers 401 or 403. However many requests are rejected at
//! once, exactly one renewal runs; the others wait for it and are replayed
//! with the new credential, or all fail together (with a single re-auth
//! prompt) if renewal is impossible.
//!
//! # Design
//! - Every outcome is a `NormalizedResult`: transport failures, unparsable
//!   bodies and failed renewals included. `dispatch` does not return `Err`.
//! - Collaborators sit behind traits: `Transport` performs I/O,
//!   `CredentialSource` owns the token, `ReauthPrompt` talks to the user.
//! - Renewal state lives in one coordinator per client, not in globals.
//! - Dispatch needs a tokio runtime; renewal cycles are spawned onto it.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use authfetch_core::{ApiClient, ClientConfig, ReqwestTransport, SessionCredentials};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new("https://api.example.com")?;
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let session = Arc::new(SessionCredentials::new(transport.clone(), config.refresh_url()));
//! session.set("token-from-sign-in").await;
//!
//! let client = ApiClient::builder(config)
//!     .transport(transport)
//!     .credentials(session)
//!     .build()?;
//!
//! let orders = client.get("/orders").await;
//! if let Some(err) = &orders.error {
//!     eprintln!("{}: {}", err.code, err.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
mod coordinator;
pub mod credentials;
pub mod error;
pub mod http;
pub mod normalize;
pub mod reauth;
pub mod transport;

pub use client::{ApiClient, ApiClientBuilder};
pub use config::ClientConfig;
pub use credentials::{CredentialSource, RenewalResponse, SessionCredentials, StaticCredentials};
pub use error::{codes, ApiError, ConfigError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, OneShotBody, RequestBody, RequestOptions};
pub use normalize::{normalize, NormalizedResult, Payload};
pub use reauth::{
    ChannelPrompt, NoopPrompt, PreservingPrompt, ReauthPrompt, ReauthRequest, SnapshotStore, StateStore,
};
#[cfg(feature = "client")]
pub use transport::ReqwestTransport;
pub use transport::Transport;
