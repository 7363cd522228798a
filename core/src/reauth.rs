//! Interactive re-authentication hooks.
//!
//! When a renewal cycle fails the coordinator calls
//! [`ReauthPrompt::prompt_reauth`] once. How the prompt is shown is up to the
//! application; this module only provides the contract, a channel-based
//! implementation for UI loops, and a decorator that saves in-progress state
//! before prompting so it can be restored after sign-in.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

/// What the prompt needs to bring the user back to where they were.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReauthRequest {
    pub message: String,
    pub return_url: String,
}

pub trait ReauthPrompt: Send + Sync {
    /// Location the user should return to after signing in again.
    fn current_location(&self) -> String {
        "/".to_string()
    }

    /// Fire-and-forget; must not block.
    fn prompt_reauth(&self, request: ReauthRequest);
}

/// Logs and drops prompts. Used when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPrompt;

impl ReauthPrompt for NoopPrompt {
    fn prompt_reauth(&self, request: ReauthRequest) {
        warn!(return_url = %request.return_url, message = %request.message, "re-authentication required");
    }
}

/// Sends prompts to a UI loop over an unbounded channel.
#[derive(Debug)]
pub struct ChannelPrompt {
    sender: mpsc::UnboundedSender<ReauthRequest>,
    location: RwLock<String>,
}

impl ChannelPrompt {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReauthRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let prompt = Self {
            sender,
            location: RwLock::new("/".to_string()),
        };
        (prompt, receiver)
    }

    /// Record a navigation so later prompts return here.
    pub fn set_location(&self, location: impl Into<String>) {
        *self.location.write().unwrap_or_else(PoisonError::into_inner) = location.into();
    }
}

impl ReauthPrompt for ChannelPrompt {
    fn current_location(&self) -> String {
        self.location.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn prompt_reauth(&self, request: ReauthRequest) {
        if self.sender.send(request).is_err() {
            warn!("re-auth prompt receiver dropped");
        }
    }
}

/// Save/restore contract for in-progress view state, keyed by the URL the
/// user will return to.
pub trait StateStore: Send + Sync {
    fn save(&self, return_url: &str);
    fn restore(&self, return_url: &str) -> Option<Value>;
}

/// In-memory `StateStore` that captures state through a closure. Each
/// snapshot can be restored once.
pub struct SnapshotStore<F> {
    capture: F,
    snapshots: Mutex<HashMap<String, Value>>,
}

impl<F> SnapshotStore<F>
where
    F: Fn() -> Option<Value> + Send + Sync,
{
    pub fn new(capture: F) -> Self {
        Self {
            capture,
            snapshots: Mutex::new(HashMap::new()),
        }
    }
}

impl<F> StateStore for SnapshotStore<F>
where
    F: Fn() -> Option<Value> + Send + Sync,
{
    fn save(&self, return_url: &str) {
        if let Some(snapshot) = (self.capture)() {
            self.snapshots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(return_url.to_string(), snapshot);
        }
    }

    fn restore(&self, return_url: &str) -> Option<Value> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner).remove(return_url)
    }
}

/// Saves state through `store` before handing the request to `inner`.
pub struct PreservingPrompt<P, S> {
    inner: P,
    store: S,
}

impl<P, S> PreservingPrompt<P, S> {
    pub fn new(inner: P, store: S) -> Self {
        Self { inner, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<P, S> ReauthPrompt for PreservingPrompt<P, S>
where
    P: ReauthPrompt,
    S: StateStore,
{
    fn current_location(&self) -> String {
        self.inner.current_location()
    }

    fn prompt_reauth(&self, request: ReauthRequest) {
        self.store.save(&request.return_url);
        self.inner.prompt_reauth(request);
    }
}
