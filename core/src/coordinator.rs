//! Single-flight credential renewal.
//!
//! # Design
//! The coordinator is a two-state machine (`IDLE`, `REFRESHING`) over one
//! mutex-guarded `RefreshState`. A request that was rejected with 401/403 is
//! pushed onto the queue; the request that finds the machine idle flips it
//! to refreshing and spawns the renewal cycle. Both steps happen in one
//! critical section, so two callers can never both lead.
//!
//! When renewal settles the cycle takes the whole queue and flips back to
//! idle in a single critical section. Anything rejected after that point
//! starts a new cycle; nothing is dropped and nothing is replayed twice.
//!
//! The cycle runs on its own task. Dropping the future of the caller that
//! started it does not leave the machine stuck in `REFRESHING`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::credentials::CredentialSource;
use crate::error::ApiError;
use crate::http::RequestOptions;
use crate::normalize::NormalizedResult;
use crate::reauth::{ReauthPrompt, ReauthRequest};

/// Re-issues a request after renewal without going back through the
/// coordinator.
#[async_trait]
pub(crate) trait Replay: Send + Sync {
    async fn replay(&self, url: &str, options: &RequestOptions) -> NormalizedResult;
}

/// A request suspended until the current renewal cycle settles.
struct QueuedRequest {
    responder: oneshot::Sender<NormalizedResult>,
    url: String,
    options: RequestOptions,
    /// 401 or 403.
    status: u16,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    /// Status that started the current cycle.
    trigger_status: u16,
    queue: Vec<QueuedRequest>,
}

pub(crate) struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    credentials: Arc<dyn CredentialSource>,
    prompt: Arc<dyn ReauthPrompt>,
    renewal_timeout: Option<Duration>,
    cycles: AtomicU64,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        credentials: Arc<dyn CredentialSource>,
        prompt: Arc<dyn ReauthPrompt>,
        renewal_timeout: Option<Duration>,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            credentials,
            prompt,
            renewal_timeout,
            cycles: AtomicU64::new(0),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        self.lock_state().in_flight
    }

    pub(crate) fn pending(&self) -> usize {
        self.lock_state().queue.len()
    }

    pub(crate) fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Queue a rejected request and start a renewal cycle if none is
    /// running. The receiver settles once the cycle does.
    ///
    /// Must be called from within a tokio runtime; the cycle is spawned onto
    /// it.
    pub(crate) fn submit(
        self: &Arc<Self>,
        replayer: Arc<dyn Replay>,
        url: String,
        options: RequestOptions,
        status: u16,
    ) -> oneshot::Receiver<NormalizedResult> {
        let (responder, receiver) = oneshot::channel();
        let cycle = {
            let mut state = self.lock_state();
            state.queue.push(QueuedRequest {
                responder,
                url,
                options,
                status,
            });
            if state.in_flight {
                debug!(pending = state.queue.len(), "renewal in flight; request queued");
                None
            } else {
                state.in_flight = true;
                state.trigger_status = status;
                Some(self.cycles.fetch_add(1, Ordering::SeqCst) + 1)
            }
        };

        if let Some(cycle) = cycle {
            tokio::spawn(Arc::clone(self).run_cycle(cycle, replayer));
        }
        receiver
    }

    async fn run_cycle(self: Arc<Self>, cycle: u64, replayer: Arc<dyn Replay>) {
        info!(cycle, "credential renewal started");

        let renewed = self.renew().await;

        let (queue, trigger_status) = {
            let mut state = self.lock_state();
            state.in_flight = false;
            (std::mem::take(&mut state.queue), state.trigger_status)
        };

        if renewed {
            info!(cycle, replays = queue.len(), "credential renewed; replaying queued requests");
            join_all(queue.into_iter().map(|queued| {
                let replayer = Arc::clone(&replayer);
                async move {
                    let result = if queued.options.is_replayable() {
                        replayer.replay(&queued.url, &queued.options).await
                    } else {
                        warn!(url = %queued.url, "request body already consumed; not replaying");
                        NormalizedResult::failure(ApiError::replay_unsupported(queued.status))
                    };
                    // The caller may have gone away; its result is dropped.
                    let _ = queued.responder.send(result);
                }
            }))
            .await;
        } else {
            warn!(cycle, rejected = queue.len(), "credential renewal failed");
            for queued in queue {
                let _ = queued
                    .responder
                    .send(NormalizedResult::failure(ApiError::session_ended(queued.status)));
            }
            let request = ReauthRequest {
                message: ApiError::session_ended(trigger_status).message,
                return_url: self.prompt.current_location(),
            };
            self.prompt.prompt_reauth(request);
        }
    }

    /// One renewal attempt. Timeouts and panics count as failure.
    async fn renew(&self) -> bool {
        let attempt = AssertUnwindSafe(self.credentials.renew()).catch_unwind();
        let outcome = match self.renewal_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(timeout_ms = limit.as_millis() as u64, "credential renewal timed out");
                    return false;
                }
            },
            None => attempt.await,
        };
        outcome.unwrap_or_else(|_| {
            warn!("credential source panicked during renewal");
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;
    use crate::error::codes;
    use crate::http::{HttpMethod, OneShotBody, RequestBody};
    use crate::normalize::Payload;
    use crate::reauth::ChannelPrompt;

    struct GatedCredentials {
        gate: Notify,
        outcome: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialSource for GatedCredentials {
        async fn current(&self) -> Option<String> {
            None
        }

        async fn renew(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            self.outcome
        }
    }

    struct EchoReplay {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Replay for EchoReplay {
        async fn replay(&self, url: &str, _options: &RequestOptions) -> NormalizedResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            NormalizedResult::success(Payload::Text(url.to_string()), 200)
        }
    }

    fn setup(outcome: bool) -> (Arc<RefreshCoordinator>, Arc<GatedCredentials>, Arc<EchoReplay>) {
        let creds = Arc::new(GatedCredentials {
            gate: Notify::new(),
            outcome,
            calls: AtomicUsize::new(0),
        });
        let (prompt, _rx) = ChannelPrompt::channel();
        let coordinator = Arc::new(RefreshCoordinator::new(creds.clone(), Arc::new(prompt), None));
        let replay = Arc::new(EchoReplay {
            calls: AtomicUsize::new(0),
        });
        (coordinator, creds, replay)
    }

    async fn settle(coordinator: &RefreshCoordinator) {
        while coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn first_submit_leads_and_others_queue() {
        let (coordinator, creds, replay) = setup(true);
        assert!(!coordinator.is_refreshing());

        let first = coordinator.submit(replay.clone(), "/a".into(), RequestOptions::default(), 401);
        let second = coordinator.submit(replay.clone(), "/b".into(), RequestOptions::default(), 401);
        assert!(coordinator.is_refreshing());
        assert_eq!(coordinator.pending(), 2);
        // Counted when the cycle is claimed, before its task has run.
        assert_eq!(coordinator.cycles(), 1);

        tokio::task::yield_now().await;
        creds.gate.notify_one();

        let a = first.await.unwrap();
        let b = second.await.unwrap();
        assert_eq!(a.data, Some(Payload::Text("/a".into())));
        assert_eq!(b.data, Some(Payload::Text("/b".into())));
        assert_eq!(creds.calls.load(Ordering::SeqCst), 1);
        assert_eq!(replay.calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.cycles(), 1);
        assert_eq!(coordinator.pending(), 0);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn failed_cycle_rejects_with_trigger_status() {
        let (coordinator, creds, replay) = setup(false);

        let unauthenticated = coordinator.submit(replay.clone(), "/a".into(), RequestOptions::default(), 401);
        let forbidden = coordinator.submit(replay.clone(), "/b".into(), RequestOptions::default(), 403);
        tokio::task::yield_now().await;
        creds.gate.notify_one();

        let a = unauthenticated.await.unwrap();
        assert_eq!(a.error_code(), Some(codes::UNAUTHENTICATED));
        assert_eq!(a.status, 401);
        let b = forbidden.await.unwrap();
        assert_eq!(b.error_code(), Some(codes::UNAUTHORIZED));
        assert_eq!(b.status, 403);
        assert_eq!(replay.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn state_resets_between_cycles() {
        let (coordinator, creds, replay) = setup(true);

        let first = coordinator.submit(replay.clone(), "/a".into(), RequestOptions::default(), 401);
        tokio::task::yield_now().await;
        creds.gate.notify_one();
        first.await.unwrap();
        settle(&coordinator).await;

        let second = coordinator.submit(replay.clone(), "/b".into(), RequestOptions::default(), 401);
        assert!(coordinator.is_refreshing());
        assert_eq!(coordinator.cycles(), 2);
        tokio::task::yield_now().await;
        creds.gate.notify_one();
        second.await.unwrap();

        assert_eq!(coordinator.cycles(), 2);
        assert_eq!(creds.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_shot_bodies_are_not_replayed() {
        let (coordinator, creds, replay) = setup(true);
        let body = OneShotBody::new("upload");
        body.take();
        let options = RequestOptions::new(HttpMethod::Post).body(RequestBody::OneShot(body));

        let rx = coordinator.submit(replay.clone(), "/upload".into(), options, 401);
        tokio::task::yield_now().await;
        creds.gate.notify_one();

        let result = rx.await.unwrap();
        assert_eq!(result.error_code(), Some(codes::REPLAY_UNSUPPORTED));
        assert_eq!(result.status, 401);
        assert_eq!(replay.calls.load(Ordering::SeqCst), 0);
    }
}
