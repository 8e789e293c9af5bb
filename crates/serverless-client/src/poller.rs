//! Long-polling of the webhook endpoint for deferred call results.
//!
//! One [`WebhookPoller`] is constructed per client and owns a registry of
//! in-flight poll cycles keyed by call identifier. Each cycle is a single
//! task issuing strictly sequential GETs against `{webhook_url}/{call_id}`
//! until the payload reports a terminal status, the attempt budget runs out,
//! or the consecutive-failure circuit breaker trips.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::protocol::{PollPayload, PollStatus};

/// Back-to-back failed attempts after which the backend is declared down.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Termination policy for one poll cycle, read once at poll start.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitOptions {
    /// When true, the attempt budget never binds.
    pub infinite: bool,
    /// Attempt ceiling; `None` means unbounded even when `infinite` is false.
    pub max_attempts: Option<u32>,
}

impl WaitOptions {
    fn exhausted(&self, attempts: u32) -> bool {
        !self.infinite && self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

/// Event callbacks for one poll cycle. Only the first waiter for a call
/// identifier gets its hooks wired; later waiters share the outcome.
#[derive(Default)]
pub struct PollHooks {
    pub on_progress: Option<Box<dyn Fn(Value) + Send>>,
    pub on_end: Option<Box<dyn FnOnce(Value) + Send>>,
    pub on_error: Option<Box<dyn FnOnce(Error) + Send>>,
}

type Outcome = Result<Value, Error>;

struct PollEntry {
    outcome_rx: watch::Receiver<Option<Outcome>>,
    cancel: CancellationToken,
}

struct PollerInner {
    http: reqwest::Client,
    webhook_url: String,
    poll_interval: Duration,
    connection_timeout: Mutex<Duration>,
    registry: Mutex<HashMap<String, PollEntry>>,
}

/// Poll coordinator for deferred call results.
#[derive(Clone)]
pub struct WebhookPoller {
    inner: Arc<PollerInner>,
}

impl WebhookPoller {
    pub fn new(
        http: reqwest::Client,
        webhook_url: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                http,
                webhook_url: webhook_url.into(),
                poll_interval,
                connection_timeout: Mutex::new(Duration::from_secs(30)),
                registry: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Set the per-request timeout for poll GETs. A request that hits this
    /// timeout counts as a transport failure; only explicit cancellation is
    /// silent.
    pub fn set_connection_timeout(&self, timeout: Duration) {
        *self.inner.connection_timeout.lock() = timeout;
    }

    /// Whether a poll cycle is currently registered for `call_id`.
    pub fn is_polling(&self, call_id: &str) -> bool {
        self.inner.registry.lock().contains_key(call_id)
    }

    /// Wait for the result of `call_id`, starting a poll cycle if none is
    /// running.
    ///
    /// At most one cycle exists per identifier: a second call while the first
    /// is in flight subscribes to the same outcome, and its `hooks` are
    /// ignored. A cancelled cycle never produces an outcome; its waiters stay
    /// pending.
    pub async fn wait_for_result(
        &self,
        call_id: &str,
        options: WaitOptions,
        hooks: PollHooks,
    ) -> Outcome {
        let mut outcome_rx = {
            let mut registry = self.inner.registry.lock();
            if let Some(entry) = registry.get(call_id) {
                debug!(%call_id, "joining poll cycle already in flight");
                entry.outcome_rx.clone()
            } else {
                let (outcome_tx, outcome_rx) = watch::channel(None);
                let cancel = CancellationToken::new();
                registry.insert(
                    call_id.to_string(),
                    PollEntry {
                        outcome_rx: outcome_rx.clone(),
                        cancel: cancel.clone(),
                    },
                );
                tokio::spawn(run_cycle(
                    self.inner.clone(),
                    call_id.to_string(),
                    options,
                    hooks,
                    cancel,
                    outcome_tx,
                ));
                outcome_rx
            }
        };

        loop {
            let current = outcome_rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if outcome_rx.changed().await.is_err() {
                // Cycle was cancelled without settling; stay pending, per the
                // documented teardown semantics.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Abort the in-flight request for `call_id` and drop its bookkeeping
    /// without settling the outcome. Intended for teardown paths with no
    /// remaining listener.
    pub fn cancel(&self, call_id: &str) {
        if let Some(entry) = self.inner.registry.lock().remove(call_id) {
            debug!(%call_id, "cancelling poll cycle");
            entry.cancel.cancel();
        }
    }

    /// Cancel every registered poll cycle.
    pub fn cancel_all(&self) {
        let entries: Vec<(String, PollEntry)> =
            self.inner.registry.lock().drain().collect();
        for (call_id, entry) in entries {
            debug!(%call_id, "cancelling poll cycle");
            entry.cancel.cancel();
        }
    }
}

/// Classification of one poll attempt.
enum Attempt {
    Payload(PollPayload),
    BadStatus(u16),
    TransportFailed(String),
}

async fn run_cycle(
    inner: Arc<PollerInner>,
    call_id: String,
    options: WaitOptions,
    mut hooks: PollHooks,
    cancel: CancellationToken,
    outcome_tx: watch::Sender<Option<Outcome>>,
) {
    let url = format!("{}/{call_id}", inner.webhook_url);
    let started_at = Instant::now();
    let mut attempts: u32 = 0;
    let mut consecutive_failures: u32 = 0;
    let mut next_delay: Option<Duration> = None;

    let outcome: Outcome = loop {
        if let Some(delay) = next_delay.take() {
            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(%call_id, "poll cycle cancelled during backoff");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        attempts += 1;
        debug!(%call_id, attempts, consecutive_failures, "polling webhook");

        let timeout = *inner.connection_timeout.lock();
        let request = inner
            .http
            .get(&url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%call_id, "poll cycle cancelled");
                return;
            }
            response = request => response,
        };

        let attempt = match response {
            Err(err) => Attempt::TransportFailed(err.to_string()),
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    Attempt::BadStatus(status.as_u16())
                } else {
                    consecutive_failures = 0;
                    match response.json::<PollPayload>().await {
                        Ok(payload) => Attempt::Payload(payload),
                        Err(err) => Attempt::TransportFailed(err.to_string()),
                    }
                }
            }
        };

        match attempt {
            Attempt::Payload(payload) => match payload.status {
                PollStatus::Error => {
                    break Err(Error::Webhook {
                        call_id: call_id.clone(),
                        message: payload
                            .message
                            .unwrap_or_else(|| "webhook reported an error".to_string()),
                        code: payload.code,
                        details: payload.details,
                    });
                }
                PollStatus::Completed => {
                    // A completion payload may carry one last progress report.
                    if let (Some(progress), Some(on_progress)) =
                        (payload.progress, hooks.on_progress.as_ref())
                    {
                        on_progress(progress);
                    }
                    break Ok(payload.result);
                }
                PollStatus::Pending => {
                    if let Some(progress) = payload.progress {
                        debug!(%call_id, "progress report");
                        if let Some(on_progress) = hooks.on_progress.as_ref() {
                            on_progress(progress);
                        }
                    } else {
                        debug!(%call_id, "long-poll timeout, reconnecting");
                    }
                    if options.exhausted(attempts) {
                        break Err(Error::PollingTimeout {
                            call_id: call_id.clone(),
                            attempts,
                        });
                    }
                    // Server-side long-poll timeout: reconnect immediately,
                    // unlike the backoff applied to failures.
                    next_delay = Some(Duration::ZERO);
                }
                PollStatus::Expired => {
                    break Err(Error::ProcessUnavailable {
                        call_id: call_id.clone(),
                    });
                }
            },
            Attempt::BadStatus(status) => {
                consecutive_failures += 1;
                warn!(%call_id, status, consecutive_failures, "webhook poll returned bad status");
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    break Err(Error::ServerDown {
                        call_id: call_id.clone(),
                        consecutive_failures,
                        last_status: status,
                    });
                }
                if options.exhausted(attempts) {
                    break Err(Error::PollingTimeout {
                        call_id: call_id.clone(),
                        attempts,
                    });
                }
                next_delay = Some(inner.poll_interval);
            }
            Attempt::TransportFailed(message) => {
                consecutive_failures += 1;
                warn!(%call_id, %message, consecutive_failures, "webhook poll failed");
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    break Err(Error::PersistentFailure {
                        call_id: call_id.clone(),
                        consecutive_failures,
                        message,
                    });
                }
                if options.exhausted(attempts) {
                    break Err(Error::PollingFailed {
                        call_id: call_id.clone(),
                        attempts,
                        message,
                    });
                }
                next_delay = Some(inner.poll_interval);
            }
        }
    };

    match &outcome {
        Ok(result) => {
            info!(
                %call_id,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "call completed"
            );
            if let Some(on_end) = hooks.on_end.take() {
                on_end(result.clone());
            }
        }
        Err(err) => {
            warn!(%call_id, error = %err, "call failed");
            if let Some(on_error) = hooks.on_error.take() {
                on_error(err.clone());
            }
        }
    }

    // Publish the outcome and drop the registry entry under one lock hold: a
    // concurrent wait either joins the still-present entry (and observes the
    // outcome the moment it is sent) or runs after the broadcast. Removing
    // before sending would leave a window where a second waiter starts a
    // duplicate cycle.
    {
        let mut registry = inner.registry.lock();
        let _ = outcome_tx.send(Some(outcome));
        registry.remove(&call_id);
    }
}
