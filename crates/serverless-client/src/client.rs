//! Client construction and command dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::header::COOKIE;
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handle::{CallHandle, HandleCore};
use crate::pending::PendingCallQueue;
use crate::poller::WebhookPoller;
use crate::protocol::{Command, DispatchResponse, OperationType, ReadyResponse};

struct ClientInner {
    http: reqwest::Client,
    config: ClientConfig,
    command_url: String,
    ready_url: String,
    ready: AtomicBool,
    /// Guards against spawning more than one readiness watch at a time.
    probing: AtomicBool,
    pending: PendingCallQueue,
    poller: WebhookPoller,
}

/// Client for a serverless command backend.
///
/// Construction is readiness-gated: [`connect`](Self::connect) probes the
/// backend until it reports ready, then every
/// [`call`](Self::call) returns a [`CallHandle`] immediately while the
/// dispatch round-trip runs in the background.
pub struct ServerlessClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ServerlessClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerlessClient").finish_non_exhaustive()
    }
}

impl ServerlessClient {
    /// Probe the backend until it is ready, then return a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConfigured`] for an empty endpoint and
    /// [`Error::ReadyTimeout`] when the probe budget is exhausted.
    #[instrument(skip_all, fields(endpoint = %config.endpoint, serverless_id = %config.serverless_id))]
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(Error::NotConfigured("endpoint URL is required".to_string()));
        }

        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| Error::transport(&err))?;
        let poller = WebhookPoller::new(http.clone(), config.webhook_url(), config.poll_interval);
        poller.set_connection_timeout(config.connection_timeout);

        let command_url = config.command_url();
        let ready_url = config.ready_url();
        let inner = Arc::new(ClientInner {
            http,
            config,
            command_url,
            ready_url,
            ready: AtomicBool::new(false),
            probing: AtomicBool::new(false),
            pending: PendingCallQueue::default(),
            poller,
        });

        wait_for_server_ready(&inner).await?;
        inner.ready.store(true, Ordering::SeqCst);
        Ok(Self { inner })
    }

    /// Dispatch `name` with `args` and return the handle for its outcome.
    ///
    /// The handle is returned before the request is sent, so callbacks can be
    /// registered ahead of the first event. While the backend is restarting,
    /// the dispatch is queued and replayed once readiness returns.
    pub fn call(&self, name: impl Into<String>, args: Vec<Value>) -> CallHandle {
        let mut options = self.inner.config.command_options.clone();
        if let Some(session_id) = &self.inner.config.session_id {
            options.insert("sessionId".to_string(), Value::String(session_id.clone()));
        }
        let command = Command {
            for_whom: self.inner.config.user_id.clone(),
            name: name.into(),
            plugin_name: self.inner.config.plugin_name.clone(),
            args,
            options,
        };

        let handle = CallHandle::new();
        let attempt = Arc::new(DispatchAttempt {
            inner: self.inner.clone(),
            command,
            core: handle.core(),
        });

        if self.inner.ready.load(Ordering::SeqCst) {
            tokio::spawn(attempt.run());
        } else {
            debug!(command = %attempt.command.name, "backend not ready, queuing dispatch");
            self.inner.pending.push(Box::new(move || attempt.run()));
        }

        handle
    }

    /// The poll coordinator backing this client's deferred calls.
    pub fn poller(&self) -> &WebhookPoller {
        &self.inner.poller
    }

    /// Tear down: cancel every in-flight poll cycle. Outstanding handles for
    /// cancelled calls stay pending.
    pub fn shutdown(&self) {
        self.inner.poller.cancel_all();
    }
}

/// One dispatch of one envelope. Replayed as-is when the backend asks for a
/// restart.
struct DispatchAttempt {
    inner: Arc<ClientInner>,
    command: Command,
    core: Arc<HandleCore>,
}

impl DispatchAttempt {
    fn run(self: Arc<Self>) -> futures::future::BoxFuture<'static, ()> {
        Box::pin(self.run_inner())
    }

    async fn run_inner(self: Arc<Self>) {
        debug!(command = %self.command.name, "dispatching command");

        let mut request = self
            .inner
            .http
            .put(&self.inner.command_url)
            .json(&self.command);
        if let Some(session_id) = &self.inner.config.session_id {
            request = request.header(COOKIE, format!("sessionId={session_id}"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                self.core.reject(Error::transport(&err));
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let err = match response.json::<Value>().await {
                Ok(body) => dispatch_error_from_body(&body, status.as_u16()),
                Err(_) => Error::Http {
                    status: status.as_u16(),
                },
            };
            error!(command = %self.command.name, status = status.as_u16(), "command dispatch failed");
            self.core.reject(err);
            return;
        }

        let response: DispatchResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(err) => {
                self.core.reject(Error::InvalidResponse(err.to_string()));
                return;
            }
        };

        match response.operation_type {
            OperationType::Restart => {
                info!(command = %self.command.name, "backend restarting, re-queuing dispatch");
                self.inner.ready.store(false, Ordering::SeqCst);
                let inner = self.inner.clone();
                let retry = self.clone();
                inner.pending.push(Box::new(move || retry.run()));
                spawn_ready_watch(inner);
            }
            OperationType::Sync => self.core.resolve(response.result),
            operation_type => {
                self.core.upgrade_operation_type(operation_type);
                let call_id = match &response.result {
                    Value::String(id) => id.clone(),
                    other => other.to_string(),
                };
                HandleCore::assign_call_id(&self.core, call_id);

                let core = self.core.clone();
                let poller = self.inner.poller.clone();
                // One scheduling tick before the first poll, so callback
                // registration following the dispatch completes first.
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    core.begin_polling(poller).await;
                });
            }
        }
    }
}

/// Map a non-2xx dispatch body to an error, preferring the backend's
/// structured `{result: {message, stack?}}` detail when present.
fn dispatch_error_from_body(body: &Value, status: u16) -> Error {
    let detail = body.get("result").and_then(Value::as_object);
    match detail
        .and_then(|detail| detail.get("message"))
        .and_then(Value::as_str)
    {
        Some(message) => Error::Backend {
            message: message.to_string(),
            stack: detail
                .and_then(|detail| detail.get("stack"))
                .and_then(Value::as_str)
                .map(str::to_string),
            status: body
                .get("statusCode")
                .and_then(Value::as_u64)
                .map(|code| code as u16)
                .unwrap_or(status),
        },
        None => Error::Http { status },
    }
}

async fn wait_for_server_ready(inner: &ClientInner) -> Result<()> {
    let max_attempts = inner.config.ready_max_attempts;
    for attempt in 1..=max_attempts {
        let ready = match inner.http.get(&inner.ready_url).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<ReadyResponse>()
                .await
                .map(|body| body.is_ready())
                .unwrap_or(false),
            Ok(_) | Err(_) => false,
        };
        if ready {
            info!(attempt, "backend ready");
            return Ok(());
        }
        info!(attempt, max_attempts, "backend not ready yet");
        if attempt < max_attempts {
            tokio::time::sleep(inner.config.ready_probe_interval).await;
        }
    }
    Err(Error::ReadyTimeout {
        attempts: max_attempts,
    })
}

/// Re-probe readiness after a restart and replay queued dispatches, in
/// enqueue order, once the backend reports ready. Only one watch runs at a
/// time.
fn spawn_ready_watch(inner: Arc<ClientInner>) {
    if inner.probing.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(async move {
        let result = wait_for_server_ready(&inner).await;
        inner.probing.store(false, Ordering::SeqCst);
        match result {
            Ok(()) => {
                inner.ready.store(true, Ordering::SeqCst);
                let queued = inner.pending.drain();
                info!(count = queued.len(), "backend ready again, replaying queued dispatches");
                for call in queued {
                    tokio::spawn(call());
                }
            }
            Err(err) => {
                error!(
                    error = %err,
                    queued = inner.pending.len(),
                    "backend did not become ready, queued dispatches remain pending"
                );
            }
        }
    });
}
