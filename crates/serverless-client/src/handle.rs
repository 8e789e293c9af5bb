//! The dual-mode object returned at dispatch time.
//!
//! [`CallHandle`] is returned synchronously by
//! [`ServerlessClient::call`](crate::ServerlessClient::call), before the
//! dispatch round-trip has revealed how the backend will execute the command.
//! Awaiting it yields a [`CallOutcome`]:
//!
//! - a synchronous command settles with [`CallOutcome::Sync`] carrying the
//!   final value;
//! - a long-running command settles with [`CallOutcome::Deferred`] as soon as
//!   the backend hands back a call identifier. The [`DeferredCall`] inside is
//!   deliberately not awaitable; it exposes progress/end/error subscription
//!   and a cached result.
//!
//! Callbacks registered on the handle before the mode is known are shared
//! with the deferred handle, so registering first and awaiting later never
//! loses events.

use std::future::IntoFuture;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::error::Error;
use crate::poller::{PollHooks, WaitOptions, WebhookPoller};
use crate::protocol::OperationType;

type ProgressCallback = Arc<dyn Fn(Value) + Send + Sync>;
type EndCallback = Box<dyn FnOnce(Value) + Send>;
type ErrorCallback = Box<dyn FnOnce(Error) + Send>;

/// What a dispatched command turned out to be.
#[derive(Debug)]
pub enum CallOutcome {
    /// The command ran synchronously; this is its final result.
    Sync(Value),
    /// The command is long-running; subscribe on the handle for its events.
    Deferred(DeferredCall),
}

impl CallOutcome {
    pub fn into_sync(self) -> Option<Value> {
        match self {
            CallOutcome::Sync(value) => Some(value),
            CallOutcome::Deferred(_) => None,
        }
    }

    pub fn into_deferred(self) -> Option<DeferredCall> {
        match self {
            CallOutcome::Sync(_) => None,
            CallOutcome::Deferred(handle) => Some(handle),
        }
    }
}

struct HandleState {
    operation_type: OperationType,
    call_id: Option<String>,
    infinite: Option<bool>,
    max_attempts: Option<u32>,
    /// Terminal value or error delivered. Resolving with the deferred handle
    /// is not terminal.
    settled: bool,
    settle_tx: Option<oneshot::Sender<Result<CallOutcome, Error>>>,
    result: Option<Value>,
    progress: Option<ProgressCallback>,
    end: Option<EndCallback>,
    error: Option<ErrorCallback>,
}

pub(crate) struct HandleCore {
    state: Mutex<HandleState>,
}

impl HandleCore {
    fn new(settle_tx: oneshot::Sender<Result<CallOutcome, Error>>) -> Self {
        Self {
            state: Mutex::new(HandleState {
                operation_type: OperationType::Sync,
                call_id: None,
                infinite: None,
                max_attempts: None,
                settled: false,
                settle_tx: Some(settle_tx),
                result: None,
                progress: None,
                end: None,
                error: None,
            }),
        }
    }

    fn register_progress(&self, callback: impl Fn(Value) + Send + Sync + 'static) {
        self.state.lock().progress = Some(Arc::new(callback));
    }

    fn register_end(&self, callback: impl FnOnce(Value) + Send + 'static) {
        self.state.lock().end = Some(Box::new(callback));
    }

    fn register_error(&self, callback: impl FnOnce(Error) + Send + 'static) {
        self.state.lock().error = Some(Box::new(callback));
    }

    fn set_infinite(&self, infinite: bool) {
        self.state.lock().infinite = Some(infinite);
    }

    fn set_max_attempts(&self, max_attempts: u32) {
        self.state.lock().max_attempts = Some(max_attempts);
    }

    fn call_id(&self) -> Option<String> {
        self.state.lock().call_id.clone()
    }

    fn result(&self) -> Option<Value> {
        self.state.lock().result.clone()
    }

    /// Settle with a final value. For long-running operations the awaitable
    /// already resolved with the deferred handle, so only the cache is
    /// updated.
    pub(crate) fn resolve(&self, value: Value) {
        let settle_tx = {
            let mut state = self.state.lock();
            if state.settled {
                return;
            }
            state.settled = true;
            state.result = Some(value.clone());
            if state.operation_type.is_long_running() {
                None
            } else {
                state.settle_tx.take()
            }
        };
        if let Some(tx) = settle_tx {
            let _ = tx.send(Ok(CallOutcome::Sync(value)));
        }
    }

    /// Settle with an error. The registered error callback runs first, then
    /// the awaitable is rejected (when it has not already resolved with the
    /// deferred handle). Later settlement attempts are ignored.
    pub(crate) fn reject(&self, err: Error) {
        let (callback, settle_tx) = {
            let mut state = self.state.lock();
            if state.settled {
                return;
            }
            state.settled = true;
            (state.error.take(), state.settle_tx.take())
        };
        if let Some(callback) = callback {
            let panicked = catch_unwind(AssertUnwindSafe(|| callback(err.clone())));
            if let Err(panic) = panicked {
                error!(?panic, "error callback panicked");
            }
        }
        if let Some(tx) = settle_tx {
            let _ = tx.send(Err(err));
        }
    }

    pub(crate) fn upgrade_operation_type(&self, operation_type: OperationType) {
        let mut state = self.state.lock();
        debug!(
            from = ?state.operation_type,
            to = ?operation_type,
            "operation type revealed by backend"
        );
        state.operation_type = operation_type;
    }

    /// Record the call identifier of a long-running operation and resolve the
    /// awaitable with the deferred handle.
    pub(crate) fn assign_call_id(this: &Arc<Self>, call_id: String) {
        let settle_tx = {
            let mut state = this.state.lock();
            state.call_id = Some(call_id.clone());
            if state.operation_type.is_long_running() {
                state.settle_tx.take()
            } else {
                None
            }
        };
        debug!(%call_id, "call identifier assigned");
        if let Some(tx) = settle_tx {
            let _ = tx.send(Ok(CallOutcome::Deferred(DeferredCall {
                core: this.clone(),
            })));
        }
    }

    /// Mark the poll outcome on the handle. The end callback has already run
    /// by the time this is called; the cached value is informational.
    fn complete(&self, value: Value) {
        let mut state = self.state.lock();
        if state.settled {
            return;
        }
        state.settled = true;
        state.result = Some(value);
    }

    /// Drive the webhook poll cycle for this call and feed its events into
    /// the registered callbacks. Callbacks are looked up at event time, so
    /// registrations made after polling started still receive later events.
    pub(crate) async fn begin_polling(self: Arc<Self>, poller: WebhookPoller) {
        let (call_id, options) = {
            let state = self.state.lock();
            let Some(call_id) = state.call_id.clone() else {
                return;
            };
            (
                call_id,
                WaitOptions {
                    infinite: state.infinite.unwrap_or(true),
                    max_attempts: state.max_attempts,
                },
            )
        };

        let hooks = PollHooks {
            on_progress: Some(Box::new({
                let core = self.clone();
                move |progress| {
                    let callback = core.state.lock().progress.clone();
                    if let Some(callback) = callback {
                        callback(progress);
                    }
                }
            })),
            on_end: Some(Box::new({
                let core = self.clone();
                move |value| {
                    let callback = core.state.lock().end.take();
                    if let Some(callback) = callback {
                        callback(value);
                    }
                }
            })),
            on_error: Some(Box::new({
                let core = self.clone();
                move |err| core.reject(err)
            })),
        };

        match poller.wait_for_result(&call_id, options, hooks).await {
            Ok(value) => self.complete(value),
            // The error hook already delivered the rejection.
            Err(_) => {}
        }
    }
}

/// Handle returned synchronously by a dispatch.
///
/// Await it to learn the command's execution mode, or register callbacks up
/// front; both work regardless of which mode the backend reveals.
pub struct CallHandle {
    core: Arc<HandleCore>,
    settle_rx: oneshot::Receiver<Result<CallOutcome, Error>>,
}

impl CallHandle {
    pub(crate) fn new() -> Self {
        let (settle_tx, settle_rx) = oneshot::channel();
        Self {
            core: Arc::new(HandleCore::new(settle_tx)),
            settle_rx,
        }
    }

    pub(crate) fn core(&self) -> Arc<HandleCore> {
        self.core.clone()
    }

    /// Register a progress callback. Only long-running operations report
    /// progress.
    pub fn on_progress(&self, callback: impl Fn(Value) + Send + Sync + 'static) -> &Self {
        self.core.register_progress(callback);
        self
    }

    /// Register an end callback, invoked with the final result of a
    /// long-running operation.
    pub fn on_end(&self, callback: impl FnOnce(Value) + Send + 'static) -> &Self {
        self.core.register_end(callback);
        self
    }

    /// Register an error callback, invoked at most once, ahead of the
    /// awaitable's rejection.
    pub fn on_error(&self, callback: impl FnOnce(Error) + Send + 'static) -> &Self {
        self.core.register_error(callback);
        self
    }

    /// Remove (or restore) the poll attempt ceiling. Takes effect if called
    /// before the backend assigns the call identifier; read once at poll
    /// start.
    pub fn set_infinite(&self, infinite: bool) -> &Self {
        self.core.set_infinite(infinite);
        self
    }

    /// Bound the poll cycle to `max_attempts` attempts. Same timing caveat as
    /// [`set_infinite`](Self::set_infinite).
    pub fn set_max_attempts(&self, max_attempts: u32) -> &Self {
        self.core.set_max_attempts(max_attempts);
        self
    }

    /// Call identifier, once the backend has assigned one.
    pub fn call_id(&self) -> Option<String> {
        self.core.call_id()
    }

    /// Cached result. Non-authoritative; await the handle or use
    /// [`on_end`](Self::on_end) for the completion signal.
    pub fn result(&self) -> Option<Value> {
        self.core.result()
    }
}

impl IntoFuture for CallHandle {
    type Output = Result<CallOutcome, Error>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        let CallHandle { core, settle_rx } = self;
        Box::pin(async move {
            // Keep the core alive so the settlement sender cannot drop while
            // we wait.
            let _core = core;
            match settle_rx.await {
                Ok(outcome) => outcome,
                // A cancelled cycle never settles; its waiters stay pending.
                Err(_) => std::future::pending().await,
            }
        })
    }
}

/// Subscription handle for a long-running operation.
///
/// Not awaitable: the awaitable side of the call already resolved when this
/// handle was produced.
#[derive(Clone)]
pub struct DeferredCall {
    core: Arc<HandleCore>,
}

impl DeferredCall {
    pub fn on_progress(&self, callback: impl Fn(Value) + Send + Sync + 'static) -> &Self {
        self.core.register_progress(callback);
        self
    }

    pub fn on_end(&self, callback: impl FnOnce(Value) + Send + 'static) -> &Self {
        self.core.register_end(callback);
        self
    }

    pub fn on_error(&self, callback: impl FnOnce(Error) + Send + 'static) -> &Self {
        self.core.register_error(callback);
        self
    }

    pub fn call_id(&self) -> Option<String> {
        self.core.call_id()
    }

    /// Cached result of the completed operation, if it has completed.
    /// Non-authoritative; [`on_end`](Self::on_end) is the completion signal.
    pub fn result(&self) -> Option<Value> {
        self.core.result()
    }
}

impl std::fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCall")
            .field("call_id", &self.call_id())
            .finish()
    }
}
