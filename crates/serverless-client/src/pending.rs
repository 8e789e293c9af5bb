//! Queue of dispatch attempts deferred until the backend is ready.

use std::collections::VecDeque;

use futures::future::BoxFuture;
use parking_lot::Mutex;

/// A retryable dispatch attempt, boxed so it can be stored and replayed.
pub(crate) type PendingCall = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
pub(crate) struct PendingCallQueue {
    queue: Mutex<VecDeque<PendingCall>>,
}

impl PendingCallQueue {
    pub(crate) fn push(&self, call: PendingCall) {
        self.queue.lock().push_back(call);
    }

    /// Remove and return all queued calls, in enqueue order.
    pub(crate) fn drain(&self) -> Vec<PendingCall> {
        self.queue.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }
}
