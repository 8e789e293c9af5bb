//! Error type shared by dispatch and polling.

use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Any failure surfaced by the client.
///
/// Every variant carries owned data so the error is `Clone`: a poll outcome
/// is delivered both to the registered error callback and to every waiter on
/// the same call identifier.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Missing or invalid client configuration.
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// Non-2xx dispatch response without structured detail in the body.
    #[error("HTTP error, status {status}")]
    Http { status: u16 },

    /// Non-2xx dispatch response carrying `{result: {message, stack?}}`.
    #[error("{message}")]
    Backend {
        message: String,
        stack: Option<String>,
        status: u16,
    },

    /// The webhook reported `status = error` for a call.
    #[error("webhook reported an error for call {call_id}: {message}")]
    Webhook {
        call_id: String,
        message: String,
        code: Option<String>,
        details: Option<Value>,
    },

    /// Attempt budget exhausted without a terminal status.
    #[error("timed out waiting for result of call {call_id} after {attempts} attempts")]
    PollingTimeout { call_id: String, attempts: u32 },

    /// The webhook reported `status = expired`: the server-side process for
    /// this call is gone.
    #[error("call {call_id} expired on the server")]
    ProcessUnavailable { call_id: String },

    /// Circuit breaker tripped on a run of bad HTTP statuses.
    #[error(
        "server appears to be down: {consecutive_failures} consecutive failures, last status {last_status}"
    )]
    ServerDown {
        call_id: String,
        consecutive_failures: u32,
        last_status: u16,
    },

    /// Circuit breaker tripped on a run of transport errors.
    #[error(
        "persistent polling failures for call {call_id}: {message} ({consecutive_failures} consecutive attempts failed)"
    )]
    PersistentFailure {
        call_id: String,
        consecutive_failures: u32,
        message: String,
    },

    /// Attempt budget exhausted on transport errors rather than bad payloads.
    #[error("polling for call {call_id} failed after {attempts} attempts: {message}")]
    PollingFailed {
        call_id: String,
        attempts: u32,
        message: String,
    },

    /// The backend never reported ready within the probe budget. Fatal to
    /// client construction.
    #[error("server failed to become ready within {attempts} attempts")]
    ReadyTimeout { attempts: u32 },

    /// Request-level transport failure (connect, send, or body read).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A 2xx response whose body did not parse as the expected shape.
    #[error("invalid response body: {0}")]
    InvalidResponse(String),
}

impl Error {
    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        Error::Transport {
            message: err.to_string(),
        }
    }

    /// Stable tag for callers that match on error codes rather than variants.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotConfigured(_) => "NOT_CONFIGURED",
            Error::Http { .. } => "HTTP_ERROR",
            Error::Backend { .. } => "STRUCTURED_BACKEND_ERROR",
            Error::Webhook { .. } => "WEBHOOK_ERROR",
            Error::PollingTimeout { .. } => "POLLING_TIMEOUT",
            Error::ProcessUnavailable { .. } => "PROCESS_UNAVAILABLE",
            Error::ServerDown { .. } => "SERVER_DOWN",
            Error::PersistentFailure { .. } => "PERSISTENT_FAILURE",
            Error::PollingFailed { .. } => "POLLING_FAILED",
            Error::ReadyTimeout { .. } => "READY_TIMEOUT",
            Error::Transport { .. } => "TRANSPORT_ERROR",
            Error::InvalidResponse(_) => "INVALID_RESPONSE",
        }
    }
}
