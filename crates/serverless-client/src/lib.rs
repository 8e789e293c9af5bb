//! Client for a serverless command backend.
//!
//! Commands are dispatched over HTTP; the backend may answer synchronously or
//! defer the work to a long-running job named by a call identifier, in which
//! case the result is delivered by long-polling a webhook endpoint. The
//! execution mode is only revealed by the backend's first response, so a
//! single dispatch surface covers both:
//!
//! ```ignore
//! use serverless_client::{CallOutcome, ClientConfig, ServerlessClient};
//! use serde_json::json;
//!
//! let config = ClientConfig::new("user-1", "https://host.example.com", "svc-1", "inventory");
//! let client = ServerlessClient::connect(config).await?;
//!
//! match client.call("reindex", vec![json!("catalog")]).await? {
//!     CallOutcome::Sync(value) => println!("done: {value}"),
//!     CallOutcome::Deferred(job) => {
//!         job.on_progress(|p| println!("progress: {p}"))
//!             .on_end(|result| println!("finished: {result}"))
//!             .on_error(|err| eprintln!("failed: {err}"));
//!     }
//! }
//! ```

mod client;
mod config;
mod error;
mod handle;
mod pending;
mod poller;
mod protocol;

pub use client::ServerlessClient;
pub use config::{ClientConfig, default_base_url};
pub use error::{Error, Result};
pub use handle::{CallHandle, CallOutcome, DeferredCall};
pub use poller::{PollHooks, WaitOptions, WebhookPoller};
pub use protocol::{
    Command, DispatchResponse, OperationType, PollPayload, PollStatus, ReadyResponse,
};
