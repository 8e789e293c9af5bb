//! Configuration for the serverless command client.

use std::time::Duration;

use serde_json::Value;

/// Base URL for local development, used when the caller has no deployment
/// origin to hand in.
pub fn default_base_url() -> &'static str {
    "http://127.0.0.1:8080"
}

/// Configuration for connecting to a serverless command backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User on whose behalf commands are dispatched.
    pub user_id: String,

    /// Deployment origin, e.g. "https://host.example.com". The command,
    /// readiness, and webhook URLs are all derived from it.
    pub endpoint: String,

    /// Identifier of the serverless deployment to address.
    pub serverless_id: String,

    /// Plugin that owns the dispatched commands.
    pub plugin_name: String,

    /// Session identifier, sent as a `Cookie: sessionId=...` header and
    /// included in each command's options.
    pub session_id: Option<String>,

    /// Extra options forwarded verbatim in every command envelope.
    pub command_options: serde_json::Map<String, Value>,

    /// Delay between poll attempts after a failed webhook request.
    pub poll_interval: Duration,

    /// Per-request timeout for webhook long-poll GETs.
    pub connection_timeout: Duration,

    /// Delay between readiness probe attempts.
    pub ready_probe_interval: Duration,

    /// Readiness probe budget before construction fails.
    pub ready_max_attempts: u32,
}

impl ClientConfig {
    pub fn new(
        user_id: impl Into<String>,
        endpoint: impl Into<String>,
        serverless_id: impl Into<String>,
        plugin_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            endpoint: endpoint.into(),
            serverless_id: serverless_id.into(),
            plugin_name: plugin_name.into(),
            session_id: None,
            command_options: serde_json::Map::new(),
            poll_interval: Duration::from_millis(1000),
            connection_timeout: Duration::from_secs(30),
            ready_probe_interval: Duration::from_secs(1),
            ready_max_attempts: 30,
        }
    }

    /// Set the session identifier.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Add an option forwarded in every command envelope.
    pub fn command_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.command_options.insert(key.into(), value);
        self
    }

    /// Set the delay between poll attempts after a failure.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-request timeout for webhook GETs.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the delay between readiness probe attempts.
    pub fn ready_probe_interval(mut self, interval: Duration) -> Self {
        self.ready_probe_interval = interval;
        self
    }

    /// Set the readiness probe budget.
    pub fn ready_max_attempts(mut self, attempts: u32) -> Self {
        self.ready_max_attempts = attempts;
        self
    }

    pub(crate) fn base_endpoint(&self) -> String {
        self.endpoint.trim_end_matches('/').to_string()
    }

    pub(crate) fn command_url(&self) -> String {
        format!(
            "{}/proxy/executeCommand/{}",
            self.base_endpoint(),
            self.serverless_id
        )
    }

    pub(crate) fn ready_url(&self) -> String {
        format!("{}/proxy/ready/{}", self.base_endpoint(), self.serverless_id)
    }

    pub(crate) fn webhook_url(&self) -> String {
        format!("{}/internalWebhook", self.base_endpoint())
    }
}
