#![allow(dead_code)]

use std::future::IntoFuture;
use std::time::Duration;

use serde_json::json;
use serverless_client::ClientConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SERVERLESS_ID: &str = "svc-1";

/// Mount a readiness probe that always reports ready.
pub async fn mount_ready(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/proxy/ready/{SERVERLESS_ID}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"status": "ready"}})),
        )
        .mount(server)
        .await;
}

/// Client configuration pointed at the mock server, with intervals shrunk so
/// retry-heavy scenarios finish quickly.
pub fn test_config(server: &MockServer) -> ClientConfig {
    ClientConfig::new("user-1", server.uri(), SERVERLESS_ID, "test-plugin")
        .poll_interval(Duration::from_millis(20))
        .ready_probe_interval(Duration::from_millis(20))
}

/// Await anything awaitable, panicking if the scenario takes suspiciously
/// long.
pub async fn within<F: IntoFuture>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future.into_future())
        .await
        .expect("scenario timed out")
}
