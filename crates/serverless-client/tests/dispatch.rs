//! Dispatch-side behavior: synchronous results, error classification, the
//! session cookie, and the restart/requeue path.

mod common;

use common::{SERVERLESS_ID, mount_ready, test_config, within};
use pretty_assertions::assert_eq;
use serde_json::json;
use serverless_client::{Error, ServerlessClient};
use tokio::sync::oneshot;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn command_path() -> String {
    format!("/proxy/executeCommand/{SERVERLESS_ID}")
}

#[tokio::test]
async fn sync_dispatch_resolves_with_the_server_result() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    Mock::given(method("PUT"))
        .and(path(command_path()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"operationType": "sync", "result": 42})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ServerlessClient::connect(test_config(&server)).await.unwrap();
    let outcome = within(client.call("add", vec![json!(1), json!(2)]))
        .await
        .unwrap();
    assert_eq!(outcome.into_sync(), Some(json!(42)));
}

#[tokio::test]
async fn envelope_carries_wire_fields_and_session_cookie() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    Mock::given(method("PUT"))
        .and(path(command_path()))
        .and(header("Cookie", "sessionId=sess-9"))
        .and(body_json(json!({
            "forWhom": "user-1",
            "name": "ping",
            "pluginName": "test-plugin",
            "args": [1, 2],
            "options": {"sessionId": "sess-9"}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"operationType": "sync", "result": "pong"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server).session_id("sess-9");
    let client = ServerlessClient::connect(config).await.unwrap();
    let outcome = within(client.call("ping", vec![json!(1), json!(2)]))
        .await
        .unwrap();
    assert_eq!(outcome.into_sync(), Some(json!("pong")));
}

#[tokio::test]
async fn structured_backend_error_rejects_the_handle() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    Mock::given(method("PUT"))
        .and(path(command_path()))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "statusCode": 500,
            "result": {"message": "plugin exploded", "stack": "at line 3"}
        })))
        .mount(&server)
        .await;

    let client = ServerlessClient::connect(test_config(&server)).await.unwrap();
    let (error_tx, error_rx) = oneshot::channel();

    let handle = client.call("explode", vec![]);
    handle.on_error(move |err| {
        let _ = error_tx.send(err);
    });

    let err = within(handle).await.unwrap_err();
    match &err {
        Error::Backend {
            message,
            stack,
            status,
        } => {
            assert_eq!(message, "plugin exploded");
            assert_eq!(stack.as_deref(), Some("at line 3"));
            assert_eq!(*status, 500);
        }
        other => panic!("expected Backend error, got {other:?}"),
    }
    assert_eq!(err.code(), "STRUCTURED_BACKEND_ERROR");

    // The callback saw the same failure, ahead of the rejection.
    let callback_err = within(error_rx).await.unwrap();
    assert_eq!(callback_err.code(), "STRUCTURED_BACKEND_ERROR");
}

#[tokio::test]
async fn unstructured_failure_maps_to_generic_http_error() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    Mock::given(method("PUT"))
        .and(path(command_path()))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let client = ServerlessClient::connect(test_config(&server)).await.unwrap();
    let err = within(client.call("anything", vec![])).await.unwrap_err();
    match err {
        Error::Http { status } => assert_eq!(status, 502),
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn restart_requeues_and_the_retried_attempt_settles_the_same_handle() {
    let server = MockServer::start().await;
    mount_ready(&server).await;
    // First dispatch: the backend asks for a restart. Once that mock is
    // exhausted the retried dispatch reaches the second one.
    Mock::given(method("PUT"))
        .and(path(command_path()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"operationType": "restart"})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(command_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"operationType": "sync", "result": "after-restart"}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let client = ServerlessClient::connect(test_config(&server)).await.unwrap();
    let outcome = within(client.call("job", vec![])).await.unwrap();
    assert_eq!(outcome.into_sync(), Some(json!("after-restart")));
}

#[tokio::test]
async fn connect_fails_with_ready_timeout_when_backend_never_reports_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/proxy/ready/{SERVERLESS_ID}")))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let config = test_config(&server).ready_max_attempts(2);
    let err = ServerlessClient::connect(config).await.unwrap_err();
    match err {
        Error::ReadyTimeout { attempts } => assert_eq!(attempts, 2),
        other => panic!("expected ReadyTimeout, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_retries_until_the_backend_reports_ready() {
    let server = MockServer::start().await;
    // Not ready twice, then ready.
    Mock::given(method("GET"))
        .and(path(format!("/proxy/ready/{SERVERLESS_ID}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"status": "starting"}})),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_ready(&server).await;

    assert!(ServerlessClient::connect(test_config(&server)).await.is_ok());
}

#[tokio::test]
async fn empty_endpoint_is_rejected_up_front() {
    let config = serverless_client::ClientConfig::new("user-1", "", SERVERLESS_ID, "test-plugin");
    let err = ServerlessClient::connect(config).await.unwrap_err();
    assert_eq!(err.code(), "NOT_CONFIGURED");
}
