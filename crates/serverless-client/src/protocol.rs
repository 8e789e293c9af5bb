//! Wire types for the command endpoint and the webhook long-poll endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command envelope, sent as the JSON body of the dispatch request.
///
/// Immutable once built: a retried dispatch re-sends the identical envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// User on whose behalf the command runs.
    pub for_whom: String,
    /// Command name.
    pub name: String,
    /// Plugin that owns the command.
    pub plugin_name: String,
    /// Positional arguments, passed through verbatim.
    pub args: Vec<Value>,
    /// Free-form per-call options forwarded to the backend.
    pub options: serde_json::Map<String, Value>,
}

/// Execution mode declared by the backend in its first response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    /// The result in the dispatch response is final.
    Sync,
    /// The backend is restarting; the dispatch must be retried once it is
    /// ready again.
    Restart,
    SlowLambda,
    ObservableLambda,
    CmbSlowLambda,
    CmbObservableLambda,
}

impl OperationType {
    /// Whether this operation delivers its result through the webhook rather
    /// than in the dispatch response.
    pub fn is_long_running(self) -> bool {
        !matches!(self, OperationType::Sync | OperationType::Restart)
    }
}

/// Body of a successful dispatch response.
///
/// For [`OperationType::Sync`] the `result` is the final value; for
/// long-running types it is the call identifier to poll.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub operation_type: OperationType,
    #[serde(default)]
    pub result: Value,
}

/// Status field of a webhook poll payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    Pending,
    Completed,
    Error,
    Expired,
}

/// Body of a webhook long-poll response.
#[derive(Debug, Clone, Deserialize)]
pub struct PollPayload {
    pub status: PollStatus,
    #[serde(default)]
    pub result: Value,
    /// Progress report; may accompany `pending` and, as a last report,
    /// `completed`.
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

/// Body of the readiness probe response.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyResponse {
    #[serde(default)]
    pub result: Option<ReadyStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadyStatus {
    pub status: String,
}

impl ReadyResponse {
    pub fn is_ready(&self) -> bool {
        self.result.as_ref().is_some_and(|r| r.status == "ready")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn command_envelope_uses_wire_field_names() {
        let command = Command {
            for_whom: "user-1".to_string(),
            name: "listItems".to_string(),
            plugin_name: "inventory".to_string(),
            args: vec![json!(7)],
            options: serde_json::Map::new(),
        };

        let encoded = serde_json::to_value(&command).unwrap();
        assert_eq!(
            encoded,
            json!({
                "forWhom": "user-1",
                "name": "listItems",
                "pluginName": "inventory",
                "args": [7],
                "options": {}
            })
        );
    }

    #[test]
    fn operation_types_use_camel_case_wire_names() {
        let parsed: DispatchResponse =
            serde_json::from_value(json!({"operationType": "slowLambda", "result": "call-3"}))
                .unwrap();
        assert_eq!(parsed.operation_type, OperationType::SlowLambda);
        assert_eq!(parsed.result, json!("call-3"));

        for (name, expected) in [
            ("sync", OperationType::Sync),
            ("restart", OperationType::Restart),
            ("observableLambda", OperationType::ObservableLambda),
            ("cmbSlowLambda", OperationType::CmbSlowLambda),
            ("cmbObservableLambda", OperationType::CmbObservableLambda),
        ] {
            let parsed: OperationType = serde_json::from_value(json!(name)).unwrap();
            assert_eq!(parsed, expected);
        }
    }

    #[test]
    fn restart_response_may_omit_result() {
        let parsed: DispatchResponse =
            serde_json::from_value(json!({"operationType": "restart"})).unwrap();
        assert_eq!(parsed.operation_type, OperationType::Restart);
        assert_eq!(parsed.result, Value::Null);
    }

    #[test]
    fn long_running_classification() {
        assert!(!OperationType::Sync.is_long_running());
        assert!(!OperationType::Restart.is_long_running());
        assert!(OperationType::SlowLambda.is_long_running());
        assert!(OperationType::ObservableLambda.is_long_running());
        assert!(OperationType::CmbSlowLambda.is_long_running());
        assert!(OperationType::CmbObservableLambda.is_long_running());
    }

    #[test]
    fn poll_payload_variants() {
        let pending: PollPayload =
            serde_json::from_value(json!({"status": "pending", "progress": {"pct": 40}})).unwrap();
        assert_eq!(pending.status, PollStatus::Pending);
        assert_eq!(pending.progress, Some(json!({"pct": 40})));

        let completed: PollPayload =
            serde_json::from_value(json!({"status": "completed", "result": "done"})).unwrap();
        assert_eq!(completed.status, PollStatus::Completed);
        assert_eq!(completed.result, json!("done"));
        assert_eq!(completed.progress, None);

        let errored: PollPayload = serde_json::from_value(
            json!({"status": "error", "message": "boom", "code": "E_FAIL", "details": {"step": 2}}),
        )
        .unwrap();
        assert_eq!(errored.status, PollStatus::Error);
        assert_eq!(errored.message.as_deref(), Some("boom"));
        assert_eq!(errored.code.as_deref(), Some("E_FAIL"));

        let expired: PollPayload = serde_json::from_value(json!({"status": "expired"})).unwrap();
        assert_eq!(expired.status, PollStatus::Expired);
    }

    #[test]
    fn readiness_probe_body() {
        let ready: ReadyResponse =
            serde_json::from_value(json!({"result": {"status": "ready"}})).unwrap();
        assert!(ready.is_ready());

        let starting: ReadyResponse =
            serde_json::from_value(json!({"result": {"status": "starting"}})).unwrap();
        assert!(!starting.is_ready());

        let empty: ReadyResponse = serde_json::from_value(json!({})).unwrap();
        assert!(!empty.is_ready());
    }
}
