use super::*;

fn request(command: &str, subcommand: Option<&str>, args: Option<Value>) -> Request {
    Request {
        command: command.to_string(),
        subcommand: subcommand.map(|s| s.to_string()),
        args,
        timestamp: Some("2025-01-01T00:00:00Z".to_string()),
    }
}

#[tokio::test]
async fn test_ping_outcome() {
    let response = dispatch(&request("ping", None, None)).await;
    assert_eq!(response["outcome"]["status"], "ok");
    assert!(response["outcome"]["elapsed_ms"].is_u64());
}

#[tokio::test]
async fn test_unknown_command_code() {
    let response = dispatch(&request("frobnicate", None, None)).await;
    assert_eq!(response["outcome"]["status"], "error");
    assert_eq!(response["outcome"]["code"], ERROR_UNKNOWN_COMMAND);
}

#[tokio::test]
async fn test_status_shape() {
    let response = dispatch(&request("status", None, None)).await;
    assert_eq!(response["outcome"]["status"], "ok");
    assert!(response["response"]["servers"].is_u64());
    assert!(response["response"]["cache_entries"].is_u64());
}

#[tokio::test]
async fn test_conf_get_whole_config() {
    let response = dispatch(&request("conf", Some("get"), None)).await;
    assert_eq!(response["outcome"]["status"], "ok");
    assert!(response["response"]["general"].is_object());
}

#[tokio::test]
async fn test_conf_get_unknown_key() {
    let args = json!({ "key": "general.frobnicate" });
    let response = dispatch(&request("conf", Some("get"), Some(args))).await;
    assert_eq!(response["outcome"]["code"], ERROR_CONF_GET_UNKNOWN_KEY);
}

#[tokio::test]
async fn test_conf_set_unknown_key() {
    let args = json!({ "key": "general.frobnicate", "value": 1 });
    let response = dispatch(&request("conf", Some("set"), Some(args))).await;
    assert_eq!(response["outcome"]["code"], ERROR_CONF_SET_UNKNOWN_KEY);
}

#[tokio::test]
async fn test_conf_set_restart_required() {
    let args = json!({ "key": "general.metrics_port", "value": 9999 });
    let response = dispatch(&request("conf", Some("set"), Some(args))).await;
    assert_eq!(
        response["outcome"]["code"],
        ERROR_CONF_SET_RESTART_REQUIRED
    );
}

#[test]
fn test_request_envelope_decodes() {
    let payload = serde_json::to_vec(&json!({
        "command": "conf",
        "subcommand": "get",
        "args": { "key": "general.blocking_timeout" },
        "timestamp": "2025-01-01T00:00:00Z",
    }))
    .unwrap();

    let request: Request = serde_json::from_slice(&payload).unwrap();
    assert_eq!(request.command, "conf");
    assert_eq!(request.subcommand.as_deref(), Some("get"));
}

#[test]
fn test_request_rejects_garbage() {
    assert!(serde_json::from_slice::<Request>(b"not json").is_err());
}
