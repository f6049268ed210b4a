//! Unit tests for the message envelope and handshake classification.

use serde_json::{json, Value};

use presence_ipc::models::message::{clear_activity_args, Hello, Message, SET_ACTIVITY, SUBSCRIBE};
use presence_ipc::protocol::handshake::interpret_reply;
use presence_ipc::AppError;

fn message(value: Value) -> Message {
    serde_json::from_value(value).expect("valid message")
}

#[test]
fn command_request_wire_shape() {
    let msg = Message::command(SUBSCRIBE, json!({}), "nonce-1".into()).with_event("ACTIVITY_JOIN");
    assert_eq!(
        serde_json::to_value(&msg).expect("serialize"),
        json!({"cmd": "SUBSCRIBE", "evt": "ACTIVITY_JOIN", "nonce": "nonce-1", "args": {}})
    );
}

#[test]
fn clear_args_keep_explicit_null() {
    let msg = Message::command(SET_ACTIVITY, clear_activity_args(12), "n".into());
    let raw = serde_json::to_value(&msg).expect("serialize");
    assert_eq!(raw["args"], json!({"pid": 12, "activity": null}));
    assert!(raw["args"].as_object().expect("object").contains_key("activity"));
}

#[test]
fn hello_payload() {
    let hello = serde_json::to_value(Hello::new("987")).expect("serialize");
    assert_eq!(hello, json!({"v": 1, "client_id": "987"}));
}

#[test]
fn extra_server_fields_are_ignored() {
    let msg = message(json!({"cmd": "DISPATCH", "evt": "READY", "data": {}, "extra": [1, 2]}));
    assert!(msg.is_dispatch());
    assert_eq!(msg.evt(), Some("READY"));
}

#[test]
fn error_message_prefers_data_message() {
    let msg = message(json!({"evt": "ERROR", "data": {"message": "inner"}, "message": "outer"}));
    assert!(msg.is_error());
    assert_eq!(msg.error_message(), "inner");

    let bare = message(json!({"evt": "ERROR"}));
    assert_eq!(bare.error_message(), "unknown error");
}

// ── Handshake reply classification ──────────────────────────────────────────

#[test]
fn ready_v1_yields_user_and_config() {
    let ready = interpret_reply(&message(json!({
        "cmd": "DISPATCH",
        "evt": "READY",
        "data": {"v": 1, "user": {"id": "1"}, "config": {"api_endpoint": "//x"}}
    })))
    .expect("ready");
    assert_eq!(ready.user, json!({"id": "1"}));
    assert_eq!(ready.config, json!({"api_endpoint": "//x"}));
}

#[test]
fn code_4000_without_message_still_invalid_client_id() {
    let err = interpret_reply(&message(json!({"code": 4000}))).unwrap_err();
    assert!(matches!(err, AppError::InvalidClientId(_)), "got {err:?}");
}

#[test]
fn unknown_code_without_message_mentions_code() {
    let err = interpret_reply(&message(json!({"code": 4004}))).unwrap_err();
    assert_eq!(
        err,
        AppError::ServerError("handshake refused with code 4004".into())
    );
}

#[test]
fn ready_without_version_is_mismatch() {
    let err = interpret_reply(&message(json!({"cmd": "DISPATCH", "evt": "READY", "data": {}})))
        .unwrap_err();
    assert!(matches!(err, AppError::ProtocolVersionMismatch(_)), "got {err:?}");
}

#[test]
fn reply_with_odd_code_and_message_types_still_parses() {
    let msg: Message = serde_json::from_str(
        r#"{"cmd":"SET_ACTIVITY","nonce":"n","code":"E1","message":{"x":1}}"#,
    )
    .expect("lenient parse");
    assert_eq!(msg.cmd(), Some(SET_ACTIVITY));
    assert!(msg.has_code());
    assert_eq!(msg.code(), None);
    assert_eq!(msg.text().as_deref(), Some(r#"{"x":1}"#));
    assert_eq!(msg.error_message(), r#"{"x":1}"#);
}

#[test]
fn null_code_is_not_a_refusal() {
    let ready = interpret_reply(&message(json!({
        "cmd": "DISPATCH",
        "evt": "READY",
        "code": null,
        "data": {"v": 1}
    })));
    assert!(ready.is_ok(), "got {ready:?}");
}
