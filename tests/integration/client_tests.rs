//! End-to-end command tests against the in-memory fake server.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use presence_ipc::protocol::codec::Opcode;
use presence_ipc::{Activity, AppError, Client, ConnectionState};

use super::test_helpers::{connected_pair, ready_client, spawn_update, test_config};

// ── SET_ACTIVITY ─────────────────────────────────────────────

#[tokio::test]
async fn update_activity_sends_pruned_payload_and_returns_reply() {
    let (client, mut server) = ready_client(test_config()).await;
    assert_eq!(client.state(), ConnectionState::Ready);

    let pending = spawn_update(&client, "testing");

    let frame = server.recv().await;
    assert_eq!(frame.kind(), Some(Opcode::Message));
    let request: serde_json::Value = frame.parse().expect("json");
    assert_eq!(request["cmd"], "SET_ACTIVITY");
    assert_eq!(request["args"]["pid"], std::process::id());
    assert_eq!(
        request["args"]["activity"],
        json!({"details": "testing", "instance": true})
    );
    assert!(request["nonce"].is_string(), "nonce must be present");

    server
        .reply_to(&request, json!({"details": "testing"}))
        .await;

    let reply = pending.await.expect("task").expect("reply");
    assert_eq!(reply.cmd(), Some("SET_ACTIVITY"));
    assert_eq!(reply.data, Some(json!({"details": "testing"})));
}

#[tokio::test]
async fn update_activity_for_uses_given_pid() {
    let (client, mut server) = ready_client(test_config()).await;

    let task = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let activity = Activity::new()
                .state("In lobby")
                .party(Some("p1".into()), Some([1, 4]));
            client.update_activity_for(4242, &activity).await
        })
    };

    let request = server.recv_json().await;
    assert_eq!(request["args"]["pid"], 4242);
    assert_eq!(
        request["args"]["activity"],
        json!({
            "state": "In lobby",
            "party": {"id": "p1", "size": [1, 4]},
            "instance": true
        })
    );
    server.reply_to(&request, json!({})).await;
    task.await.expect("task").expect("reply");
}

#[tokio::test]
async fn clear_activity_sends_null_activity() {
    let (client, mut server) = ready_client(test_config()).await;

    let task = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.clear_activity(77).await })
    };

    let request = server.recv_json().await;
    assert_eq!(request["cmd"], "SET_ACTIVITY");
    assert_eq!(request["args"], json!({"pid": 77, "activity": null}));
    server.reply_to(&request, serde_json::Value::Null).await;
    task.await.expect("task").expect("reply");
}

#[tokio::test]
async fn nonces_are_unique_per_request() {
    let (client, mut server) = ready_client(test_config()).await;
    let mut seen = HashSet::new();

    for i in 0..5 {
        let pending = spawn_update(&client, &format!("round {i}"));
        let request = server.recv_json().await;
        let nonce = request["nonce"].as_str().expect("nonce").to_owned();
        assert!(seen.insert(nonce), "nonce reused on round {i}");
        server.reply_to(&request, json!({})).await;
        pending.await.expect("task").expect("reply");
    }
}

// ── SUBSCRIBE / UNSUBSCRIBE ──────────────────────────────────

#[tokio::test]
async fn subscribe_sends_uppercase_event_and_args() {
    let (client, mut server) = ready_client(test_config()).await;

    let task = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .subscribe(" activity_join ", json!({"guild_id": "9"}))
                .await
        })
    };

    let request = server.recv_json().await;
    assert_eq!(request["cmd"], "SUBSCRIBE");
    assert_eq!(request["evt"], "ACTIVITY_JOIN");
    assert_eq!(request["args"], json!({"guild_id": "9"}));
    server
        .reply_to(&request, json!({"evt": "ACTIVITY_JOIN"}))
        .await;

    let ack = task.await.expect("task").expect("ack");
    assert_eq!(ack.cmd(), Some("SUBSCRIBE"));
}

#[tokio::test]
async fn blank_event_name_is_rejected_locally() {
    let (client, _server) = ready_client(test_config()).await;

    let err = client.subscribe("   ", json!({})).await.unwrap_err();
    assert!(matches!(err, AppError::ArgumentError(_)), "got {err:?}");
}

// ── Lifecycle guards ─────────────────────────────────────────

#[tokio::test]
async fn commands_before_connect_are_refused() {
    let (connector, _server) = connected_pair();
    let client = Client::with_connector(test_config(), connector);

    let err = client
        .update_activity(&Activity::new().details("early"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AppError::ConnectionClosed("cannot send SET_ACTIVITY while disconnected".into())
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn connect_twice_is_an_argument_error() {
    let (client, _server) = ready_client(test_config()).await;

    let err = client.connect().await.unwrap_err();
    assert_eq!(
        err,
        AppError::ArgumentError("cannot connect while ready".into())
    );
    assert_eq!(client.state(), ConnectionState::Ready);
}

#[tokio::test]
async fn ready_info_and_client_id_are_exposed() {
    let (client, _server) = ready_client(test_config()).await;

    assert_eq!(client.client_id(), "123456");
    let ready = client.ready_info().expect("ready info");
    assert_eq!(ready.user["username"], "tester");
    assert_eq!(ready.config["cdn_host"], "cdn.example.net");
}

#[tokio::test]
async fn state_changes_observe_ready_then_closed() {
    let (client, _server) = ready_client(test_config()).await;
    let mut states = client.state_changes();
    assert_eq!(*states.borrow_and_update(), ConnectionState::Ready);

    client.close().await.expect("close");

    states.changed().await.expect("state sender alive");
    assert_eq!(*states.borrow(), ConnectionState::Closed);
}
