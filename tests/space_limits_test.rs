// ABOUTME: Integration tests for space-level tunables and conveniences
// ABOUTME: Default chat recipients, heartbeat, idle reaper, frame size limit

//! Space configuration knobs observed end to end.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_default_chat_recipient_replaces_broadcast() {
    let mut config = space_with(vec![
        participant("user", vec![cap("chat")]),
        participant("assistant", vec![cap("chat")]),
        participant("observer", vec![cap("chat")]),
    ]);
    config.participants[0].default_chat_to = Some(vec!["assistant".to_string()]);
    let space = TestSpace::start(config).await;

    let mut user = TestClient::join(&space, "user").await;
    let mut assistant = TestClient::join(&space, "assistant").await;
    let mut observer = TestClient::join(&space, "observer").await;

    // An empty `to` from this participant goes to its configured recipient,
    // not to the whole space.
    user.send(wire("chat", vec![], json!({"text": "hello"}))).await;
    let chat = assistant.recv_kind("chat").await;
    assert_eq!(chat.to, vec!["assistant".to_string()]);
    observer.assert_no_kind("chat", Duration::from_millis(300)).await;

    // Explicit recipients still win.
    user.send(wire("chat", vec!["observer"], json!({"text": "direct"})))
        .await;
    let chat = observer.recv_kind("chat").await;
    assert_eq!(chat.payload["text"], json!("direct"));
}

#[tokio::test]
async fn test_heartbeat_broadcasts_on_interval() {
    let mut config = space_with(vec![participant("alice", vec![cap("chat")])]);
    config.limits.heartbeat_interval_secs = Some(1);
    let space = TestSpace::start(config).await;

    let mut alice = TestClient::join(&space, "alice").await;
    let beat = alice.recv_kind("system/heartbeat").await;
    assert_eq!(beat.from, "system");
    // The timer re-arms.
    alice.recv_kind("system/heartbeat").await;
}

#[tokio::test]
async fn test_idle_participant_is_reaped() {
    let mut config = space_with(vec![
        participant("sleepy", vec![cap("chat")]),
        participant("watcher", vec![cap("chat")]),
    ]);
    config.limits.idle_timeout_secs = Some(1);
    let space = TestSpace::start(config).await;

    let _sleepy = TestClient::join(&space, "sleepy").await;
    let mut watcher = TestClient::join(&space, "watcher").await;

    // The watcher keeps itself alive; sleepy says nothing.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        watcher
            .send(wire("chat", vec!["nobody"], json!({"text": "ping"})))
            .await;
    }

    let leave = watcher.recv_kind("system/presence").await;
    assert_eq!(leave.payload["event"], json!("leave"));
    assert_eq!(leave.payload["participant"]["id"], json!("sleepy"));
}

#[tokio::test]
async fn test_oversized_stream_frame_is_rejected() {
    let mut config = space_with(vec![
        participant("producer", vec![cap("stream/**")]),
        participant("viewer", vec![cap("chat")]),
    ]);
    config.limits.max_frame_bytes = 64;
    let space = TestSpace::start(config).await;

    let mut producer = TestClient::join(&space, "producer").await;
    let mut viewer = TestClient::join(&space, "viewer").await;

    producer
        .send(wire("stream/request", vec![], json!({"direction": "upload"})))
        .await;
    let open = producer.recv_kind("stream/open").await;
    let stream_id = open.payload["stream_id"].as_str().unwrap().to_string();
    viewer.recv_kind("stream/open").await;

    producer.send_stream(&stream_id, &[0u8; 256]).await;
    let error = producer.recv_kind("system/error").await;
    assert_eq!(error.payload["error"], json!("InvalidOperation"));
    viewer.assert_no_stream(&stream_id, Duration::from_millis(200)).await;

    // Under the limit, frames pass.
    producer.send_stream(&stream_id, &[7u8; 32]).await;
    assert_eq!(viewer.recv_stream(&stream_id).await, vec![7u8; 32]);
}

#[tokio::test]
async fn test_reported_status_is_cached_into_welcomes() {
    let space = TestSpace::start(space_with(vec![
        participant("bot", vec![cap("participant/status")]),
        participant("late", vec![cap("chat")]),
    ]))
    .await;

    let mut bot = TestClient::join(&space, "bot").await;
    bot.send(wire(
        "participant/status",
        vec![],
        json!({"tokens": 4200, "max_tokens": 8000}),
    ))
    .await;
    // Give the router a beat to process the broadcast-less status.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut late = TestClient::join_raw(&space, "late-token", Some("late")).await;
    let welcome = late.recv_envelope().await;
    let participants = welcome.payload["participants"].as_array().unwrap();
    assert_eq!(participants[0]["id"], json!("bot"));
    assert_eq!(participants[0]["status"]["tokens"], json!(4200));
}
