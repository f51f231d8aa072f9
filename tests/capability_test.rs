// ABOUTME: Integration tests for capability denial and runtime grants
// ABOUTME: Covers denial reflections, pending grants, grant-ack promotion, revoke

//! Capability matching and the grant/revoke engine, end to end.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_denied_kind_is_reflected_not_routed() {
    let space = TestSpace::start(space_with(vec![
        participant("agent", vec![cap("mcp/proposal")]),
        participant("human", vec![cap("mcp/request"), cap("chat")]),
    ]))
    .await;
    let mut agent = TestClient::join(&space, "agent").await;
    let mut human = TestClient::join(&space, "human").await;

    agent
        .send(wire(
            "mcp/request",
            vec!["human"],
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call"}),
        ))
        .await;

    let error = agent.recv_kind("system/error").await;
    assert_eq!(error.payload["error"], json!("Forbidden"));
    assert_eq!(error.payload["attempted_kind"], json!("mcp/request"));
    // The denial names the capabilities the sender actually holds.
    assert_eq!(
        error.payload["your_capabilities"][0]["kind"],
        json!("mcp/proposal")
    );

    human.assert_no_kind("mcp/request", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_unknown_kind_without_capability_gets_unknown_kind_code() {
    let space = TestSpace::start(space_with(vec![
        participant("alice", vec![cap("chat")]),
        participant("bob", vec![cap("custom/**")]),
    ]))
    .await;
    let mut alice = TestClient::join(&space, "alice").await;
    let mut bob = TestClient::join(&space, "bob").await;

    alice
        .send(wire("custom/extension", vec![], json!({"x": 1})))
        .await;
    let error = alice.recv_kind("system/error").await;
    assert_eq!(error.payload["error"], json!("UnknownKind"));

    // A capability over the custom namespace lets the same kind through.
    bob.send(wire("custom/extension", vec![], json!({"x": 2})))
        .await;
    let envelope = alice.recv_kind("custom/extension").await;
    assert_eq!(envelope.payload, json!({"x": 2}));
}

#[tokio::test]
async fn test_elevated_grant_counts_only_after_ack() {
    let space = TestSpace::start(space_with(vec![
        participant(
            "orchestrator",
            vec![cap("capability/grant"), cap("chat")],
        ),
        participant("agent", vec![cap("chat"), cap("capability/grant-ack")]),
        participant("fs", vec![cap("mcp/response")]),
    ]))
    .await;
    let mut orchestrator = TestClient::join(&space, "orchestrator").await;
    let mut agent = TestClient::join(&space, "agent").await;
    let mut fs = TestClient::join(&space, "fs").await;

    // The orchestrator does not itself hold mcp/request, so the grant is
    // elevated and lands pending.
    orchestrator
        .send(wire(
            "capability/grant",
            vec!["agent"],
            json!({
                "recipient": "agent",
                "capabilities": [{"kind": "mcp/request"}],
                "reason": "approved tool access"
            }),
        ))
        .await;

    let grant = agent.recv_kind("capability/grant").await;
    let grant_id = grant.payload["grant_id"]
        .as_str()
        .expect("gateway allocates a grant id")
        .to_string();

    // Before the ack, the matcher's verdict is unchanged.
    agent
        .send(wire("mcp/request", vec!["fs"], json!({"method": "x"})))
        .await;
    let error = agent.recv_kind("system/error").await;
    assert_eq!(error.payload["error"], json!("Forbidden"));
    fs.assert_no_kind("mcp/request", Duration::from_millis(300)).await;

    // Acknowledge, then the same envelope routes.
    agent
        .send(wire(
            "capability/grant-ack",
            vec!["orchestrator"],
            json!({"grant_id": grant_id}),
        ))
        .await;
    orchestrator.recv_kind("capability/grant-ack").await;

    agent
        .send(wire("mcp/request", vec!["fs"], json!({"method": "x"})))
        .await;
    let request = fs.recv_kind("mcp/request").await;
    assert_eq!(request.from, "agent");
}

#[tokio::test]
async fn test_covered_grant_is_usable_immediately() {
    let space = TestSpace::start(space_with(vec![
        participant(
            "admin",
            vec![cap("capability/grant"), cap("mcp/**"), cap("chat")],
        ),
        participant("agent", vec![cap("chat")]),
    ]))
    .await;
    let mut admin = TestClient::join(&space, "admin").await;
    let mut agent = TestClient::join(&space, "agent").await;

    admin
        .send(wire(
            "capability/grant",
            vec!["agent"],
            json!({"recipient": "agent", "capabilities": [{"kind": "mcp/notification"}]}),
        ))
        .await;
    agent.recv_kind("capability/grant").await;

    agent
        .send(wire("mcp/notification", vec![], json!({"method": "ping"})))
        .await;
    let notification = admin.recv_kind("mcp/notification").await;
    assert_eq!(notification.from, "agent");
}

#[tokio::test]
async fn test_revoke_takes_effect_immediately() {
    let space = TestSpace::start(space_with(vec![
        participant(
            "admin",
            vec![
                cap("capability/grant"),
                cap("capability/revoke"),
                cap("chat"),
            ],
        ),
        participant("agent", vec![]),
    ]))
    .await;
    let mut admin = TestClient::join(&space, "admin").await;
    let mut agent = TestClient::join(&space, "agent").await;

    admin
        .send(wire(
            "capability/grant",
            vec!["agent"],
            json!({
                "recipient": "agent",
                "capabilities": [{"kind": "chat"}],
                "grant_id": "g-chat"
            }),
        ))
        .await;
    agent.recv_kind("capability/grant").await;

    agent.send(wire("chat", vec![], json!({"text": "works"}))).await;
    admin.recv_kind("chat").await;

    admin
        .send(wire(
            "capability/revoke",
            vec!["agent"],
            json!({"recipient": "agent", "grant_id": "g-chat"}),
        ))
        .await;
    agent.recv_kind("capability/revoke").await;

    agent.send(wire("chat", vec![], json!({"text": "blocked"}))).await;
    let error = agent.recv_kind("system/error").await;
    assert_eq!(error.payload["error"], json!("Forbidden"));
}

#[tokio::test]
async fn test_payload_scoped_capability() {
    let space = TestSpace::start(space_with(vec![
        participant(
            "agent",
            vec![mew_protocol::prelude::Capability {
                id: None,
                kind: "mcp/request".to_string(),
                to: Some(vec!["fs".to_string()]),
                payload: Some(json!({"method": "tools/call", "params": {"name": "read_file"}})),
            }],
        ),
        participant("fs", vec![cap("mcp/response")]),
    ]))
    .await;
    let mut agent = TestClient::join(&space, "agent").await;
    let mut fs = TestClient::join(&space, "fs").await;

    // In-scope call routes.
    agent
        .send(wire(
            "mcp/request",
            vec!["fs"],
            json!({"method": "tools/call", "params": {"name": "read_file", "arguments": {"path": "x"}}}),
        ))
        .await;
    fs.recv_kind("mcp/request").await;

    // A different tool is out of scope.
    agent
        .send(wire(
            "mcp/request",
            vec!["fs"],
            json!({"method": "tools/call", "params": {"name": "write_file"}}),
        ))
        .await;
    let error = agent.recv_kind("system/error").await;
    assert_eq!(error.payload["error"], json!("Forbidden"));

    // So is a different recipient.
    agent
        .send(wire(
            "mcp/request",
            vec!["admin"],
            json!({"method": "tools/call", "params": {"name": "read_file"}}),
        ))
        .await;
    let error = agent.recv_kind("system/error").await;
    assert_eq!(error.payload["error"], json!("Forbidden"));
}
