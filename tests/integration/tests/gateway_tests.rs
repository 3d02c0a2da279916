//! Gateway Integration Tests
//!
//! Shards run against an in-process mock gateway; no external services are
//! needed.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_shard::{
    ConnectionState, DispatchEvent, EventType, Shard, ShardConfig, ShardManager,
};
use integration_tests::{
    limiter_with_cooldown, shard_config, start_single_shard, test_limiter, wait_for,
    MockGateway, TEST_TOKEN,
};
use serde_json::json;

/// Long enough that no zombie check fires during a test
const QUIET_INTERVAL_MS: u64 = 30_000;
const WAIT: Duration = Duration::from_secs(3);

fn manager(gateway: &MockGateway) -> Arc<ShardManager> {
    Arc::new(ShardManager::new(shard_config(gateway.url()), test_limiter()))
}

fn first_shard(manager: &ShardManager) -> Arc<Shard> {
    Arc::clone(manager.shard(0).expect("manager has a shard"))
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_identify_on_first_connect() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (_conn, identify) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();

    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], TEST_TOKEN);
    assert_eq!(identify["d"]["shard"], json!([0, 1]));
    assert_eq!(identify["d"]["large_threshold"], 250);
    assert!(identify["d"]["properties"]["os"].is_string());

    let shard = first_shard(&manager);
    assert_eq!(shard.state(), ConnectionState::Connected);
    assert_eq!(shard.heartbeat_interval(), Duration::from_millis(QUIET_INTERVAL_MS));
}

#[tokio::test]
async fn test_connect_fails_when_first_frame_is_not_hello() {
    let mut gateway = MockGateway::start().await.unwrap();
    let shard = Shard::new(
        0,
        Arc::new(ShardConfig {
            auto_reconnect: false,
            ..shard_config(gateway.url())
        }),
        test_limiter(),
        Arc::default(),
    );

    let connecting = {
        let shard = Arc::clone(&shard);
        tokio::spawn(async move { shard.connect().await })
    };

    let mut conn = gateway.next_connection().await.unwrap();
    conn.heartbeat_ack().await.unwrap();

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(chat_shard::ShardError::Handshake(_))));
    assert_eq!(shard.state(), ConnectionState::Dead);
}

#[tokio::test]
async fn test_identifies_are_spaced_by_cooldown() {
    let mut gateway = MockGateway::start().await.unwrap();
    let cooldown = Duration::from_millis(300);
    let manager = Arc::new(ShardManager::new(
        ShardConfig {
            shard_count: 2,
            ..shard_config(gateway.url())
        },
        limiter_with_cooldown(cooldown),
    ));

    let starter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.start().await })
    };

    let mut first = gateway.next_connection().await.unwrap();
    let mut second = gateway.next_connection().await.unwrap();
    first.hello(QUIET_INTERVAL_MS).await.unwrap();
    second.hello(QUIET_INTERVAL_MS).await.unwrap();

    let (a, b) = tokio::join!(
        async { first.recv_handshake().await.map(|m| (m, Instant::now())) },
        async { second.recv_handshake().await.map(|m| (m, Instant::now())) },
    );
    let (identify_a, at_a) = a.unwrap();
    let (identify_b, at_b) = b.unwrap();
    starter.await.unwrap();

    let gap = if at_a > at_b { at_a - at_b } else { at_b - at_a };
    assert!(gap >= Duration::from_millis(250), "identifies only {gap:?} apart");

    let mut shards = vec![identify_a["d"]["shard"].clone(), identify_b["d"]["shard"].clone()];
    shards.sort_by_key(|s| s[0].as_u64());
    assert_eq!(shards, vec![json!([0, 2]), json!([1, 2])]);
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test]
async fn test_heartbeat_within_interval_and_acks_keep_connection() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);
    let interval = Duration::from_millis(200);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, 200).await.unwrap();
    let hello_sent = Instant::now();

    let first = conn.recv_op(1).await.unwrap();
    assert!(hello_sent.elapsed() < interval + Duration::from_millis(150));
    assert!(first["d"].is_null());
    conn.heartbeat_ack().await.unwrap();

    // Acked heartbeats keep the session alive across several intervals
    for _ in 0..3 {
        conn.recv_op(1).await.unwrap();
        conn.heartbeat_ack().await.unwrap();
    }

    let shard = first_shard(&manager);
    assert!(!gateway.has_pending_connection());
    assert_eq!(shard.state(), ConnectionState::Connected);
    wait_for(WAIT, || shard.latency().is_some()).await.unwrap();
}

#[tokio::test]
async fn test_missing_ack_reconnects_and_resumes() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, 150).await.unwrap();
    conn.ready(1, "zombie", None).await.unwrap();

    // Never ack: the shard gives up on the connection with a resumable close
    assert_eq!(conn.closed().await.unwrap(), Some(4900));

    let mut next = gateway.next_connection().await.unwrap();
    let resume = next.open(QUIET_INTERVAL_MS).await.unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], "zombie");
    assert_eq!(resume["d"]["seq"], 1);
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_sequence_recorded_without_listeners() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, 200).await.unwrap();
    conn.dispatch(5, "MESSAGE_CREATE", json!({"content": "hi"}))
        .await
        .unwrap();

    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.sequence() == Some(5)).await.unwrap();

    // The next heartbeat carries the sequence
    let mut carried = false;
    for _ in 0..3 {
        let heartbeat = conn.recv_op(1).await.unwrap();
        conn.heartbeat_ack().await.unwrap();
        if heartbeat["d"] == 5 {
            carried = true;
            break;
        }
    }
    assert!(carried);
    assert_eq!(shard.sequence(), Some(5));
}

#[tokio::test]
async fn test_listeners_run_in_order() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for (kind, name) in [
        (EventType::MessageCreate, "first"),
        (EventType::MessageCreate, "second"),
        (EventType::GuildCreate, "guild"),
    ] {
        let log = Arc::clone(&log);
        manager.on(kind, move |_: Arc<Shard>, event: Arc<DispatchEvent>| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push((name, event.sequence));
            }
        });
    }

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    conn.dispatch(2, "MESSAGE_CREATE", json!({"content": "a"})).await.unwrap();
    conn.dispatch(3, "SOMETHING_NEW", json!({})).await.unwrap();
    conn.dispatch(4, "MESSAGE_CREATE", json!({"content": "b"})).await.unwrap();
    conn.dispatch(5, "GUILD_CREATE", json!({"id": "1"})).await.unwrap();

    wait_for(WAIT, || log.lock().len() == 5).await.unwrap();
    assert_eq!(
        *log.lock(),
        vec![
            ("first", Some(2)),
            ("second", Some(2)),
            ("first", Some(4)),
            ("second", Some(4)),
            ("guild", Some(5)),
        ]
    );
    assert_eq!(first_shard(&manager).sequence(), Some(5));
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    conn.send_json(json!({"op": 99})).await.unwrap();
    conn.send_json(json!({"op": 2, "d": {}})).await.unwrap();
    conn.dispatch(3, "MESSAGE_CREATE", json!({})).await.unwrap();

    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.sequence() == Some(3)).await.unwrap();
    assert_eq!(shard.state(), ConnectionState::Connected);
    assert!(!gateway.has_pending_connection());
}

// ============================================================================
// Reconnect and session continuity
// ============================================================================

#[tokio::test]
async fn test_close_4007_identifies_again() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    conn.ready(1, "abc", None).await.unwrap();
    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.session_id().is_some()).await.unwrap();

    conn.close(4007).await.unwrap();

    let mut next = gateway.next_connection().await.unwrap();
    let handshake = next.open(QUIET_INTERVAL_MS).await.unwrap();
    assert_eq!(handshake["op"], 2);
    assert!(shard.session_id().is_none());
}

#[tokio::test]
async fn test_other_close_codes_resume() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    let resume_url = gateway.resume_url();
    conn.ready(1, "abc", Some(&resume_url)).await.unwrap();
    conn.dispatch(2, "MESSAGE_CREATE", json!({})).await.unwrap();
    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.sequence() == Some(2)).await.unwrap();

    conn.close(4000).await.unwrap();

    let mut next = gateway.next_connection().await.unwrap();
    let resume = next.open(QUIET_INTERVAL_MS).await.unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["token"], TEST_TOKEN);
    assert_eq!(resume["d"]["session_id"], "abc");
    assert_eq!(resume["d"]["seq"], 2);

    next.dispatch(3, "RESUMED", json!({})).await.unwrap();
    wait_for(WAIT, || shard.sequence() == Some(3)).await.unwrap();
    assert_eq!(shard.session_id().as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_reconnect_request_resumes() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    conn.ready(7, "abc", None).await.unwrap();
    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.session_id().is_some()).await.unwrap();

    conn.reconnect().await.unwrap();
    assert_eq!(conn.closed().await.unwrap(), Some(4900));

    let mut next = gateway.next_connection().await.unwrap();
    let resume = next.open(QUIET_INTERVAL_MS).await.unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["seq"], 7);
}

#[tokio::test]
async fn test_invalid_session_flag_selects_handshake() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    conn.ready(1, "abc", None).await.unwrap();
    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.session_id().is_some()).await.unwrap();

    // Resumable: keep the session
    conn.invalid_session(true).await.unwrap();
    let mut conn = gateway.next_connection().await.unwrap();
    let handshake = conn.open(QUIET_INTERVAL_MS).await.unwrap();
    assert_eq!(handshake["op"], 6);

    // Not resumable: start over
    conn.invalid_session(false).await.unwrap();
    let mut conn = gateway.next_connection().await.unwrap();
    let handshake = conn.open(QUIET_INTERVAL_MS).await.unwrap();
    assert_eq!(handshake["op"], 2);
}

#[tokio::test]
async fn test_fatal_close_code_stops_reconnecting() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    conn.close(4004).await.unwrap();

    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.state() == ConnectionState::Dead).await.unwrap();
    gateway
        .expect_no_connection(Duration::from_millis(500))
        .await
        .unwrap();
}

// ============================================================================
// Kill and shutdown
// ============================================================================

#[tokio::test]
async fn test_kill_keeps_session_for_resume() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    conn.ready(4, "abc", None).await.unwrap();
    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.session_id().is_some()).await.unwrap();

    shard.kill().await;
    shard.kill().await;
    assert_eq!(shard.state(), ConnectionState::Dead);
    assert_eq!(conn.closed().await.unwrap(), Some(4900));
    gateway
        .expect_no_connection(Duration::from_millis(300))
        .await
        .unwrap();

    let reconnecting = {
        let shard = Arc::clone(&shard);
        tokio::spawn(async move { shard.connect().await })
    };
    let mut next = gateway.next_connection().await.unwrap();
    let resume = next.open(QUIET_INTERVAL_MS).await.unwrap();
    reconnecting.await.unwrap().unwrap();

    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["seq"], 4);
    assert_eq!(shard.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_shutdown_closes_normally() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();
    conn.ready(1, "abc", None).await.unwrap();
    let shard = first_shard(&manager);
    wait_for(WAIT, || shard.session_id().is_some()).await.unwrap();

    manager.shutdown().await;

    assert_eq!(conn.closed().await.unwrap(), Some(1000));
    assert_eq!(shard.state(), ConnectionState::Dead);
    assert!(shard.session_id().is_none());
    gateway
        .expect_no_connection(Duration::from_millis(300))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_presence_update_sent_when_connected() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway);

    let (mut conn, _) = start_single_shard(&manager, &mut gateway, QUIET_INTERVAL_MS)
        .await
        .unwrap();

    let presence = chat_shard::protocol::PresenceUpdatePayload::new("dnd")
        .with_activity(json!({"name": "tests", "type": 0}));
    first_shard(&manager).update_presence(&presence).await.unwrap();

    let update = conn.recv_op(3).await.unwrap();
    assert_eq!(update["d"]["status"], "dnd");
    assert_eq!(update["d"]["activities"][0]["name"], "tests");
}
