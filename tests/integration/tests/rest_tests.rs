//! REST Integration Tests
//!
//! The dispatcher runs against a mock API served by axum; no external
//! services are needed.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chat_ratelimit::{
    Admission, BucketUpdate, CoordinatorConfig, RateLimitCoordinator, RateLimitError,
    RateLimitRoute, RateLimitStore, StoreError, StoreResult,
};
use chat_rest::{Endpoint, RequestBody, RestClient, RestError};
use integration_tests::{rest_config, TestApi, TEST_TOKEN};
use serde_json::{json, Value};

type Hits = Arc<AtomicUsize>;

fn limiter() -> Arc<RateLimitCoordinator> {
    Arc::new(RateLimitCoordinator::in_memory(CoordinatorConfig::default()))
}

async fn client_for(app: Router, limiter: Option<Arc<RateLimitCoordinator>>) -> RestClient {
    let api = TestApi::start(app).await.unwrap();
    // Dropping the handle detaches the server task; it runs until the runtime stops
    let client = RestClient::new(rest_config(api.base_url())).unwrap();
    match limiter {
        Some(limiter) => client.with_rate_limiter(limiter),
        None => client,
    }
}

fn channel_messages(channel_id: u64) -> Endpoint {
    Endpoint::get(
        format!("/channels/{channel_id}/messages"),
        RateLimitRoute::channel(channel_id),
    )
}

// ============================================================================
// Request encoding and decoding
// ============================================================================

#[tokio::test]
async fn test_request_sends_token_and_decodes_json() {
    async fn handler(Path(id): Path<String>, headers: HeaderMap) -> Json<Value> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Json(json!({"channel_id": id, "auth": auth}))
    }

    let app = Router::new().route("/api/v10/channels/:id/messages", get(handler));
    let client = client_for(app, None).await;

    let body: Value = client
        .request(&channel_messages(42), RequestBody::Empty)
        .await
        .unwrap();
    assert_eq!(body["channel_id"], "42");
    assert_eq!(body["auth"], format!("Bot {TEST_TOKEN}"));
}

#[tokio::test]
async fn test_json_body_is_sent() {
    async fn handler(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        (StatusCode::CREATED, Json(json!({"echo": body})))
    }

    let app = Router::new().route("/api/v10/channels/:id/messages", post(handler));
    let client = client_for(app, Some(limiter())).await;

    let endpoint = Endpoint::post("/channels/7/messages", RateLimitRoute::channel(7));
    let body = RequestBody::json(&json!({"content": "hello"})).unwrap();
    let reply: Value = client.request(&endpoint, body).await.unwrap();
    assert_eq!(reply["echo"]["content"], "hello");
}

#[tokio::test]
async fn test_empty_success_body() {
    let app = Router::new().route(
        "/api/v10/channels/:id/messages",
        get(|| async { StatusCode::NO_CONTENT }),
    );
    let client = client_for(app, None).await;

    let () = client
        .request(&channel_messages(1), RequestBody::Empty)
        .await
        .unwrap();
    let nothing: Option<Value> = client
        .request(&channel_messages(1), RequestBody::Empty)
        .await
        .unwrap();
    assert!(nothing.is_none());
}

// ============================================================================
// Error responses
// ============================================================================

#[tokio::test]
async fn test_client_error_is_structured() {
    let app = Router::new().route(
        "/api/v10/channels/:id/messages",
        get(|| async {
            (
                StatusCode::NOT_FOUND,
                Json(json!({"code": 10003, "message": "Unknown Channel"})),
            )
        }),
    );
    let client = client_for(app, None).await;

    let err = client
        .request::<Value>(&channel_messages(9), RequestBody::Empty)
        .await
        .unwrap_err();
    let api = err.as_api().expect("API error");
    assert_eq!(api.status, 404);
    assert!(api.is_client_error());
    assert_eq!(api.code, Some(10003));
    assert_eq!(api.message.as_deref(), Some("Unknown Channel"));
    assert!(api.body.contains("Unknown Channel"));
}

#[tokio::test]
async fn test_server_error_keeps_raw_body() {
    let hits: Hits = Arc::default();
    let app = Router::new()
        .route(
            "/api/v10/channels/:id/messages",
            get(|State(hits): State<Hits>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::BAD_GATEWAY, "upstream unavailable")
            }),
        )
        .with_state(Arc::clone(&hits));
    let client = client_for(app, None).await;

    let err = client
        .request::<Value>(&channel_messages(9), RequestBody::Empty)
        .await
        .unwrap_err();
    let api = err.as_api().expect("API error");
    assert_eq!(api.status, 502);
    assert!(api.is_server_error());
    assert_eq!(api.body, "upstream unavailable");
    assert!(api.code.is_none());

    // Never retried by the dispatcher
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_exhausted_bucket_delays_next_call() {
    let hits: Hits = Arc::default();
    let app = Router::new()
        .route(
            "/api/v10/channels/:id/messages",
            get(|State(hits): State<Hits>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (
                    [
                        ("x-ratelimit-limit", "5"),
                        ("x-ratelimit-remaining", "0"),
                        ("x-ratelimit-reset-after", "0.5"),
                        ("x-ratelimit-bucket", "b1"),
                    ],
                    Json(json!({"ok": true})),
                )
                    .into_response()
            }),
        )
        .with_state(Arc::clone(&hits));
    let limiter = limiter();
    let client = client_for(app, Some(Arc::clone(&limiter))).await;

    let started = Instant::now();
    let _: Value = client
        .request(&channel_messages(1), RequestBody::Empty)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));

    let second = Instant::now();
    let _: Value = client
        .request(&channel_messages(1), RequestBody::Empty)
        .await
        .unwrap();
    let waited = second.elapsed();
    assert!(waited >= Duration::from_millis(450), "waited only {waited:?}");
    assert!(waited < Duration::from_millis(1500), "waited {waited:?}");

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(
        limiter.bucket_key(&RateLimitRoute::channel(1)).await.unwrap(),
        "b1"
    );
}

#[tokio::test]
async fn test_global_limit_delays_every_route() {
    let hits: Hits = Arc::default();
    let app = Router::new()
        .route(
            "/api/v10/channels/:id/messages",
            get(|State(hits): State<Hits>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        [("x-ratelimit-global", "true"), ("retry-after", "0.4")],
                        Json(json!({"message": "You are being rate limited.", "global": true})),
                    )
                        .into_response()
                } else {
                    Json(json!({"ok": true})).into_response()
                }
            }),
        )
        .with_state(Arc::clone(&hits));
    let client = client_for(app, Some(limiter())).await;

    let err = client
        .request::<Value>(&channel_messages(1), RequestBody::Empty)
        .await
        .unwrap_err();
    assert!(err.as_api().is_some_and(|api| api.is_rate_limited()));

    // A different route still waits out the global lockout
    let started = Instant::now();
    let _: Value = client
        .request(&channel_messages(2), RequestBody::Empty)
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(350));
}

struct FailingStore;

#[async_trait]
impl RateLimitStore for FailingStore {
    async fn get_and_decrement(&self, _key: &str) -> StoreResult<Admission> {
        Err(StoreError::UnexpectedReply("store offline".to_string()))
    }

    async fn set_bucket_state(&self, _key: &str, _update: BucketUpdate) -> StoreResult<()> {
        Err(StoreError::UnexpectedReply("store offline".to_string()))
    }

    async fn get_global_retry_after(&self) -> StoreResult<Option<Duration>> {
        Ok(None)
    }

    async fn set_global_retry_after(&self, _retry_after: Duration) -> StoreResult<()> {
        Err(StoreError::UnexpectedReply("store offline".to_string()))
    }

    async fn bucket_hash(&self, _route_key: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn set_bucket_hash(&self, _route_key: &str, _hash: &str) -> StoreResult<()> {
        Err(StoreError::UnexpectedReply("store offline".to_string()))
    }

    async fn try_acquire_handshake_slot(
        &self,
        _shard_bucket: u32,
        _cooldown: Duration,
    ) -> StoreResult<Option<Duration>> {
        Err(StoreError::UnexpectedReply("store offline".to_string()))
    }
}

#[tokio::test]
async fn test_store_failure_fails_request_without_sending() {
    let hits: Hits = Arc::default();
    let app = Router::new()
        .route(
            "/api/v10/channels/:id/messages",
            get(|State(hits): State<Hits>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Json(json!({"ok": true}))
            }),
        )
        .with_state(Arc::clone(&hits));
    let limiter = Arc::new(RateLimitCoordinator::new(
        Arc::new(FailingStore),
        CoordinatorConfig::default(),
    ));
    let client = client_for(app, Some(limiter)).await;

    let err = client
        .request::<Value>(&channel_messages(1), RequestBody::Empty)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RestError::RateLimit(RateLimitError::Store(StoreError::UnexpectedReply(_)))
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
