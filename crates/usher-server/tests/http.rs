//! Router-level integration tests: each request is driven through the full
//! middleware + handler stack against an in-memory engine.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use usher_core::{EngineConfig, PriorityQueue, QueueEngine};
use usher_server::routes::{build_router, AppState, API_KEY_HEADER};

const TEST_KEY: &str = "test-key";

fn test_router() -> Router {
    let queue: Arc<dyn PriorityQueue> = Arc::new(QueueEngine::in_memory(EngineConfig::default()));
    build_router(Arc::new(AppState {
        queue,
        api_key: TEST_KEY.to_string(),
    }))
}

fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
    request.header(API_KEY_HEADER, TEST_KEY)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_api_key_is_forbidden() {
    let app = test_router();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/dequeue")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn wrong_api_key_is_forbidden() {
    let app = test_router();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/enqueue")
                .header(API_KEY_HEADER, "not-the-key")
                .body(Body::from("payload"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn enqueue_then_dequeue_round_trips() {
    let app = test_router();

    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().method("POST").uri("/enqueue?prio=1.5&channel=3"))
                .body(Body::from(r#"{"job":42}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            authed(Request::builder().uri("/dequeue?channel=3"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(body_string(response).await, r#"{"job":42}"#);
}

#[tokio::test]
async fn dequeue_respects_priority_order() {
    let app = test_router();
    for (payload, prio) in [("third", "3"), ("first", "1"), ("second", "2")] {
        let response = app
            .clone()
            .oneshot(
                authed(Request::builder()
                    .method("POST")
                    .uri(format!("/enqueue?prio={prio}")))
                .body(Body::from(payload))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    for expected in ["first", "second", "third"] {
        let response = app
            .clone()
            .oneshot(
                authed(Request::builder().uri("/dequeue"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_string(response).await, expected);
    }
}

#[tokio::test]
async fn dequeue_on_empty_channel_is_no_content() {
    let app = test_router();
    let response = app
        .oneshot(
            authed(Request::builder().uri("/dequeue?channel=9"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn dequeue_rejects_out_of_range_channel() {
    let app = test_router();
    let response = app
        .oneshot(
            authed(Request::builder().uri("/dequeue?channel=101"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enqueue_rejects_bad_notbefore() {
    let app = test_router();
    let response = app
        .oneshot(
            authed(Request::builder()
                .method("POST")
                .uri("/enqueue?notbefore=tomorrow"))
            .body(Body::from("x"))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enqueue_rejects_empty_body() {
    let app = test_router();
    let response = app
        .oneshot(
            authed(Request::builder().method("POST").uri("/enqueue"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn enqueue_with_future_notbefore_hides_item() {
    let app = test_router();
    let notbefore = (chrono::Utc::now() + chrono::Duration::seconds(60)).to_rfc3339();
    let response = app
        .clone()
        .oneshot(
            authed(Request::builder()
                .method("POST")
                .uri(format!("/enqueue?notbefore={}", urlencode(&notbefore))))
            .body(Body::from("later"))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            authed(Request::builder().uri("/size?channel=0"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await, serde_json::json!({ "size": 0 }));
}

#[tokio::test]
async fn reserve_confirm_flow() {
    let app = test_router();
    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().method("POST").uri("/enqueue?channel=5"))
                .body(Body::from(r#"{"task":"index"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().uri("/reserve?channel=5"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    // A JSON payload comes back embedded as JSON, not a string.
    assert_eq!(body["value"]["task"], "index");
    let reservation_id = body["reservation_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(
            authed(Request::builder()
                .method("POST")
                .uri(format!("/confirm/{reservation_id}")))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Confirmed: the item is gone for good.
    let response = app
        .oneshot(
            authed(Request::builder().uri("/dequeue?channel=5"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn reserve_on_empty_channel_is_no_content() {
    let app = test_router();
    let response = app
        .oneshot(
            authed(Request::builder().uri("/reserve"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn reserve_returns_plain_string_payload_as_string() {
    let app = test_router();
    app.clone()
        .oneshot(
            authed(Request::builder().method("POST").uri("/enqueue"))
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            authed(Request::builder().uri("/reserve"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["value"], "not json");
}

#[tokio::test]
async fn confirm_unknown_reservation_is_bad_request() {
    let app = test_router();
    let response = app
        .oneshot(
            authed(Request::builder()
                .method("POST")
                .uri("/confirm/f81d4fae-7dec-11d0-a765-00a0c91e6bf6"))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn size_requires_a_valid_channel() {
    let app = test_router();
    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().uri("/size"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(
            authed(Request::builder().uri("/size?channel=200"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn size_counts_ready_items() {
    let app = test_router();
    for i in 0..3 {
        app.clone()
            .oneshot(
                authed(Request::builder()
                    .method("POST")
                    .uri(format!("/enqueue?prio={i}&channel=7")))
                .body(Body::from(format!("item{i}")))
                .unwrap(),
            )
            .await
            .unwrap();
    }

    let response = app
        .oneshot(
            authed(Request::builder().uri("/size?channel=7"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await, serde_json::json!({ "size": 3 }));
}

#[tokio::test]
async fn reset_empties_the_queue() {
    let app = test_router();
    app.clone()
        .oneshot(
            authed(Request::builder().method("POST").uri("/enqueue"))
                .body(Body::from("doomed"))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().method("POST").uri("/reset"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            authed(Request::builder().uri("/dequeue"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

/// Percent-encode the handful of characters RFC3339 timestamps put in a
/// query string.
fn urlencode(raw: &str) -> String {
    raw.replace('+', "%2B").replace(':', "%3A")
}
