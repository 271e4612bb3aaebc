//! Axum routes for the queue API.
//!
//! Every queue route sits behind the API-key middleware. Channel and
//! priority query parameters are parsed leniently on enqueue (missing or
//! malformed values fall back to the defaults); consumers asking for an
//! out-of-range channel get a 400 instead.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use usher_core::{PriorityQueue, MAX_CHANNEL};

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

const DEFAULT_PRIO: f64 = 0.0;
const DEFAULT_CHANNEL: i64 = 0;

/// Shared application state.
pub struct AppState {
    pub queue: Arc<dyn PriorityQueue>,
    pub api_key: String,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/dequeue", get(dequeue))
        .route("/reserve", get(reserve))
        .route("/confirm/:reservation_id", post(confirm))
        .route("/size", get(size))
        .route("/reset", post(reset))
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    next.run(request).await
}

#[derive(Deserialize)]
struct QueueQuery {
    prio: Option<String>,
    channel: Option<String>,
    notbefore: Option<String>,
}

/// Producer-side parsing: anything missing or malformed falls back to the
/// default channel.
fn enqueue_channel(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.parse::<i64>().ok())
        .filter(|c| (0..=MAX_CHANNEL as i64).contains(c))
        .unwrap_or(DEFAULT_CHANNEL) as usize
}

/// Consumer-side parsing: malformed input falls back to the default, but an
/// explicitly out-of-range channel is rejected.
fn consumer_channel(raw: Option<&str>) -> Result<usize, ApiError> {
    let channel = raw
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(DEFAULT_CHANNEL);
    if !(0..=MAX_CHANNEL as i64).contains(&channel) {
        return Err(ApiError::bad_request("Channel must be between 0 and 100"));
    }
    Ok(channel as usize)
}

/// Strict parsing for size: the channel must be present and in range.
fn strict_channel(raw: Option<&str>) -> Result<usize, ApiError> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .filter(|c| (0..=MAX_CHANNEL as i64).contains(c))
        .map(|c| c as usize)
        .ok_or_else(|| ApiError::bad_request("Invalid channel. Must be between 0 and 100."))
}

async fn enqueue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueQuery>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let channel = enqueue_channel(query.channel.as_deref());
    let priority = query
        .prio
        .as_deref()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(DEFAULT_PRIO);
    let not_before = match query.notbefore.as_deref() {
        None | Some("") => None,
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(_) => return Err(ApiError::bad_request("Invalid notbefore timestamp")),
        },
    };

    if body.is_empty() {
        return Err(ApiError::bad_request("Request body is required"));
    }

    state.queue.enqueue(&body, priority, channel, not_before)?;
    debug!(channel, priority, "item enqueued");
    Ok("Item enqueued")
}

async fn dequeue(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueQuery>,
) -> Result<Response, ApiError> {
    let channel = consumer_channel(query.channel.as_deref())?;
    let payload = state.queue.dequeue(channel)?;
    debug!(channel, "item dequeued");
    // The payload is stored opaquely but served as JSON, matching what
    // producers put in.
    Ok(([(header::CONTENT_TYPE, "application/json")], payload).into_response())
}

async fn reserve(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = consumer_channel(query.channel.as_deref())?;
    let (value, reservation_id) = state.queue.dequeue_with_reservation(channel)?;
    debug!(channel, %reservation_id, "item reserved");

    // Embed JSON payloads as JSON, anything else as a string.
    let value = match serde_json::from_str::<serde_json::Value>(&value) {
        Ok(parsed) => parsed,
        Err(_) => serde_json::Value::String(value),
    };
    Ok(Json(serde_json::json!({
        "value": value,
        "reservation_id": reservation_id,
    })))
}

async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(reservation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.queue.confirm_reservation(&reservation_id)?;
    debug!(%reservation_id, "reservation confirmed");
    Ok(StatusCode::OK)
}

async fn size(
    State(state): State<Arc<AppState>>,
    Query(query): Query<QueueQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = strict_channel(query.channel.as_deref())?;
    let size = state.queue.size(channel)?;
    Ok(Json(serde_json::json!({ "size": size })))
}

async fn reset(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.queue.reset()?;
    Ok(StatusCode::OK)
}
