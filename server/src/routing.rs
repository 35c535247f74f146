//! HTTP routing and boundary guards
//!
//! A single middleware enforces the REST boundary contract before routing:
//! origin allow-list (403 `CORS_BLOCKED`), preflight short-circuit (204),
//! body cap (413 `BODY_TOO_LARGE`), and the fixed-window rate limit
//! (429 `RATE_LIMITED`). Handlers below it stay free of guard logic.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use peerlink_shared::unix_now_ms;

use crate::relay::BrokerState;
use crate::turn::{build_turn_credentials, TurnCredentials};

/// Build the broker's router.
pub fn create_router(state: Arc<BrokerState>) -> Router {
    let body_limit = state.config.max_json_body_bytes;
    Router::new()
        .route("/v1/rooms", post(create_room))
        .route("/v1/rooms/:id", get(room_status))
        .route("/v1/turn-credentials", post(turn_credentials))
        .route("/health", get(health))
        .route("/v1/ws", get(crate::relay::handle_ws))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Whether `origin` passes the allow-list. An empty list is permissive.
fn origin_allowed(origins: &[String], origin: Option<&str>) -> bool {
    match origin {
        None => true,
        Some(origin) => origins.is_empty() || origins.iter().any(|allowed| allowed == origin),
    }
}

async fn guard(
    State(state): State<Arc<BrokerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if !origin_allowed(&state.config.cors_origins, origin.as_deref()) {
        return (StatusCode::FORBIDDEN, Json(json!({ "code": "CORS_BLOCKED" }))).into_response();
    }

    let allow_origin = if state.config.cors_origins.is_empty() {
        "*".to_string()
    } else {
        origin.clone().unwrap_or_else(|| "*".to_string())
    };

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(&mut response, &allow_origin);
        return response;
    }

    let content_length = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > state.config.max_json_body_bytes {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(json!({ "code": "BODY_TOO_LARGE" })),
        )
            .into_response();
    }

    // the message endpoint runs its own admission limiter
    let path = request.uri().path();
    if path != "/v1/ws" && path != "/health" {
        let now = unix_now_ms();
        if !state.rest_limiter.try_acquire(addr.ip(), now) {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "code": "RATE_LIMITED" })),
            )
                .into_response();
        }
    }

    let mut response = next.run(request).await;
    apply_cors(&mut response, &allow_origin);
    response
}

fn apply_cors(response: &mut Response, allow_origin: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(allow_origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
}

/// `POST /v1/rooms` — mint a room. The body, if any, is ignored.
async fn create_room(State(state): State<Arc<BrokerState>>) -> impl IntoResponse {
    let room = state
        .rooms
        .create_room(unix_now_ms(), state.config.room_ttl_seconds);
    info!("room '{}' created", room.room_id);
    let join_url = format!(
        "{}/join/{}",
        state.config.frontend_base_url.trim_end_matches('/'),
        room.room_id
    );
    (
        StatusCode::CREATED,
        Json(json!({
            "roomId": room.room_id,
            "joinUrl": join_url,
            "expiresAt": room.expires_at,
        })),
    )
}

/// `GET /v1/rooms/:id` — status of an active room.
async fn room_status(
    State(state): State<Arc<BrokerState>>,
    Path(room_id): Path<String>,
) -> Response {
    match state.rooms.get_active_room(&room_id, unix_now_ms()) {
        Some(room) => (
            StatusCode::OK,
            Json(json!({
                "roomId": room.room_id,
                "status": "open",
                "expiresAt": room.expires_at,
                "participantCount": room.participant_count(),
            })),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "code": "ROOM_NOT_FOUND" })),
        )
            .into_response(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TurnRequest {
    #[serde(default, rename = "peerId")]
    peer_id: Option<String>,
}

/// `POST /v1/turn-credentials` — mint short-lived relay credentials.
async fn turn_credentials(
    State(state): State<Arc<BrokerState>>,
    body: Option<Json<TurnRequest>>,
) -> Json<TurnCredentials> {
    let peer_id = body
        .and_then(|Json(request)| request.peer_id)
        .unwrap_or_default();
    Json(build_turn_credentials(
        &state.config.turn_urls,
        state.config.turn_shared_secret.as_deref(),
        state.config.turn_ttl_seconds,
        &peer_id,
        unix_now_ms(),
    ))
}

/// `GET /health` — liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "timestamp": unix_now_ms() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_allow_list() {
        let origins = vec!["https://app.example.com".to_string()];
        assert!(origin_allowed(&origins, None));
        assert!(origin_allowed(&origins, Some("https://app.example.com")));
        assert!(!origin_allowed(&origins, Some("https://evil.example.com")));
        // empty list is permissive
        assert!(origin_allowed(&[], Some("https://anything.example.com")));
    }
}
