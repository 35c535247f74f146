//! WebSocket relay between the two peers of a room
//!
//! One message session per `(roomId, peerId, role)`. Admission runs before
//! the upgrade so rejections map onto plain HTTP statuses; after the upgrade
//! the broker only validates, decorates, and forwards frames — it never
//! inspects payload semantics beyond the chat bounds.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use peerlink_shared::unix_now_ms;
use peerlink_shared::validate::{is_valid_room_id, sanitize_peer_id};

use crate::config::BrokerConfig;
use crate::rate_limit::FixedWindowLimiter;
use crate::rooms::{JoinDecision, RoomRegistry, RoomRole};

/// Frames beyond this size close the session with code 1009.
pub const MAX_FRAME_BYTES: usize = 64_000;

/// Relayed chat text length bounds.
pub const MAX_CHAT_TEXT: usize = 500;

/// WebSocket close code for oversized frames.
pub const CLOSE_TOO_BIG: u16 = 1009;

// bounded per-session outbound buffer
const SESSION_BUFFER: usize = 50;

/// One live message session.
pub struct SessionHandle {
    /// The session's peer.
    pub peer_id: String,
    /// The peer's role in the room.
    pub role: RoomRole,
    /// Outbound frame queue.
    pub tx: mpsc::Sender<Message>,
}

/// Broker state shared across connections.
pub struct BrokerState {
    /// Static configuration.
    pub config: BrokerConfig,
    /// The room registry.
    pub rooms: RoomRegistry,
    /// Live sessions per room.
    pub sessions: DashMap<String, Vec<SessionHandle>>,
    /// REST admission limiter.
    pub rest_limiter: FixedWindowLimiter,
    /// Upgrade admission limiter.
    pub ws_limiter: FixedWindowLimiter,
}

impl BrokerState {
    /// Build the state from configuration.
    pub fn new(config: BrokerConfig) -> Self {
        let rest_limiter = FixedWindowLimiter::new(
            config.rest_rate_limit_window_ms,
            config.rest_rate_limit_max,
        );
        let ws_limiter =
            FixedWindowLimiter::new(config.ws_rate_limit_window_ms, config.ws_rate_limit_max);
        Self {
            config,
            rooms: RoomRegistry::new(),
            sessions: DashMap::new(),
            rest_limiter,
            ws_limiter,
        }
    }

    fn register_session(&self, room_id: &str, handle: SessionHandle) {
        self.sessions
            .entry(room_id.to_string())
            .or_default()
            .push(handle);
    }

    fn unregister_session(&self, room_id: &str, peer_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(room_id) {
            entry.retain(|handle| handle.peer_id != peer_id);
            let empty = entry.is_empty();
            drop(entry);
            if empty {
                self.sessions.remove_if(room_id, |_, handles| handles.is_empty());
            }
        }
    }

    /// Deliver `text` to room members other than `from_peer`, or to just
    /// `to_peer` when a target is named.
    pub async fn send_to_room(
        &self,
        room_id: &str,
        from_peer: &str,
        to_peer: Option<&str>,
        text: String,
    ) {
        let recipients: Vec<mpsc::Sender<Message>> = match self.sessions.get(room_id) {
            Some(entry) => entry
                .iter()
                .filter(|handle| handle.peer_id != from_peer)
                .filter(|handle| to_peer.map_or(true, |target| handle.peer_id == target))
                .map(|handle| handle.tx.clone())
                .collect(),
            None => return,
        };
        for tx in recipients {
            if tx.send(Message::Text(text.clone())).await.is_err() {
                debug!("dropping frame for a departed session in '{room_id}'");
            }
        }
    }

    /// Send a terminal error to every session of a room and close them.
    pub async fn close_room_sessions(&self, room_id: &str, code: &str, message: &str) {
        let handles: Vec<mpsc::Sender<Message>> = self
            .sessions
            .remove(room_id)
            .map(|(_, handles)| handles.into_iter().map(|handle| handle.tx).collect())
            .unwrap_or_default();
        for tx in handles {
            let _ = tx.send(Message::Text(error_frame(code, message))).await;
            let _ = tx.send(Message::Close(None)).await;
        }
    }

    /// Close every live session (shutdown path).
    pub async fn close_all_sessions(&self) {
        let room_ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        for room_id in room_ids {
            self.close_room_sessions(&room_id, "SERVER_SHUTDOWN", "broker shutting down")
                .await;
        }
    }

    /// Live session count for a room.
    pub fn live_participant_count(&self, room_id: &str) -> usize {
        self.sessions
            .get(room_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}

/// Query parameters of the message endpoint.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Target room.
    #[serde(default, rename = "roomId")]
    pub room_id: String,
    /// Caller's peer identifier.
    #[serde(default, rename = "peerId")]
    pub peer_id: String,
    /// Requested role; anything but `host` is coerced to `guest`.
    #[serde(default)]
    pub role: String,
}

/// `GET /v1/ws?roomId&peerId&role` — validate admission, then upgrade.
pub async fn handle_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<BrokerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let now = unix_now_ms();
    if !state.ws_limiter.try_acquire(addr.ip(), now) {
        warn!("upgrade rejected for {}: rate limited", addr.ip());
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "code": "RATE_LIMITED" })),
        )
            .into_response();
    }

    let room_id = query.room_id.trim().to_ascii_lowercase();
    if !is_valid_room_id(&room_id) {
        return join_rejection(&JoinDecision::RoomNotFound);
    }
    let peer_id = sanitize_peer_id(&query.peer_id);
    if peer_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": "INVALID_PEER_ID" })),
        )
            .into_response();
    }
    let role = if query.role == "host" {
        RoomRole::Host
    } else {
        RoomRole::Guest
    };

    match state.rooms.validate_join(&room_id, &peer_id, role.as_str(), now) {
        JoinDecision::Ok(_) => ws
            .on_upgrade(move |socket| run_session(socket, state, room_id, peer_id, role))
            .into_response(),
        decision => {
            debug!(
                "join rejected for '{}' in '{}': {}",
                peer_id,
                room_id,
                decision.code()
            );
            join_rejection(&decision)
        }
    }
}

fn join_rejection(decision: &JoinDecision) -> Response {
    let status = match decision {
        JoinDecision::RoomNotFound => StatusCode::NOT_FOUND,
        JoinDecision::RoomExpired => StatusCode::GONE,
        JoinDecision::RoomFull | JoinDecision::RoleTaken => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(json!({ "code": decision.code() }))).into_response()
}

async fn run_session(
    socket: WebSocket,
    state: Arc<BrokerState>,
    room_id: String,
    peer_id: String,
    role: RoomRole,
) {
    // admission runs once more, atomically: the slot may have been taken
    // between the pre-upgrade check and this point
    let decision = state
        .rooms
        .join(&room_id, &peer_id, role.as_str(), unix_now_ms());
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let room = match decision {
        JoinDecision::Ok(room) => *room,
        decision => {
            let _ = ws_sender
                .send(Message::Text(error_frame(decision.code(), "join rejected")))
                .await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel::<Message>(SESSION_BUFFER);
    state.register_session(
        &room_id,
        SessionHandle {
            peer_id: peer_id.clone(),
            role,
            tx: tx.clone(),
        },
    );
    info!("peer '{}' joined room '{}' as {}", peer_id, room_id, role.as_str());

    let forward = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let _ = tx
        .send(Message::Text(server_frame(
            "session-joined",
            json!({ "participantCount": room.participant_count() }),
            &room_id,
        )))
        .await;
    state
        .send_to_room(
            &room_id,
            &peer_id,
            None,
            server_frame("peer-joined", json!({ "role": role.as_str() }), &room_id),
        )
        .await;

    let sender_handle = SessionHandle {
        peer_id: peer_id.clone(),
        role,
        tx: tx.clone(),
    };
    while let Some(Ok(message)) = ws_receiver.next().await {
        match message {
            Message::Text(text) => {
                if !handle_frame(&state, &room_id, &sender_handle, &text).await {
                    warn!("oversize frame from '{}' in '{}'", peer_id, room_id);
                    let _ = tx
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_TOO_BIG,
                            reason: "frame too large".into(),
                        })))
                        .await;
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => debug!("dropping binary frame from '{}'", peer_id),
        }
    }

    state.unregister_session(&room_id, &peer_id);
    state.rooms.remove_participant(&room_id, &peer_id);
    state
        .send_to_room(
            &room_id,
            &peer_id,
            None,
            server_frame(
                "peer-left",
                json!({ "role": role.as_str(), "peerId": peer_id }),
                &room_id,
            ),
        )
        .await;
    info!("peer '{}' left room '{}'", peer_id, room_id);
    forward.abort();
}

/// Validate, decorate, and dispatch one incoming frame.
///
/// Returns `false` when the session must close (oversize frame). Malformed
/// JSON and frames without a string `type` are dropped; disallowed types are
/// answered with an `error` frame.
async fn handle_frame(
    state: &BrokerState,
    room_id: &str,
    sender: &SessionHandle,
    text: &str,
) -> bool {
    if text.len() > MAX_FRAME_BYTES {
        return false;
    }
    let Ok(mut value) = serde_json::from_str::<Value>(text) else {
        debug!("dropping unparseable frame from '{}'", sender.peer_id);
        return true;
    };
    let Some(frame_type) = value.get("type").and_then(Value::as_str).map(str::to_string) else {
        debug!("dropping frame without a type from '{}'", sender.peer_id);
        return true;
    };

    match frame_type.as_str() {
        // echoed straight back, never relayed
        "heartbeat" => {
            let _ = sender.tx.send(Message::Text(text.to_string())).await;
        }
        "offer" | "answer" | "ice-candidate" | "chat" => {
            if frame_type == "chat" && !chat_payload_is_valid(&value) {
                let _ = sender
                    .tx
                    .send(Message::Text(error_frame(
                        "INVALID_CHAT",
                        "chat payload requires text of 1..500 characters",
                    )))
                    .await;
                return true;
            }
            let to_peer = value
                .get("toPeerId")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(frame) = value.as_object_mut() {
                frame.insert("fromPeerId".to_string(), json!(sender.peer_id));
                frame.insert("roomId".to_string(), json!(room_id));
                frame.insert("timestamp".to_string(), json!(unix_now_ms()));
            }
            state
                .send_to_room(room_id, &sender.peer_id, to_peer.as_deref(), value.to_string())
                .await;
        }
        other => {
            let _ = sender
                .tx
                .send(Message::Text(error_frame(
                    "UNSUPPORTED_TYPE",
                    &format!("unsupported message type '{other}'"),
                )))
                .await;
        }
    }
    true
}

fn chat_payload_is_valid(value: &Value) -> bool {
    value
        .get("payload")
        .and_then(|payload| payload.get("text"))
        .and_then(Value::as_str)
        .map(|text| (1..=MAX_CHAT_TEXT).contains(&text.chars().count()))
        .unwrap_or(false)
}

fn server_frame(frame_type: &str, payload: Value, room_id: &str) -> String {
    json!({
        "type": frame_type,
        "payload": payload,
        "roomId": room_id,
        "timestamp": unix_now_ms(),
    })
    .to_string()
}

fn error_frame(code: &str, message: &str) -> String {
    json!({
        "type": "error",
        "payload": { "code": code, "message": message },
        "timestamp": unix_now_ms(),
    })
    .to_string()
}
