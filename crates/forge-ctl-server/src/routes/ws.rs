// forge-ctl-server/src/routes/ws.rs
// ============================================================================
// Module: WebSocket Route
// Description: Room subscription protocol over a single `/ws` connection.
// Purpose: Fan real-time events out to dashboard clients without polling.
// Dependencies: axum (ws), forge-ctl-bus, forge-ctl-core, crate::{auth, state}
// ============================================================================

//! ## Overview
//! A connection authenticates once, at upgrade time, via a `token` query
//! parameter (a `WebSocket` upgrade request cannot carry a custom
//! `Authorization` header from a browser). From there it is a small
//! protocol over JSON text frames:
//!
//! * client → server: `{"type":"subscribe","room":"ticket:<id>"}`,
//!   `{"type":"unsubscribe","room":"..."}`, `{"type":"pong"}`
//! * server → client: `{"type":"event","room":"...","event":<Event>}`,
//!   `{"type":"ping"}`, `{"type":"error","message":"..."}`
//!
//! A token that fails verification closes the connection immediately with
//! close code 4001 (permanent — clients must not auto-reconnect on it). A
//! connection that goes quiet past [`forge_ctl_bus::HeartbeatPolicy`]'s
//! grace window closes with code 1001 (non-permanent — clients should
//! reconnect with backoff).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Query;
use axum::extract::State;
use axum::extract::ws::CloseFrame;
use axum::extract::ws::Message as WsMessage;
use axum::extract::ws::WebSocket;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::Response;
use forge_ctl_bus::HeartbeatPolicy;
use forge_ctl_bus::PING_INTERVAL_SECS;
use forge_ctl_core::Clock;
use forge_ctl_core::Event;
use forge_ctl_core::Principal;
use forge_ctl_core::Room;
use forge_ctl_core::SystemClock;
use futures_util::SinkExt;
use futures_util::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::token::TokenCodec;

/// Close code for an invalid or expired token; clients must not reconnect.
const CLOSE_INVALID_TOKEN: u16 = 4001;
/// Close code for a forbidden room subscription; not expected to recur
/// without the client changing what it asks for, so it is also permanent.
const CLOSE_FORBIDDEN: u16 = 4002;
/// Close code for a heartbeat timeout; reconnecting is expected to recover.
const CLOSE_HEARTBEAT_TIMEOUT: u16 = 1001;

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { room: String },
    Unsubscribe { room: String },
    Pong,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Event { room: String, event: &'a Event },
    Ping,
    Error { message: String },
}

pub async fn handler(State(state): State<AppState>, Query(query): Query<WsQuery>, upgrade: WebSocketUpgrade) -> Response {
    let Some(token) = query.token else {
        return upgrade.on_upgrade(|socket| close_immediately(socket, CLOSE_INVALID_TOKEN, "missing token"));
    };
    let codec = TokenCodec::new(state.signing_key.as_ref());
    match codec.verify(&token) {
        Ok(principal) => upgrade.on_upgrade(move |socket| run_connection(socket, state, principal)),
        Err(_) => upgrade.on_upgrade(|socket| close_immediately(socket, CLOSE_INVALID_TOKEN, "invalid or expired token")),
    }
}

async fn close_immediately(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket.send(WsMessage::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
}

async fn run_connection(socket: WebSocket, state: AppState, principal: Principal) {
    let (mut sink, mut stream) = socket.split();
    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<(Room, Event)>();
    let mut room_tasks: HashMap<Room, tokio::task::JoinHandle<()>> = HashMap::new();
    let mut last_pong = SystemClock.now();
    let mut ping_interval = tokio::time::interval(std::time::Duration::from_secs(u64::try_from(PING_INTERVAL_SECS).unwrap_or(30)));

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match handle_client_frame(&text, &state, &principal, &forward_tx, &mut room_tasks).await {
                            ClientFrameOutcome::Accepted => {}
                            ClientFrameOutcome::Malformed(message) => {
                                let frame = ServerFrame::Error { message };
                                if send_json(&mut sink, &frame).await.is_err() {
                                    break;
                                }
                            }
                            ClientFrameOutcome::Forbidden => {
                                let _ = sink.send(WsMessage::Close(Some(CloseFrame {
                                    code: CLOSE_FORBIDDEN,
                                    reason: "forbidden".into(),
                                }))).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => last_pong = SystemClock.now(),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "websocket receive error");
                        break;
                    }
                }
            }
            Some((room, event)) = forward_rx.recv() => {
                let frame = ServerFrame::Event { room: room.to_string(), event: &event };
                if send_json(&mut sink, &frame).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if HeartbeatPolicy.is_dead(last_pong, SystemClock.now()) {
                    let _ = sink.send(WsMessage::Close(Some(CloseFrame {
                        code: CLOSE_HEARTBEAT_TIMEOUT,
                        reason: "heartbeat timeout".into(),
                    }))).await;
                    break;
                }
                if send_json(&mut sink, &ServerFrame::Ping).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, task) in room_tasks {
        task.abort();
    }
}

/// Result of applying one client frame.
enum ClientFrameOutcome {
    /// The frame was valid and applied (or silently ignored, e.g. an
    /// unparseable room name).
    Accepted,
    /// The frame could not be parsed; reported back without closing.
    Malformed(String),
    /// A subscribe request was rejected for lacking tenant access; the
    /// caller closes the connection with [`CLOSE_FORBIDDEN`].
    Forbidden,
}

async fn handle_client_frame(
    text: &str,
    state: &AppState,
    principal: &Principal,
    forward_tx: &mpsc::UnboundedSender<(Room, Event)>,
    room_tasks: &mut HashMap<Room, tokio::task::JoinHandle<()>>,
) -> ClientFrameOutcome {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => return ClientFrameOutcome::Malformed(format!("malformed frame: {err}")),
    };
    match frame {
        ClientFrame::Pong => ClientFrameOutcome::Accepted,
        ClientFrame::Unsubscribe { room } => {
            if let Some(room) = Room::parse(&room) {
                if let Some(task) = room_tasks.remove(&room) {
                    task.abort();
                }
            }
            ClientFrameOutcome::Accepted
        }
        ClientFrame::Subscribe { room } => {
            let Some(room) = Room::parse(&room) else {
                return ClientFrameOutcome::Malformed(format!("unrecognized room: {room}"));
            };
            if !authorized_for_room(state, principal, &room).await {
                return ClientFrameOutcome::Forbidden;
            }
            if room_tasks.contains_key(&room) {
                return ClientFrameOutcome::Accepted;
            }
            let mut subscription = state.realtime.subscribe(&room);
            let tx = forward_tx.clone();
            let task_room = room.clone();
            let task = tokio::spawn(async move {
                while let Some(event) = subscription.recv().await {
                    if tx.send((task_room.clone(), event)).is_err() {
                        break;
                    }
                }
            });
            room_tasks.insert(room, task);
            ClientFrameOutcome::Accepted
        }
    }
}

async fn authorized_for_room(state: &AppState, principal: &Principal, room: &Room) -> bool {
    if principal.is_operator {
        return true;
    }
    let tenant = match room {
        Room::Session(session_id) => state.store.get_session(&principal.tenant_id, session_id).await.ok().flatten().map(|session| session.tenant_id),
        Room::Ticket(ticket_id) => match state.store.get_ticket(ticket_id).await.ok().flatten() {
            Some(ticket) => state.store.get_session_by_project(&ticket.project_id).await.ok().flatten().map(|session| session.tenant_id),
            None => None,
        },
    };
    tenant.is_some_and(|tenant_id| principal.may_access_tenant(&tenant_id))
}

async fn send_json(sink: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>, frame: &ServerFrame<'_>) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(WsMessage::Text(text.into())).await.map_err(|_| ())
}

/// Builds the bare `/ws` route.
pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route("/", axum::routing::get(handler))
}
