//! Connection session manager.
//!
//! Owns the lifecycle of one WebSocket connection: handshake (userId query
//! parameter), presence registration, personal-room join, replay of queued
//! undelivered messages, the inbound/outbound event loop, and teardown with
//! the reconnection grace period.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use parley_shared::wire::{ClientEvent, SendAck, ServerEvent};
use parley_shared::{RoomId, UserId};

use crate::api::AppState;
use crate::dispatch::SendRequest;
use crate::rooms::ConnId;

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "userId", default)]
    pub user_id: String,
}

/// `GET /ws?userId=<uuid>`: upgrade to a chat session. A missing or
/// malformed identity is rejected before the upgrade; nothing gets
/// registered for it.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HandshakeQuery>,
    State(state): State<AppState>,
) -> Response {
    let Ok(user) = UserId::parse(&query.user_id) else {
        debug!(value = %query.user_id, "rejecting handshake without a valid userId");
        return (StatusCode::BAD_REQUEST, "userId query parameter is required").into_response();
    };

    ws.on_upgrade(move |socket| run_session(socket, user, state))
}

/// Drive one connection from Active to Closed.
async fn run_session(socket: WebSocket, user: UserId, state: AppState) {
    let conn = ConnId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    info!(user = %user, conn = %conn, "session connected");

    // Entering Active: register the outbound channel, join the personal
    // room, publish presence, then replay anything queued while offline.
    state.hub.register(conn, tx).await;
    state.hub.join(conn, RoomId::user(&user)).await;
    let online = state.presence.set_online(user, conn).await;
    state.hub.broadcast_all(ServerEvent::OnlineUsers(online)).await;
    state.dispatcher.replay_undelivered(user, conn).await;

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(event) = outbound else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, conn, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Binary frames and ping/pong are not part of the
                    // protocol; the transport answers pings itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(user = %user, error = %e, "socket read error");
                        break;
                    }
                }
            }
        }
    }

    info!(user = %user, conn = %conn, "session draining");

    state.hub.unregister(conn).await;
    // Presence survives the grace period; a reconnection within it
    // supersedes this handle and the check becomes a no-op.
    state
        .presence
        .schedule_offline_check(user, conn, state.config.grace_period, state.hub.clone());
}

async fn handle_frame(state: &AppState, conn: ConnId, raw: &str) {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "ignoring malformed client frame");
            return;
        }
    };

    match event {
        ClientEvent::SendMessage(payload) => {
            let local_id = payload.local_id.clone();
            let outcome = state
                .dispatcher
                .send(SendRequest {
                    sender: payload.sender,
                    receiver: payload.receiver,
                    group: payload.group,
                    text: payload.text,
                    media: Vec::new(),
                    reply_to: payload.reply_to,
                })
                .await;

            // The ack is the sole channel for send-path errors back to the
            // initiating client.
            let ack = match outcome {
                Ok(outcome) => SendAck::ok(local_id, outcome.message, outcome.delivered),
                Err(e) => SendAck::err(local_id, e.to_string()),
            };
            state.hub.emit_to_conn(conn, ServerEvent::SendAck(ack)).await;
        }
        ClientEvent::JoinRoom(room) => {
            state.hub.join(conn, room).await;
        }
        ClientEvent::LeaveRoom(room) => {
            state.hub.leave(conn, &room).await;
        }
        ClientEvent::Typing(payload) => {
            state.dispatcher.relay_typing(payload).await;
        }
        ClientEvent::MessageDelivered(id) => {
            state.dispatcher.message_delivered(id).await;
        }
        ClientEvent::MessageRead(id) => {
            state.dispatcher.message_read(id).await;
        }
    }
}
