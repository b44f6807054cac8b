//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::matchmaking::EnqueueError;
use crate::registry::{RoomRecord, RoomStatus};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};
use crate::ws::transport::Transport;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Optional display name; a placeholder is generated when absent
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query.name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, name: Option<String>, state: AppState) {
    let session_id = Uuid::new_v4();
    let display_name =
        name.unwrap_or_else(|| format!("Player_{}", &session_id.to_string()[..8]));

    let identity = state.users.assign(session_id, display_name);
    let user_id = identity.user_id;
    info!(session_id = %session_id, user_id = %user_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Register the outbound channel before anything can address this session
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMsg>();
    state.transport.register(session_id, out_tx);

    // Writer task: outbound channel -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(session_id = %session_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    if let Err(e) = state.transport.send(
        session_id,
        &ServerMsg::Welcome {
            user_id,
            server_time: unix_millis(),
        },
    ) {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
    }

    let rate_limiter = ConnectionRateLimiter::new();

    // Reader loop: WebSocket -> dispatch
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMsg>(&text) {
                Ok(client_msg) => {
                    if matches!(client_msg, ClientMsg::Input(_)) && !rate_limiter.check_input() {
                        warn!(user_id = %user_id, "Rate limited input message");
                        continue;
                    }
                    dispatch(&state, session_id, user_id, client_msg);
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                    reply(
                        &state,
                        session_id,
                        ServerMsg::Error {
                            code: "bad_message".to_string(),
                            message: "Unrecognized message".to_string(),
                        },
                    );
                }
            },
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                debug!(user_id = %user_id, "WebSocket keepalive");
            }
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    cleanup(&state, session_id, user_id);
    writer_handle.abort();

    info!(session_id = %session_id, user_id = %user_id, "WebSocket connection closed");
}

/// Route one client message to the owning component
fn dispatch(state: &AppState, session_id: Uuid, user_id: Uuid, msg: ClientMsg) {
    match msg {
        ClientMsg::JoinQueue { display_name } => {
            let name = display_name.or_else(|| {
                state
                    .users
                    .lookup_by_user(user_id)
                    .map(|u| u.display_name)
            });
            match state
                .matchmaking
                .enqueue(user_id, name.unwrap_or_else(|| "Unknown".to_string()))
            {
                Ok(position) => reply(state, session_id, ServerMsg::Queued { position }),
                Err(EnqueueError::AlreadyQueued) => send_error(
                    state,
                    session_id,
                    "already_queued",
                    "Already waiting in the match queue",
                ),
                Err(EnqueueError::AlreadyInRoom) => send_error(
                    state,
                    session_id,
                    "already_in_room",
                    "Leave the current room before queueing",
                ),
            }
        }
        ClientMsg::LeaveQueue => {
            if !state.matchmaking.dequeue(user_id) {
                debug!(user_id = %user_id, "LeaveQueue for user not in queue");
            }
        }
        ClientMsg::CreateRoom { name, max_players } => {
            if in_room(state, user_id) {
                send_error(
                    state,
                    session_id,
                    "already_in_room",
                    "Leave the current room first",
                );
                return;
            }
            let room = state.rooms.create(&name, user_id, max_players);
            state.users.set_room(user_id, Some(room.room_id));
            reply(state, session_id, ServerMsg::RoomUpdate { room });
        }
        ClientMsg::JoinRoom { room_id } => {
            if in_room(state, user_id) {
                send_error(
                    state,
                    session_id,
                    "already_in_room",
                    "Leave the current room first",
                );
                return;
            }
            if !state.rooms.join(room_id, user_id) {
                send_error(state, session_id, "join_failed", "Room is full or missing");
                return;
            }
            state.users.set_room(user_id, Some(room_id));
            if let Some(room) = state.rooms.get(room_id) {
                let playing = room.status == RoomStatus::Playing;
                broadcast_room_update(state, room);
                if playing {
                    // Rejoining a live room: resend the sync start with a
                    // fresh snapshot
                    state.sessions.request_reconnect(user_id);
                }
            }
        }
        ClientMsg::LeaveRoom => {
            if !leave_current_room(state, user_id) {
                debug!(user_id = %user_id, "LeaveRoom for user not in a room");
            }
        }
        ClientMsg::ListRooms => {
            let rooms = state.rooms.list();
            reply(state, session_id, ServerMsg::RoomList { rooms });
        }
        ClientMsg::Input(single) => {
            state.sessions.route_input(user_id, single);
        }
        ClientMsg::Ping { t } => {
            reply(state, session_id, ServerMsg::Pong { t });
        }
    }
}

/// Take the user out of their current room, telling the remaining members.
/// False if the user was not in a room.
fn leave_current_room(state: &AppState, user_id: Uuid) -> bool {
    let Some(room_id) = state
        .users
        .lookup_by_user(user_id)
        .and_then(|u| u.current_room_id)
    else {
        return false;
    };

    state.rooms.leave(room_id, user_id);
    state.users.set_room(user_id, None);

    // The registry auto-deletes a room once it empties; any session still
    // running for it gets an explicit stop rather than waiting for its
    // reachability check
    match state.rooms.get(room_id) {
        Some(room) => broadcast_room_update(state, room),
        None => state.sessions.stop_session(room_id, "room empty"),
    }
    true
}

fn broadcast_room_update(state: &AppState, room: RoomRecord) {
    let member_ids = room.member_ids.clone();
    let msg = ServerMsg::RoomUpdate { room };
    for member in member_ids {
        let Some(session_id) = state.users.session_for_user(member) else {
            continue;
        };
        if let Err(e) = state.transport.send(session_id, &msg) {
            debug!(user_id = %member, error = %e, "Room update send failed");
        }
    }
}

fn in_room(state: &AppState, user_id: Uuid) -> bool {
    state
        .users
        .lookup_by_user(user_id)
        .map(|u| u.current_room_id.is_some())
        .unwrap_or(false)
}

fn reply(state: &AppState, session_id: Uuid, msg: ServerMsg) {
    if let Err(e) = state.transport.send(session_id, &msg) {
        debug!(session_id = %session_id, error = %e, "Reply send failed");
    }
}

fn send_error(state: &AppState, session_id: Uuid, code: &str, message: &str) {
    reply(
        state,
        session_id,
        ServerMsg::Error {
            code: code.to_string(),
            message: message.to_string(),
        },
    );
}

/// Tear the user out of queue, room, and registries on disconnect. A room
/// left empty lets its session stop itself on the next reachability check.
fn cleanup(state: &AppState, session_id: Uuid, user_id: Uuid) {
    state.matchmaking.dequeue(user_id);
    leave_current_room(state, user_id);
    state.users.remove_by_session(session_id);
    state.transport.unregister(session_id);
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
