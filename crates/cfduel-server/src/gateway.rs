use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use cfduel_core::events::{ClientEvent, ServerEvent};
use cfduel_core::room::RoomStatus;
use cfduel_core::user::User;

use crate::game_service::CheckOutcome;
use crate::hub::SessionId;
use crate::outbox::Outbox;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade. Identity comes from the signed token in the
/// query string; connections without one are rejected before the
/// session exists.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let Some(user) = authenticate(&state, query.token.as_deref()).await else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
        .into_response()
}

async fn authenticate(state: &AppState, token: Option<&str>) -> Option<User> {
    let user_id = state.auth.verify(token?)?;
    state.store.find_user(user_id).await.ok().flatten()
}

async fn handle_socket(socket: WebSocket, state: AppState, user: User) {
    let session_id: SessionId = Uuid::new_v4();
    let (ws_sender, mut ws_receiver) = socket.split();

    let outbox = Outbox::new(state.config.limits.outbox_capacity);
    spawn_writer(ws_sender, outbox.clone());

    state.hub.register_session(session_id, user.id, outbox);
    state
        .hub
        .send_to_session(session_id, ServerEvent::ConnectionSuccess);

    // A fresh session cancels any pending removals for this user
    for room_code in state.hub.cancel_grace_of(user.id) {
        state.hub.publish(
            &room_code,
            &ServerEvent::PlayerReconnected {
                user_id: user.id,
                handle: user.handle.clone(),
            },
        );
        tracing::info!(room = %room_code, user = %user.handle, "Player reconnected within grace");
    }

    tracing::info!(session = %session_id, user = %user.handle, "Session connected");

    let check_in_flight = Arc::new(AtomicBool::new(false));
    read_loop(&mut ws_receiver, &state, session_id, &user, &check_in_flight).await;

    if let Some(exit) = state.hub.unregister_session(session_id)
        && exit.last_session
    {
        open_grace_tickets(&state, &user).await;
    }
    tracing::info!(session = %session_id, user = %user.handle, "Session disconnected");
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    outbox: Outbox,
) {
    tokio::spawn(async move {
        while let Some(event) = outbox.next().await {
            let frame = match serde_json::to_string(&event) {
                Ok(f) => f,
                Err(e) => {
                    tracing::error!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                },
            };
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    session_id: SessionId,
    user: &User,
    check_in_flight: &Arc<AtomicBool>,
) {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let event: ClientEvent = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(e) => {
                state.hub.send_to_session(
                    session_id,
                    ServerEvent::Error {
                        message: format!("Unrecognized event: {e}"),
                    },
                );
                continue;
            },
        };

        dispatch(state, session_id, user, event, check_in_flight).await;
    }
}

async fn dispatch(
    state: &AppState,
    session_id: SessionId,
    user: &User,
    event: ClientEvent,
    check_in_flight: &Arc<AtomicBool>,
) {
    match event {
        ClientEvent::JoinRoom { room_code } => {
            match state.store.find_room(&room_code).await {
                Ok(Some(room)) => {
                    state.hub.subscribe(&room_code, session_id);
                    // Re-joining a running game as a lapsed participant is allowed
                    let result = if room.status == RoomStatus::Started
                        && !room.is_participant(user.id)
                    {
                        state.rooms.join_room(&room_code, user.id).await.map(|_| ())
                    } else {
                        state.rooms.broadcast_room_update(&room).await
                    };
                    if let Err(e) = result {
                        send_error(state, session_id, e.to_string());
                    }
                },
                Ok(None) => send_error(state, session_id, format!("Room {room_code} not found")),
                Err(e) => send_error(state, session_id, e.to_string()),
            }
        },
        ClientEvent::LeaveRoom { room_code } => {
            state.hub.unsubscribe(&room_code, session_id);
            if let Err(e) = state.rooms.leave_room(&room_code, user.id).await {
                send_error(state, session_id, e.to_string());
            }
        },
        ClientEvent::StartGame { room_code } => {
            if let Err(e) = state.games.start_game(&room_code, user.id).await {
                send_error(state, session_id, e.to_string());
            }
        },
        ClientEvent::CheckProblem {
            room_code,
            contest_id,
            index,
        } => {
            // One verification in flight per session
            if check_in_flight.swap(true, Ordering::SeqCst) {
                send_error(
                    state,
                    session_id,
                    "A check is already in progress, please wait".to_string(),
                );
                return;
            }
            let state = state.clone();
            let user = user.clone();
            let in_flight = Arc::clone(check_in_flight);
            tokio::spawn(async move {
                run_check(&state, session_id, &user, &room_code, contest_id, &index).await;
                in_flight.store(false, Ordering::SeqCst);
            });
        },
    }
}

/// Run one verification and answer the requester privately. Successful
/// solves were already broadcast by the service before this returns.
async fn run_check(
    state: &AppState,
    session_id: SessionId,
    user: &User,
    room_code: &str,
    contest_id: u32,
    index: &str,
) {
    match state
        .games
        .check_submission(room_code, user, contest_id, index)
        .await
    {
        Ok(CheckOutcome::Scored { .. }) => {},
        Ok(CheckOutcome::AlreadyScored { points }) => {
            state.hub.send_to_session(
                session_id,
                ServerEvent::ProblemSolved {
                    user_id: user.id,
                    handle: user.handle.clone(),
                    contest_id,
                    index: index.to_string(),
                    points,
                },
            );
        },
        Ok(CheckOutcome::NotSolved) => {
            state.hub.send_to_session(
                session_id,
                ServerEvent::ProblemNotSolved {
                    contest_id,
                    index: index.to_string(),
                    message: "No accepted submission found for this problem yet".to_string(),
                },
            );
        },
        Err(e) => send_error(state, session_id, e.to_string()),
    }
}

/// Open a grace ticket for each live room the departed user
/// participates in. Expiry runs the ordinary leave path unless a
/// reconnect claims the ticket first.
async fn open_grace_tickets(state: &AppState, user: &User) {
    let mut rooms = Vec::new();
    for status in [RoomStatus::Waiting, RoomStatus::Started] {
        match state
            .store
            .find_room_by_participant_and_status(user.id, status)
            .await
        {
            Ok(Some(room)) => rooms.push(room),
            Ok(None) => {},
            Err(e) => {
                tracing::warn!(user = %user.handle, error = %e, "Grace room lookup failed");
            },
        }
    }

    for room in rooms {
        let code = &room.code;
        let period = match room.status {
            RoomStatus::Started => state.config.game.grace_started_secs,
            RoomStatus::Waiting => state.config.game.grace_waiting_secs,
            RoomStatus::Ended => continue,
        };

        let task_state = state.clone();
        let task_code = code.clone();
        let task_user = user.clone();
        let expire_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(period)).await;
            // Losing the claim means a reconnect got there first
            if !task_state.hub.claim_grace(&task_code, task_user.id) {
                return;
            }
            tracing::info!(
                room = %task_code,
                user = %task_user.handle,
                "Grace period expired, removing participant"
            );
            if let Err(e) = task_state.rooms.leave_room(&task_code, task_user.id).await {
                tracing::warn!(room = %task_code, error = %e, "Grace removal failed");
            }
        });

        state.hub.open_grace(code, user.id, expire_task);
        state.hub.publish(
            code,
            &ServerEvent::PlayerDisconnected {
                user_id: user.id,
                handle: user.handle.clone(),
                grace_period: period,
            },
        );
        tracing::info!(
            room = %code,
            user = %user.handle,
            grace_secs = period,
            "Last session dropped, grace ticket opened"
        );
    }
}

fn send_error(state: &AppState, session_id: SessionId, message: String) {
    state
        .hub
        .send_to_session(session_id, ServerEvent::Error { message });
}
