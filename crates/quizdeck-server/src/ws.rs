//! Websocket orchestrator: handshake, authentication, and the pumps between
//! the socket and the owning session actor. All game logic lives in the
//! actor; this module only classifies connections and translates frames
//! into commands.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use quizdeck_core::error::CommandError;
use quizdeck_core::net::messages::{
    ClientMessage, ErrorMsg, Role, ServerMessage,
};
use quizdeck_core::net::protocol::{decode_client_envelope, encode_server_message};
use quizdeck_core::player::PlayerId;

use crate::hub::{ConnId, ConnRole};
use crate::session::{Command, HostAction, SessionHandle};
use crate::state::{AppState, ConnectionGuard};

/// How long a new connection gets to complete the `HELLO` handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(std::sync::Arc::clone(&state.ws_connection_count));
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The guard above already counted this connection; past the cap it is
    // turned away before any handshake work.
    if state.ws_connection_count.load(Ordering::Relaxed) > state.config.limits.max_ws_connections {
        tracing::warn!(
            cap = state.config.limits.max_ws_connections,
            "Connection cap reached, rejecting websocket"
        );
        let _ = send_direct(&mut ws_sender, &error_msg(&CommandError::SessionUnavailable)).await;
        return;
    }

    // -- handshake ---------------------------------------------------------
    let hello = match read_hello(&mut ws_receiver).await {
        Some(hello) => hello,
        None => {
            let _ = send_direct(
                &mut ws_sender,
                &error_msg(&CommandError::BadRequest("expected HELLO".into())),
            )
            .await;
            return;
        }
    };

    let handle = {
        let mut registry = state.registry.write().await;
        registry.lookup_or_rehydrate(&hello.session_code).await
    };
    let Some(handle) = handle else {
        let _ = send_direct(&mut ws_sender, &error_msg(&CommandError::SessionUnavailable)).await;
        return;
    };

    let (conn_role, reconnected_player) = match hello.role {
        Role::Host => {
            if hello.token.as_deref() != Some(handle.host_token.as_str()) {
                let _ =
                    send_direct(&mut ws_sender, &error_msg(&CommandError::Unauthorized)).await;
                return;
            }
            (ConnRole::Host, None)
        }
        Role::Display => (ConnRole::Display, None),
        Role::Player => match hello.token {
            None => (ConnRole::Pending, None),
            Some(token) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                handle.send(Command::ResumePlayer {
                    token,
                    reply: reply_tx,
                });
                match reply_rx.await {
                    Ok(Ok(player_id)) => (ConnRole::Player(player_id), Some(player_id)),
                    Ok(Err(e)) => {
                        let _ = send_direct(&mut ws_sender, &error_msg(&e)).await;
                        return;
                    }
                    Err(_) => {
                        let _ = send_direct(
                            &mut ws_sender,
                            &error_msg(&CommandError::SessionUnavailable),
                        )
                        .await;
                        return;
                    }
                }
            }
        },
    };

    // -- register with the hub --------------------------------------------
    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);
    let conn_id = {
        let mut hub = state.hub.write().await;
        match hub.register(&handle.code, conn_role, tx) {
            Some(conn_id) => conn_id,
            None => {
                let _ = send_direct(
                    &mut ws_sender,
                    &error_msg(&CommandError::SessionUnavailable),
                )
                .await;
                return;
            }
        }
    };

    spawn_writer(ws_sender, rx);

    // Reconnecting players first get the bounded broadcast tail, then the
    // actor's synthesized snapshot addressed to this connection only.
    if reconnected_player.is_some() {
        state.hub.read().await.replay_tail(&handle.code, conn_id);
    }
    handle.send(Command::Connected {
        conn: conn_id,
        role: conn_role,
    });
    handle.send(Command::GetState {
        conn: conn_id,
        player_id: reconnected_player,
    });

    tracing::info!(
        session = %handle.code,
        conn_id,
        role = ?conn_role,
        "Connection established"
    );

    // -- inbound pump ------------------------------------------------------
    let final_role = read_loop(&mut ws_receiver, &state, &handle, conn_id, conn_role).await;

    state.hub.write().await.unregister(&handle.code, conn_id);
    handle.send(Command::Disconnected {
        conn: conn_id,
        role: final_role,
    });
    tracing::info!(session = %handle.code, conn_id, "Connection closed");
}

struct Hello {
    session_code: String,
    role: Role,
    token: Option<String>,
}

async fn read_hello(receiver: &mut SplitStream<WebSocket>) -> Option<Hello> {
    let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, receiver.next())
        .await
        .ok()??;
    let text = match frame.ok()? {
        Message::Text(text) => text,
        _ => return None,
    };
    match decode_client_envelope(&text).ok()?.msg {
        ClientMessage::Hello(hello) => Some(Hello {
            session_code: hello.session_code,
            role: hello.role,
            token: hello.token,
        }),
        _ => None,
    }
}

/// Relay frames from the per-connection channel to the socket until either
/// side goes away. Dropping the hub sender (overflow close, room teardown)
/// ends this task and with it the socket.
fn spawn_writer(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Bytes>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match std::str::from_utf8(&frame) {
                Ok(text) => text.to_string(),
                Err(_) => continue,
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });
}

/// Translate inbound frames into commands until the connection drops.
/// Returns the role as of disconnect (a pending connection may have bound a
/// player via `PLAYER_JOIN`).
async fn read_loop(
    receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    handle: &SessionHandle,
    conn_id: ConnId,
    mut role: ConnRole,
) -> ConnRole {
    while let Some(Ok(frame)) = receiver.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let msg = match decode_client_envelope(&text) {
            Ok(envelope) => envelope.msg,
            Err(e) => {
                tracing::debug!(conn_id, error = %e, "Undecodable frame");
                let err = CommandError::BadRequest("undecodable frame".into());
                state
                    .hub
                    .read()
                    .await
                    .send_to_conn(&handle.code, conn_id, &error_msg(&err));
                continue;
            }
        };

        match msg {
            ClientMessage::Hello(_) => {
                let err = CommandError::BadRequest("handshake already complete".into());
                state
                    .hub
                    .read()
                    .await
                    .send_to_conn(&handle.code, conn_id, &error_msg(&err));
            }
            ClientMessage::GetSessionState(_) => {
                handle.send(Command::GetState {
                    conn: conn_id,
                    player_id: bound_player(&role),
                });
            }

            // Host commands require the host connection.
            ClientMessage::HostStart(_)
            | ClientMessage::HostLock(_)
            | ClientMessage::HostReveal(_)
            | ClientMessage::HostShowScoreboard(_)
            | ClientMessage::HostNext(_)
            | ClientMessage::HostCancelItem(_)
            | ClientMessage::HostPause(_)
            | ClientMessage::HostResume(_)
            | ClientMessage::HostEnd(_)
            | ClientMessage::HostStartMinigame(_) => {
                if role != ConnRole::Host {
                    tracing::warn!(conn_id, "Non-host connection sent a host command");
                    break;
                }
                let action = match msg {
                    ClientMessage::HostStart(_) => HostAction::Start,
                    ClientMessage::HostLock(_) => HostAction::Lock,
                    ClientMessage::HostReveal(_) => HostAction::Reveal,
                    ClientMessage::HostShowScoreboard(m) => HostAction::ShowScoreboard(m.scope),
                    ClientMessage::HostNext(_) => HostAction::Next,
                    ClientMessage::HostCancelItem(_) => HostAction::CancelItem,
                    ClientMessage::HostPause(_) => HostAction::Pause,
                    ClientMessage::HostResume(_) => HostAction::Resume,
                    ClientMessage::HostEnd(_) => HostAction::End,
                    ClientMessage::HostStartMinigame(m) => HostAction::StartMinigame(m.mode),
                    _ => unreachable!("host arm covers exactly the host messages"),
                };
                handle.send(Command::Host {
                    conn: conn_id,
                    action,
                });
            }

            ClientMessage::PlayerJoin(join) => {
                if role != ConnRole::Pending {
                    tracing::debug!(conn_id, "Join from an already-bound connection");
                    continue;
                }
                let (reply_tx, reply_rx) = oneshot::channel();
                handle.send(Command::PlayerJoin {
                    conn: conn_id,
                    name: join.name,
                    avatar: join.avatar,
                    reply: reply_tx,
                });
                if let Ok(Ok(player_id)) = reply_rx.await {
                    role = ConnRole::Player(player_id);
                }
            }
            ClientMessage::PlayerAnswer(answer) => {
                let Some(player_id) = bound_player(&role) else {
                    continue;
                };
                handle.send(Command::PlayerAnswer {
                    conn: conn_id,
                    player_id,
                    answer: answer.answer,
                });
            }
            ClientMessage::PlayerLeave(_) => {
                if let Some(player_id) = bound_player(&role) {
                    handle.send(Command::PlayerLeave { player_id });
                }
                break;
            }
            ClientMessage::SwanChaseInput(input) => {
                if let Some(player_id) = bound_player(&role) {
                    handle.send(Command::SwanInput {
                        player_id,
                        input: input.input,
                    });
                }
            }
        }
    }
    role
}

fn bound_player(role: &ConnRole) -> Option<PlayerId> {
    match role {
        ConnRole::Player(player_id) => Some(*player_id),
        _ => None,
    }
}

fn error_msg(err: &CommandError) -> ServerMessage {
    ServerMessage::Error(ErrorMsg {
        code: err.code(),
        message: err.to_string(),
    })
}

async fn send_direct(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match encode_server_message(msg) {
        Ok(text) => sender.send(Message::Text(text.into())).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode direct message");
            Ok(())
        }
    }
}
