use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use quizdeck_core::net::messages::{
    ClientMessage, EmptyMsg, HelloMsg, PlayerJoinMsg, Role, ServerMessage, SessionStateMsg,
};
use quizdeck_core::net::protocol::{decode_server_envelope, encode_client_message};
use quizdeck_core::quiz::{Quiz, ScoringSettings};

use quizdeck_server::config::ServerConfig;
use quizdeck_server::registry::CreatedSession;
use quizdeck_server::state::AppState;
use quizdeck_server::{build_app, spawn_idle_session_cleanup, spawn_registry_maintenance};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server on an ephemeral port with the in-memory store.
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::default()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state, on_end_rx) = build_app(config);
        spawn_registry_maintenance(state.clone(), on_end_rx);
        spawn_idle_session_cleanup(state.clone());

        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the listener a moment to start accepting.
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _server: server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn seed_quiz(&self, quiz: Quiz) {
        self.state.store.put_quiz(quiz).await.unwrap();
    }

    pub async fn create_session(
        &self,
        quiz_id: Uuid,
        settings: Option<ScoringSettings>,
    ) -> CreatedSession {
        self.state
            .registry
            .write()
            .await
            .create_session(quiz_id, settings)
            .await
            .unwrap()
    }
}

/// Scoring settings without streaks or podium, so point assertions stay
/// simple arithmetic.
pub fn plain_settings() -> ScoringSettings {
    ScoringSettings {
        streak_enabled: false,
        speed_podium_enabled: false,
        ..ScoringSettings::default()
    }
}

pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn send_client(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Text(encoded.into())).await.unwrap();
}

pub async fn send_hello(stream: &mut WsStream, code: &str, role: Role, token: Option<String>) {
    send_client(
        stream,
        &ClientMessage::Hello(HelloMsg {
            session_code: code.to_string(),
            role,
            token,
        }),
    )
    .await;
}

/// Read the next server message (5 s deadline).
pub async fn recv_server(stream: &mut WsStream) -> ServerMessage {
    try_recv_server(stream, 5_000)
        .await
        .expect("timed out waiting for server message")
}

/// Read the next server message, or `None` on timeout.
pub async fn try_recv_server(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return decode_server_envelope(&text).unwrap().msg;
                }
                Some(Ok(Message::Close(_))) | None => panic!("WebSocket closed unexpectedly"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {e}"),
            }
        }
    })
    .await
    .ok()
}

/// Skip messages until one matches the predicate.
pub async fn recv_until<F>(stream: &mut WsStream, mut matches: F) -> ServerMessage
where
    F: FnMut(&ServerMessage) -> bool,
{
    for _ in 0..50 {
        let msg = recv_server(stream).await;
        if matches(&msg) {
            return msg;
        }
    }
    panic!("no matching message within 50 frames");
}

/// Wait for a `SESSION_STATE` snapshot that carries a `you` block.
pub async fn recv_own_state(stream: &mut WsStream) -> SessionStateMsg {
    let msg = recv_until(stream, |m| {
        matches!(m, ServerMessage::SessionState(s) if s.you.is_some())
    })
    .await;
    match msg {
        ServerMessage::SessionState(state) => *state,
        _ => unreachable!(),
    }
}

/// Connect a fresh player: handshake, join, and return the stream plus the
/// identity the server assigned.
pub async fn join_player(
    url: &str,
    code: &str,
    name: &str,
) -> (WsStream, SessionStateMsg) {
    let mut stream = ws_connect(url).await;
    send_hello(&mut stream, code, Role::Player, None).await;
    send_client(
        &mut stream,
        &ClientMessage::PlayerJoin(PlayerJoinMsg {
            name: name.to_string(),
            avatar: "swan".to_string(),
        }),
    )
    .await;
    let state = recv_own_state(&mut stream).await;
    (stream, state)
}

/// Connect the host with its owner token.
pub async fn connect_host(url: &str, code: &str, host_token: &str) -> WsStream {
    let mut stream = ws_connect(url).await;
    send_hello(&mut stream, code, Role::Host, Some(host_token.to_string())).await;
    // First frame for any new connection is the state snapshot.
    let _ = recv_until(&mut stream, |m| matches!(m, ServerMessage::SessionState(_))).await;
    stream
}

pub async fn host_send(stream: &mut WsStream, msg: ClientMessage) {
    send_client(stream, &msg).await;
}

/// Shorthand for the parameterless host commands.
pub fn host_start() -> ClientMessage {
    ClientMessage::HostStart(EmptyMsg {})
}

pub fn host_lock() -> ClientMessage {
    ClientMessage::HostLock(EmptyMsg {})
}

pub fn host_reveal() -> ClientMessage {
    ClientMessage::HostReveal(EmptyMsg {})
}

pub fn host_next() -> ClientMessage {
    ClientMessage::HostNext(EmptyMsg {})
}

pub fn host_end() -> ClientMessage {
    ClientMessage::HostEnd(EmptyMsg {})
}
