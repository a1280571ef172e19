//! Session: connect/handshake, authentication and command multiplexing over
//! one Unix socket.
//!
//! The socket carries exactly one outstanding exchange. Every operation that
//! touches it (commands and event polling alike) goes through the `io` mutex,
//! so concurrent callers are serialized and replies always pair with the
//! command that produced them.

use std::{
    collections::{BTreeSet, VecDeque},
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
    sync::Mutex as AsyncMutex,
};

use crate::{
    discovery::{EndpointLocator, IpcSocketLocator},
    error::{Result, RpcError},
    events::{DEFAULT_SPEAKING_EXPIRY, EventKind, SpeakingTracker, route_event},
    protocol::{CommandPayload, Frame, Handshake, Opcode, RpcMessage},
};

/// Push events kept while commands await replies; the oldest go first.
pub const MAX_PENDING_EVENTS: usize = 256;

/// Timeouts applied by a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake and `AUTHORIZE` may wait on user approval in the peer
    pub handshake_timeout: Duration,
    pub command_timeout: Duration,
    /// Default wait of [`Session::receive_event`]
    pub event_poll_timeout: Duration,
    pub speaking_expiry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(10),
            event_poll_timeout: Duration::from_millis(100),
            speaking_expiry: DEFAULT_SPEAKING_EXPIRY,
        }
    }
}

/// Identity returned by a successful `AUTHENTICATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl AuthenticatedUser {
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Authenticated,
}

/// Open socket plus its read buffer.
///
/// Frames are parsed out of `read_buf`, and `read_buf` only grows through
/// `read_buf()` (cancel safe), so a timed-out read never loses frame alignment.
/// Writes are not cancel safe: `mid_write` stays set when a write is cut off,
/// and such a connection must not be used again.
struct Connection {
    stream: UnixStream,
    read_buf: BytesMut,
    /// Push events read while a command awaited its reply
    pending_events: VecDeque<RpcMessage>,
    mid_write: bool,
}

enum Inbound {
    Message(RpcMessage),
    Closed(Value),
}

impl Connection {
    async fn open(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(stream))
    }

    fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            pending_events: VecDeque::new(),
            mid_write: false,
        }
    }

    async fn send(&mut self, frame: &Frame) -> Result<()> {
        self.mid_write = true;
        frame.write_to(&mut self.stream).await?;
        self.mid_write = false;
        Ok(())
    }

    fn buffer_event(&mut self, message: RpcMessage) {
        if self.pending_events.len() >= MAX_PENDING_EVENTS
            && let Some(dropped) = self.pending_events.pop_front()
        {
            tracing::debug!("Event buffer full, dropping {:?}", dropped.evt);
        }
        self.pending_events.push_back(message);
    }

    async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = Frame::parse(&mut self.read_buf)? {
                return Ok(frame);
            }
            let read = self.stream.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                return Err(RpcError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "socket closed by peer",
                )));
            }
        }
    }

    /// Next `FRAME` or `CLOSE`; pings are answered inline.
    async fn next_inbound(&mut self) -> Result<Inbound> {
        loop {
            let frame = self.next_frame().await?;
            match frame.kind() {
                Some(Opcode::Frame) => {
                    let message = RpcMessage::from_value(frame.json()?)?;
                    return Ok(Inbound::Message(message));
                }
                Some(Opcode::Ping) => {
                    let pong = Frame {
                        opcode: Opcode::Pong.as_u32(),
                        payload: frame.payload.clone(),
                    };
                    self.send(&pong).await?;
                }
                Some(Opcode::Pong) => {}
                Some(Opcode::Close) => {
                    let reason = frame.json().unwrap_or(Value::Null);
                    return Ok(Inbound::Closed(reason));
                }
                Some(Opcode::Handshake) | None => {
                    return Err(RpcError::Protocol(format!(
                        "unexpected opcode {}",
                        frame.opcode
                    )));
                }
            }
        }
    }
}

#[derive(Default)]
struct AuthState {
    user: Option<AuthenticatedUser>,
}

/// RPC session with the voice-chat application.
///
/// All methods take `&self`; share it as `Arc<Session>` between the poller and
/// foreground callers.
pub struct Session {
    client_id: String,
    config: SessionConfig,
    locator: Arc<dyn EndpointLocator>,
    io: AsyncMutex<Option<Connection>>,
    /// Mirrors `io.is_some()`; only written while `io` is held
    connected: AtomicBool,
    auth: Mutex<AuthState>,
    speaking: Mutex<SpeakingTracker>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn new_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Session {
    /// Session that discovers the socket through the usual runtime locations.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_locator(
            client_id,
            SessionConfig::default(),
            Arc::new(IpcSocketLocator::from_env()),
        )
    }

    pub fn with_locator(
        client_id: impl Into<String>,
        config: SessionConfig,
        locator: Arc<dyn EndpointLocator>,
    ) -> Self {
        let speaking = SpeakingTracker::with_clock(
            config.speaking_expiry,
            Arc::new(voicelink_shared::time::SystemClock),
        );
        Self {
            client_id: client_id.into(),
            config,
            locator,
            io: AsyncMutex::new(None),
            connected: AtomicBool::new(false),
            auth: Mutex::new(AuthState::default()),
            speaking: Mutex::new(speaking),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the socket and perform the handshake.
    ///
    /// An existing connection is closed first. On any failure the session is
    /// left `Disconnected`.
    pub async fn connect(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        if let Some(previous) = self.reset_locked(&mut io) {
            close_quietly(previous).await;
        }

        let Some(path) = self.locator.locate() else {
            tracing::warn!("No IPC socket found for client {}", self.client_id);
            return Err(RpcError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "IPC socket not found",
            )));
        };

        let timeout = self.config.handshake_timeout;
        let connection = match tokio::time::timeout(timeout, self.handshake(&path)).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                tracing::warn!("Handshake with {} failed: {}", path.display(), e);
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("Handshake with {} timed out", path.display());
                return Err(RpcError::Timeout {
                    operation: "handshake",
                    after: timeout,
                });
            }
        };

        *io = Some(connection);
        self.connected.store(true, Ordering::Release);
        tracing::info!("Connected to {} as client {}", path.display(), self.client_id);
        Ok(())
    }

    async fn handshake(&self, path: &Path) -> Result<Connection> {
        let mut connection = Connection::open(path).await?;
        let hello = Frame::new(Opcode::Handshake, &Handshake::new(&self.client_id))?;
        connection.send(&hello).await?;

        match connection.next_inbound().await? {
            Inbound::Message(message) if message.is_ready() => Ok(connection),
            Inbound::Message(message) => Err(RpcError::Protocol(format!(
                "expected DISPATCH/READY, got cmd={:?} evt={:?}",
                message.cmd, message.evt
            ))),
            Inbound::Closed(reason) => {
                Err(RpcError::Protocol(format!("handshake rejected: {reason}")))
            }
        }
    }

    /// Send a command with a generated nonce and wait for its reply.
    ///
    /// `ERROR` replies are returned as-is; use [`RpcMessage::into_result`] to
    /// turn them into failures.
    pub async fn send_command(&self, cmd: &str, args: Option<Value>) -> Result<RpcMessage> {
        self.send_command_with_nonce(cmd, args, None).await
    }

    pub async fn send_command_with_nonce(
        &self,
        cmd: &str,
        args: Option<Value>,
        nonce: Option<String>,
    ) -> Result<RpcMessage> {
        let payload = CommandPayload::new(cmd, nonce.unwrap_or_else(new_nonce), args);
        let mut io = self.io.lock().await;
        self.exchange_locked(&mut io, payload, self.config.command_timeout)
            .await
    }

    /// Write one command and read until the reply with the same nonce.
    async fn exchange_locked(
        &self,
        io: &mut Option<Connection>,
        payload: CommandPayload,
        timeout: Duration,
    ) -> Result<RpcMessage> {
        let Some(connection) = io.as_mut() else {
            tracing::debug!("Command {} attempted while disconnected", payload.cmd);
            return Err(RpcError::NotConnected);
        };

        let frame = Frame::new(Opcode::Frame, &payload)?;
        let exchange = self.await_reply(connection, &frame, &payload.nonce);

        let outcome = match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!("Command {} timed out after {:?}", payload.cmd, timeout);
                self.abandon_if_torn(io).await;
                return Err(RpcError::Timeout {
                    operation: "command",
                    after: timeout,
                });
            }
        };

        match outcome {
            Ok(Inbound::Message(reply)) => {
                tracing::debug!(
                    "Command {} answered (evt={:?})",
                    payload.cmd,
                    reply.evt
                );
                Ok(reply)
            }
            Ok(Inbound::Closed(reason)) => Err(self.peer_closed(io, reason).await),
            Err(e) => {
                tracing::warn!("Command {} failed: {}", payload.cmd, e);
                self.abandon_if_torn(io).await;
                Err(e)
            }
        }
    }

    async fn await_reply(
        &self,
        connection: &mut Connection,
        frame: &Frame,
        nonce: &str,
    ) -> Result<Inbound> {
        connection.send(frame).await?;
        loop {
            match connection.next_inbound().await? {
                Inbound::Closed(reason) => return Ok(Inbound::Closed(reason)),
                Inbound::Message(message) if message.nonce() == Some(nonce) => {
                    return Ok(Inbound::Message(message));
                }
                Inbound::Message(message) if message.is_push_event() => {
                    self.route(&message);
                    connection.buffer_event(message);
                }
                Inbound::Message(message) => {
                    tracing::debug!(
                        "Discarding reply {:?} with stale nonce {:?}",
                        message.cmd,
                        message.nonce
                    );
                }
            }
        }
    }

    /// Request an authorization code.
    ///
    /// With a PKCE challenge the peer runs the public-client flow, so no client
    /// secret is needed for the token exchange.
    pub async fn authorize(&self, scopes: &[&str], code_challenge: Option<&str>) -> Result<String> {
        let mut args = json!({
            "client_id": self.client_id,
            "scopes": scopes,
        });
        if let (Some(challenge), Some(map)) = (code_challenge, args.as_object_mut()) {
            map.insert("code_challenge".to_string(), json!(challenge));
            map.insert("code_challenge_method".to_string(), json!("S256"));
        }

        let payload = CommandPayload::new("AUTHORIZE", new_nonce(), Some(args));
        let mut io = self.io.lock().await;
        // Waits on the approval dialog in the peer.
        let reply = self
            .exchange_locked(&mut io, payload, self.config.handshake_timeout)
            .await?;

        if let Some((_, message)) = reply.error_detail() {
            tracing::warn!("Authorization rejected: {}", message);
            return Err(RpcError::Auth(message));
        }
        reply
            .data_str("code")
            .map(str::to_string)
            .ok_or_else(|| RpcError::Auth("no authorization code in reply".to_string()))
    }

    /// Authenticate with an access token and record the returned identity.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthenticatedUser> {
        let payload = CommandPayload::new(
            "AUTHENTICATE",
            new_nonce(),
            Some(json!({"access_token": access_token})),
        );
        let mut io = self.io.lock().await;
        let reply = self
            .exchange_locked(&mut io, payload, self.config.command_timeout)
            .await?;

        if let Some((_, message)) = reply.error_detail() {
            tracing::warn!("Authentication rejected: {}", message);
            return Err(RpcError::Auth(message));
        }
        let user_value = reply
            .data
            .as_ref()
            .and_then(|data| data.get("user"))
            .cloned()
            .ok_or_else(|| RpcError::Auth("no user in authentication reply".to_string()))?;
        let user: AuthenticatedUser = serde_json::from_value(user_value)
            .map_err(|e| RpcError::Auth(format!("unreadable user in reply: {e}")))?;

        lock(&self.auth).user = Some(user.clone());
        tracing::info!("Authenticated as {} ({})", user.display_name(), user.id);
        Ok(user)
    }

    /// Subscribe to a push event. The ack must echo `evt`.
    pub async fn subscribe(&self, evt: &str, args: Option<Value>) -> Result<()> {
        let payload = CommandPayload::new("SUBSCRIBE", new_nonce(), args).with_event(evt);
        let mut io = self.io.lock().await;
        let reply = self
            .exchange_locked(&mut io, payload, self.config.command_timeout)
            .await?
            .into_result()?;

        if reply.evt() != Some(evt) {
            return Err(RpcError::Protocol(format!(
                "subscription to {evt} acknowledged as {:?}",
                reply.evt
            )));
        }
        tracing::debug!("Subscribed to {}", evt);
        Ok(())
    }

    /// Subscribe to speaking start/stop for one channel.
    pub async fn subscribe_speaking_events(&self, channel_id: &str) -> Result<()> {
        let args = json!({"channel_id": channel_id});
        self.subscribe(EventKind::SpeakingStart.as_str(), Some(args.clone()))
            .await?;
        self.subscribe(EventKind::SpeakingStop.as_str(), Some(args))
            .await
    }

    /// Set (or clear, with `None`) the rich presence of process `pid`.
    pub async fn set_activity(&self, pid: u32, activity: Option<Value>) -> Result<RpcMessage> {
        let args = json!({
            "pid": pid,
            "activity": activity.unwrap_or(Value::Null),
        });
        self.send_command("SET_ACTIVITY", Some(args))
            .await?
            .into_result()
    }

    /// Poll for one push event.
    ///
    /// Buffered events come first. `Ok(None)` means nothing arrived within
    /// `timeout` (default [`SessionConfig::event_poll_timeout`]).
    pub async fn receive_event(&self, timeout: Option<Duration>) -> Result<Option<RpcMessage>> {
        let mut io = self.io.lock().await;
        let Some(connection) = io.as_mut() else {
            return Err(RpcError::NotConnected);
        };
        if let Some(buffered) = connection.pending_events.pop_front() {
            return Ok(Some(buffered));
        }

        let wait = timeout.unwrap_or(self.config.event_poll_timeout);
        let inbound = match tokio::time::timeout(wait, connection.next_inbound()).await {
            Ok(Ok(inbound)) => inbound,
            Ok(Err(e)) => {
                self.abandon_if_torn(&mut io).await;
                return Err(e);
            }
            Err(_) => {
                if self.abandon_if_torn(&mut io).await {
                    return Err(RpcError::Transport(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "pong write interrupted",
                    )));
                }
                return Ok(None);
            }
        };

        match inbound {
            Inbound::Message(message) => {
                self.route(&message);
                Ok(Some(message))
            }
            Inbound::Closed(reason) => Err(self.peer_closed(&mut io, reason).await),
        }
    }

    /// Close the socket and drop all per-connection state. Idempotent.
    pub async fn disconnect(&self) {
        let mut io = self.io.lock().await;
        if let Some(connection) = self.reset_locked(&mut io) {
            close_quietly(connection).await;
            tracing::info!("Disconnected client {}", self.client_id);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn connection_state(&self) -> ConnectionState {
        if !self.is_connected() {
            ConnectionState::Disconnected
        } else if self.is_authenticated() {
            ConnectionState::Authenticated
        } else {
            ConnectionState::Connected
        }
    }

    pub fn is_authenticated(&self) -> bool {
        lock(&self.auth).user.is_some()
    }

    pub fn user(&self) -> Option<AuthenticatedUser> {
        lock(&self.auth).user.clone()
    }

    pub fn is_local_user(&self, user_id: &str) -> bool {
        lock(&self.auth)
            .user
            .as_ref()
            .is_some_and(|user| user.id == user_id)
    }

    pub fn is_speaking(&self, user_id: &str) -> bool {
        lock(&self.speaking).is_speaking(user_id)
    }

    pub fn speaking_users(&self) -> BTreeSet<String> {
        lock(&self.speaking).list_speaking()
    }

    fn route(&self, message: &RpcMessage) -> Option<EventKind> {
        route_event(message, &mut lock(&self.speaking))
    }

    /// Take the connection out and clear auth and speaking state.
    fn reset_locked(&self, io: &mut Option<Connection>) -> Option<Connection> {
        self.connected.store(false, Ordering::Release);
        lock(&self.auth).user = None;
        lock(&self.speaking).clear();
        io.take()
    }

    /// Drop the connection if a frame write was cut off. Returns whether it did.
    async fn abandon_if_torn(&self, io: &mut Option<Connection>) -> bool {
        if !io.as_ref().is_some_and(|connection| connection.mid_write) {
            return false;
        }
        tracing::warn!("Frame write interrupted, dropping the connection");
        if let Some(connection) = self.reset_locked(io) {
            close_quietly(connection).await;
        }
        true
    }

    async fn peer_closed(&self, io: &mut Option<Connection>, reason: Value) -> RpcError {
        tracing::warn!("Peer closed the connection: {}", reason);
        if let Some(connection) = self.reset_locked(io) {
            close_quietly(connection).await;
        }
        RpcError::Protocol(format!("connection closed by peer: {reason}"))
    }
}

async fn close_quietly(mut connection: Connection) {
    if let Err(e) = connection.stream.shutdown().await {
        tracing::debug!("Ignoring socket shutdown error: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FixedEndpoint;

    fn detached_session() -> Session {
        Session::with_locator(
            "1234",
            SessionConfig::default(),
            Arc::new(FixedEndpoint::new("/nonexistent/discord-ipc-0")),
        )
    }

    #[tokio::test]
    async fn test_commands_fail_when_not_connected() {
        // テスト項目: 未接続のセッションでは socket に触れずに NotConnected が返る
        // given (前提条件):
        let session = detached_session();

        // when (操作):
        let command = session.send_command("GET_GUILDS", None).await;
        let event = session.receive_event(None).await;

        // then (期待する結果):
        assert!(matches!(command, Err(RpcError::NotConnected)));
        assert!(matches!(event, Err(RpcError::NotConnected)));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_without_socket_stays_disconnected() {
        // テスト項目: socket が見つからない場合は Transport エラーで未接続のまま
        // given (前提条件):
        let session = detached_session();

        // when (操作):
        let result = session.connect().await;

        // then (期待する結果):
        assert!(matches!(result, Err(RpcError::Transport(_))));
        assert!(!session.is_connected());
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        // テスト項目: 未接続でも disconnect を繰り返し呼べる
        // given (前提条件):
        let session = detached_session();

        // when (操作):
        session.disconnect().await;
        session.disconnect().await;

        // then (期待する結果):
        assert!(!session.is_connected());
        assert!(session.speaking_users().is_empty());
    }

    #[test]
    fn test_display_name_prefers_global_name() {
        // テスト項目: global_name があれば表示名として使われる
        // given (前提条件):
        let mut user = AuthenticatedUser {
            id: "1".to_string(),
            username: "alice_01".to_string(),
            global_name: Some("Alice".to_string()),
            avatar: None,
        };

        // when (操作):
        let with_global = user.display_name().to_string();
        user.global_name = None;

        // then (期待する結果):
        assert_eq!(with_global, "Alice");
        assert_eq!(user.display_name(), "alice_01");
    }

    #[tokio::test]
    async fn test_pending_events_drop_oldest_when_full() {
        // テスト項目: 保留イベントが上限に達すると最も古いものから捨てられる
        // given (前提条件):
        let (stream, _peer) = UnixStream::pair().unwrap();
        let mut connection = Connection::from_stream(stream);
        let event = |n: usize| {
            RpcMessage::from_value(json!({
                "cmd": "DISPATCH",
                "evt": "SPEAKING_START",
                "data": {"user_id": n.to_string()}
            }))
            .unwrap()
        };

        // when (操作):
        for n in 0..MAX_PENDING_EVENTS + 3 {
            connection.buffer_event(event(n));
        }

        // then (期待する結果):
        assert_eq!(connection.pending_events.len(), MAX_PENDING_EVENTS);
        let oldest = connection.pending_events.front().unwrap();
        assert_eq!(oldest.data.as_ref().unwrap()["user_id"], "3");
        let newest = connection.pending_events.back().unwrap();
        assert_eq!(
            newest.data.as_ref().unwrap()["user_id"],
            (MAX_PENDING_EVENTS + 2).to_string()
        );
    }

    #[test]
    fn test_nonces_are_unique() {
        // テスト項目: 生成される nonce は毎回異なる
        // given (前提条件):
        let first = new_nonce();

        // when (操作):
        let second = new_nonce();

        // then (期待する結果):
        assert_ne!(first, second);
        assert_eq!(first.len(), 32);
    }
}
