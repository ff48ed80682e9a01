//! Notification socket with state management, heartbeat and auto-reconnect.

use std::sync::Arc;
use std::time::Duration;

use fva_shared::{
    Action, ApiError, ServerFrame, CLOSE_CODE_AUTH_REJECTED, HEARTBEAT_PING, HEARTBEAT_PONG,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::correlator::{CallResult, Correlator};
use super::dispatch::{HandlerId, PushHandlers};
use crate::config::{ClientConfig, ReconnectConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a graceful close may take before the socket is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection state for the notification socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnect budget exhausted. Only an explicit `connect()` leaves it.
    FailedPermanently { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Why a socket session (or connection attempt) ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Closed,
    /// Handshake refused with 401/403, or a 4001 close. The server also
    /// closes with 4001 on unhandled exceptions, so this is a claim the
    /// session verifies before logging out.
    AuthRejected(String),
}

struct LoopHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

struct Inner {
    heartbeat_interval: Duration,
    reconnect: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    correlator: Correlator,
    handlers: PushHandlers,
    /// Called on each attempt; `None` means no credentials.
    url_builder: Box<dyn Fn() -> Option<String> + Send + Sync>,
    on_auth_rejected: Box<dyn Fn(String) + Send + Sync>,
    task: Mutex<Option<LoopHandle>>,
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            crate::log_debug!("Notification socket state: {:?} -> {:?}", previous, next);
        }
    }

    fn handle_text(&self, text: &str) {
        match ServerFrame::parse(text) {
            Ok(ServerFrame::Response { request_id, data }) => {
                self.correlator.resolve(&request_id, data);
            }
            Ok(ServerFrame::Push(message)) => {
                crate::log_debug!("Push message: {}", message.kind.as_str());
                self.handlers.dispatch(&message);
            }
            Err(_) if text == HEARTBEAT_PONG => {
                crate::log_debug!("Heartbeat acknowledged");
            }
            Err(e) => {
                crate::log_warn!("{}", ApiError::MalformedFrame(e.to_string()));
            }
        }
    }
}

/// The single notification socket of a session.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager. Nothing connects until [`connect`](Self::connect).
    ///
    /// `url_builder` is called before every attempt so a refreshed token is
    /// picked up; `on_auth_rejected` runs when the server refuses the token
    /// or closes with 4001. The loop has stopped by then; a caller that
    /// finds the token still valid may [`connect`](Self::connect) again.
    pub fn new(
        config: &ClientConfig,
        url_builder: impl Fn() -> Option<String> + Send + Sync + 'static,
        on_auth_rejected: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let heartbeat_interval = if config.heartbeat_interval.is_zero() {
            let fallback = ClientConfig::default().heartbeat_interval;
            crate::log_warn!("Heartbeat interval must be positive, using {:?}", fallback);
            fallback
        } else {
            config.heartbeat_interval
        };
        Self {
            inner: Arc::new(Inner {
                heartbeat_interval,
                reconnect: config.reconnect.clone(),
                state,
                correlator: Correlator::new(config.request_timeout),
                handlers: PushHandlers::default(),
                url_builder: Box::new(url_builder),
                on_auth_rejected: Box::new(on_auth_rejected),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().is_connected()
    }

    /// Start the connection loop. No-op while a loop is already running, and
    /// when there is no token (logged as a warning).
    pub async fn connect(&self) {
        let mut task = self.inner.task.lock().await;
        if let Some(handle) = task.as_ref() {
            if !handle.join.is_finished() {
                crate::log_info!("Notification socket already active, skipping connect");
                return;
            }
        }
        if let Some(finished) = task.take() {
            let _ = finished.join.await;
        }

        if (self.inner.url_builder)().is_none() {
            crate::log_warn!("Not logged in, notification socket not connected");
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        self.inner.set_state(ConnectionState::Connecting);
        let join = tokio::spawn(run_connection_loop(self.inner.clone(), shutdown_rx));
        *task = Some(LoopHandle { shutdown, join });
    }

    /// Stop everything: cancel timers, reject pending calls, close the
    /// socket. Idempotent; `connect()` may be called again afterwards.
    pub async fn disconnect(&self) {
        let mut task = self.inner.task.lock().await;
        if let Some(handle) = task.take() {
            let _ = handle.shutdown.send(());
            if let Err(e) = handle.join.await {
                crate::log_error!("Notification socket task failed: {}", e);
            }
            crate::log_info!("Notification socket disconnected");
        }
        self.inner.correlator.reject_all("websocket disconnected");
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Correlated call; fails with `ConnectionUnavailable` unless connected.
    pub async fn call(&self, action: &str, data: Option<Value>) -> CallResult {
        if !self.is_connected() {
            return Err(ApiError::ConnectionUnavailable);
        }
        self.inner.correlator.call(action, data).await
    }

    pub async fn call_action(&self, action: Action) -> CallResult {
        self.call(action.as_str(), None).await
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn add_handler(
        &self,
        handler: impl Fn(&fva_shared::PushMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.handlers.add(handler)
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }
}

fn handshake_end(err: tungstenite::Error) -> SessionEnd {
    if let tungstenite::Error::Http(response) = &err {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return SessionEnd::AuthRejected(format!("handshake rejected with HTTP {status}"));
        }
    }
    crate::log_error!("Notification socket connect failed: {}", err);
    SessionEnd::Closed
}

async fn run_connection_loop(inner: Arc<Inner>, mut shutdown: oneshot::Receiver<()>) {
    let mut attempt = 0u32;

    loop {
        let Some(url) = (inner.url_builder)() else {
            crate::log_warn!("Access token gone, stopping notification socket");
            inner.set_state(ConnectionState::Disconnected);
            return;
        };

        if attempt == 0 {
            inner.set_state(ConnectionState::Connecting);
        } else {
            inner.set_state(ConnectionState::Reconnecting { attempt });
        }

        let connected = tokio::select! {
            _ = &mut shutdown => return,
            result = connect_async(url.as_str()) => result,
        };

        let end = match connected {
            Ok((stream, _response)) => {
                attempt = 0;
                crate::log_info!("Notification socket connected");

                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                inner.correlator.open(outbound_tx);
                inner.set_state(ConnectionState::Connected);

                let end = run_session(&inner, stream, outbound_rx, &mut shutdown).await;

                inner.set_state(ConnectionState::Disconnected);
                inner.correlator.reject_all("websocket connection closed");
                end
            }
            Err(e) => handshake_end(e),
        };

        match end {
            SessionEnd::Shutdown => return,
            SessionEnd::AuthRejected(reason) => {
                crate::log_warn!("Notification socket rejected the token: {}", reason);
                inner.set_state(ConnectionState::Disconnected);
                (inner.on_auth_rejected)(reason);
                return;
            }
            SessionEnd::Closed => {}
        }

        let Some(delay) = inner.reconnect.delay_for_attempt(attempt) else {
            crate::log_warn!(
                "Giving up on notification socket after {} reconnect attempts",
                inner.reconnect.max_attempts
            );
            inner.set_state(ConnectionState::FailedPermanently {
                reason: format!(
                    "max reconnect attempts ({}) exceeded",
                    inner.reconnect.max_attempts
                ),
            });
            return;
        };

        crate::log_info!(
            "Reconnecting in {:?} ({}/{})",
            delay,
            attempt + 1,
            inner.reconnect.max_attempts
        );
        inner.set_state(ConnectionState::Reconnecting {
            attempt: attempt + 1,
        });
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Pump one open socket until it closes or shutdown is requested.
async fn run_session(
    inner: &Inner,
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();
    let period = inner.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = tokio::time::timeout(CLOSE_GRACE, write.send(Message::Close(None))).await;
                return SessionEnd::Shutdown;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = write.send(Message::Text(HEARTBEAT_PING.into())).await {
                    crate::log_error!("Heartbeat send failed: {}", e);
                    return SessionEnd::Closed;
                }
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    crate::log_error!("Send failed: {}", e);
                    return SessionEnd::Closed;
                }
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => inner.handle_text(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    crate::log_info!("Notification socket closed by server: {:?}", frame);
                    if let Some(frame) = frame {
                        if u16::from(frame.code) == CLOSE_CODE_AUTH_REJECTED {
                            return SessionEnd::AuthRejected(frame.reason.as_str().to_string());
                        }
                    }
                    return SessionEnd::Closed;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary is unused.
                }
                Some(Err(e)) => {
                    crate::log_error!("Notification socket read error: {}", e);
                    return SessionEnd::Closed;
                }
                None => return SessionEnd::Closed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(url: Option<&str>) -> ConnectionManager {
        let url = url.map(str::to_string);
        ConnectionManager::new(&ClientConfig::default(), move || url.clone(), |_| {})
    }

    #[tokio::test]
    async fn connect_without_token_is_a_noop() {
        let m = manager(None);
        m.connect().await;
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn call_while_disconnected_fails_fast() {
        let m = manager(Some("ws://127.0.0.1:9/api/notification/ws/t"));
        assert_eq!(
            m.call_action(Action::GetUserInfo).await,
            Err(ApiError::ConnectionUnavailable)
        );
        assert_eq!(m.pending_requests(), 0);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let m = manager(None);
        m.disconnect().await;
        m.disconnect().await;
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn frames_are_routed_without_panicking() {
        let m = manager(None);
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let s = seen.clone();
        m.add_handler(move |_| {
            s.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        m.inner.handle_text(HEARTBEAT_PONG);
        m.inner.handle_text("not json at all");
        m.inner.handle_text(r#"{"type":"response","requestId":"unknown","data":{}}"#);
        m.inner.handle_text(r#"{"type":"notification","data":{"title":"t"}}"#);

        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
