//! In-process admin backend: REST auth endpoints plus the notification
//! socket, bound to an ephemeral port.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use fva_client::{ClientConfig, ConnectionState, ReconnectConfig};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "secret";
pub const FIRST_TOKEN: &str = "token-1";
pub const REFRESHED_TOKEN: &str = "token-2";

pub struct MockState {
    valid_tokens: Mutex<HashSet<String>>,
    pub info_hits: AtomicUsize,
    pub routes_hits: AtomicUsize,
    pub logout_hits: AtomicUsize,
    pub ws_requests: AtomicUsize,
    pub pings: AtomicUsize,
    pub connections: AtomicUsize,
    /// Answer socket requests at all.
    pub ws_answers: AtomicBool,
    /// Answer socket requests with `success: false`.
    pub ws_reject_all: AtomicBool,
    /// REST reads answer 401 regardless of the token.
    pub rest_unauthorized: AtomicBool,
    last_request_id: Mutex<Option<String>>,
    push: broadcast::Sender<String>,
    kick: broadcast::Sender<Option<u16>>,
}

impl MockState {
    fn new() -> Self {
        let (push, _) = broadcast::channel(16);
        let (kick, _) = broadcast::channel(4);
        Self {
            valid_tokens: Mutex::new(HashSet::from([FIRST_TOKEN.to_string()])),
            info_hits: AtomicUsize::new(0),
            routes_hits: AtomicUsize::new(0),
            logout_hits: AtomicUsize::new(0),
            ws_requests: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            ws_answers: AtomicBool::new(true),
            ws_reject_all: AtomicBool::new(false),
            rest_unauthorized: AtomicBool::new(false),
            last_request_id: Mutex::new(None),
            push,
            kick,
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    /// Stop accepting `token` on REST and the socket.
    pub fn revoke(&self, token: &str) {
        self.valid_tokens.lock().unwrap().remove(token);
    }

    fn token_valid(&self, token: &str) -> bool {
        self.valid_tokens.lock().unwrap().contains(token)
    }

    fn bearer_valid(&self, headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| self.token_valid(token))
    }

    pub fn last_request_id(&self) -> Option<String> {
        self.last_request_id.lock().unwrap().clone()
    }

    /// Send a raw text frame to every open socket.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.push.send(text.into());
    }

    /// Close every open socket, with `code` when given, otherwise by
    /// dropping the connection.
    pub fn kick(&self, code: Option<u16>) {
        let _ = self.kick.send(code);
    }

    fn answer(&self, text: &str) -> Option<String> {
        if text == "ping" {
            self.pings.fetch_add(1, Ordering::SeqCst);
            return Some("pong".to_string());
        }

        let frame: Value = serde_json::from_str(text).ok()?;
        if frame["type"] != "request" {
            return None;
        }
        self.ws_requests.fetch_add(1, Ordering::SeqCst);
        let request_id = frame["requestId"].as_str()?.to_string();
        *self.last_request_id.lock().unwrap() = Some(request_id.clone());

        if !self.ws_answers.load(Ordering::SeqCst) {
            return None;
        }

        let data = if self.ws_reject_all.load(Ordering::SeqCst) {
            json!({"success": false, "msg": "denied"})
        } else {
            match frame["action"].as_str() {
                Some("getUserInfo") => user_info(),
                Some("getUserRoutes") => user_routes(),
                _ => json!({"success": false, "msg": "unknown action"}),
            }
        };
        Some(json!({"type": "response", "requestId": request_id, "data": data}).to_string())
    }
}

pub fn user_info() -> Value {
    json!({
        "id": "u-1",
        "username": USERNAME,
        "nickname": "Alice",
        "department_id": "A",
        "user_type": 2,
        "data_scope": 3,
        "casbin_roles": ["R_DEPT"],
        "menus": ["m-1"],
        "buttons": ["export"],
        "apis": ["GET:/api/user/*", "GET,POST:/api/role/add"],
        "permission_marks": ["user:btn:add"],
        "sub_departments": ["A"]
    })
}

pub fn user_routes() -> Value {
    json!([
        {"name": "Dashboard", "path": "/dashboard", "meta": {"title": "dashboard"}},
        {
            "name": "System",
            "path": "/system",
            "meta": {"title": "system"},
            "children": [
                {"name": "User", "path": "user", "meta": {"title": "user", "minUserType": 2}},
                {"name": "Config", "path": "config", "meta": {"title": "config", "minUserType": 1}}
            ]
        },
        {
            "name": "Platform",
            "path": "/platform",
            "meta": {"title": "platform"},
            "children": [
                {"name": "Tenants", "path": "tenants", "meta": {"minUserType": 0}}
            ]
        }
    ])
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "code": 200,
        "msg": "ok",
        "data": data,
        "success": true,
        "time": "2025-08-03 19:57:00"
    }))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"code": 401, "msg": "token expired", "data": null, "success": false})),
    )
        .into_response()
}

async fn login(State(state): State<Arc<MockState>>, Form(form): Form<HashMap<String, String>>) -> Response {
    let ok = form.get("username").map(String::as_str) == Some(USERNAME)
        && form.get("password").map(String::as_str) == Some(PASSWORD);
    if !ok {
        return Json(json!({"code": 400, "msg": "bad credentials", "data": null, "success": false}))
            .into_response();
    }
    state.valid_tokens.lock().unwrap().insert(FIRST_TOKEN.to_string());
    envelope(json!({"accessToken": FIRST_TOKEN, "refreshToken": "refresh-1"})).into_response()
}

async fn info(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.info_hits.fetch_add(1, Ordering::SeqCst);
    if state.rest_unauthorized.load(Ordering::SeqCst) || !state.bearer_valid(&headers) {
        return unauthorized();
    }
    envelope(user_info()).into_response()
}

async fn routes(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.routes_hits.fetch_add(1, Ordering::SeqCst);
    if state.rest_unauthorized.load(Ordering::SeqCst) || !state.bearer_valid(&headers) {
        return unauthorized();
    }
    envelope(user_routes()).into_response()
}

async fn logout(State(state): State<Arc<MockState>>) -> Response {
    state.logout_hits.fetch_add(1, Ordering::SeqCst);
    envelope(Value::Null).into_response()
}

async fn refresh_token(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if !state.bearer_valid(&headers) {
        return unauthorized();
    }
    state
        .valid_tokens
        .lock()
        .unwrap()
        .insert(REFRESHED_TOKEN.to_string());
    envelope(json!({
        "accessToken": REFRESHED_TOKEN,
        "refreshToken": "refresh-2",
        "expiresTime": 1754222220.5
    }))
    .into_response()
}

async fn notification_ws(
    ws: WebSocketUpgrade,
    Path(token): Path<String>,
    State(state): State<Arc<MockState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, token, state))
}

async fn handle_socket(mut socket: WebSocket, token: String, state: Arc<MockState>) {
    state.connections.fetch_add(1, Ordering::SeqCst);

    if !state.token_valid(&token) {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 4001,
                reason: "invalid token".into(),
            })))
            .await;
        return;
    }

    let mut push = state.push.subscribe();
    let mut kick = state.kick.subscribe();

    let hello = json!({"type": "connected", "data": {"message": "connected"}}).to_string();
    if socket.send(Message::Text(hello.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = state.answer(text.as_str()) {
                        if socket.send(Message::Text(reply.into())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
            Ok(text) = push.recv() => {
                if socket.send(Message::Text(text.into())).await.is_err() {
                    return;
                }
            }
            Ok(code) = kick.recv() => {
                if let Some(code) = code {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "kicked".into(),
                        })))
                        .await;
                }
                return;
            }
        }
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(MockState::new());
        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/info", get(info))
            .route("/api/auth/routes", get(routes))
            .route("/api/auth/logout", post(logout))
            .route("/api/auth/refreshToken", post(refresh_token))
            .route("/api/notification/ws/{token}", get(notification_ws))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Short timers so failure paths finish quickly.
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url(),
            request_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(50),
                backoff_multiplier: 1.0,
            },
            unauthorized_debounce: Duration::from_secs(3),
            persist_session: false,
            ..ClientConfig::default()
        }
    }
}

/// An address nothing listens on.
pub async fn unused_addr() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr)
}

/// Accepts TCP connections and drops them before the websocket handshake.
/// The counter reports how many were accepted.
pub async fn dropping_listener() -> Result<(SocketAddr, Arc<AtomicUsize>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });
    Ok((addr, accepted))
}

pub async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    what: impl Fn(&ConnectionState) -> bool,
) -> Result<ConnectionState> {
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| what(s))).await??;
    Ok(state.clone())
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
