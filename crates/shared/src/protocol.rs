//! Notification socket protocol: frame shapes, heartbeat sentinels and
//! well-known endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal heartbeat text sent by the client.
pub const HEARTBEAT_PING: &str = "ping";
/// Literal heartbeat acknowledgment sent by the server.
pub const HEARTBEAT_PONG: &str = "pong";

/// Close code the server uses when the path token is invalid or expired.
pub const CLOSE_CODE_AUTH_REJECTED: u16 = 4001;

/// Base path of the notification socket; the access token is appended.
pub const WS_NOTIFICATION_PATH: &str = "/api/notification/ws";

pub const PATH_LOGIN: &str = "/api/auth/login";
pub const PATH_LOGOUT: &str = "/api/auth/logout";
pub const PATH_REFRESH_TOKEN: &str = "/api/auth/refreshToken";
pub const PATH_USER_INFO: &str = "/api/auth/info";
pub const PATH_USER_ROUTES: &str = "/api/auth/routes";

/// Build the socket path for a token: `/api/notification/ws/{token}`.
pub fn ws_endpoint(access_token: &str) -> String {
    format!(
        "{}/{}",
        WS_NOTIFICATION_PATH,
        urlencoding::encode(access_token)
    )
}

/// Actions understood by the server's request handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetUserInfo,
    GetUserRoutes,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GetUserInfo => "getUserInfo",
            Action::GetUserRoutes => "getUserRoutes",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound correlated request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RequestFrame {
    pub fn new(action: impl Into<String>, request_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: "request".to_string(),
            action: action.into(),
            request_id: request_id.into(),
            data,
        }
    }
}

/// Inbound frame as it appears on the wire, before classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    request_id: Option<String>,
}

/// Kinds of server-initiated messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushKind {
    Notification,
    LoginNotification,
    Connected,
    UnreadCount,
    /// A kind this client does not know about. Still delivered.
    Other(String),
}

impl PushKind {
    fn from_wire(kind: &str) -> Self {
        match kind {
            "notification" => PushKind::Notification,
            "login_notification" => PushKind::LoginNotification,
            "connected" => PushKind::Connected,
            "unread_count" => PushKind::UnreadCount,
            other => PushKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PushKind::Notification => "notification",
            PushKind::LoginNotification => "login_notification",
            PushKind::Connected => "connected",
            PushKind::UnreadCount => "unread_count",
            PushKind::Other(kind) => kind,
        }
    }
}

/// A push message delivered to every registered handler.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub kind: PushKind,
    pub data: Value,
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Response { request_id: String, data: Value },
    Push(PushMessage),
}

impl ServerFrame {
    /// Parse a text frame. A `response` without a `requestId` has nobody to
    /// resolve and is treated as a push.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawFrame = serde_json::from_str(text)?;
        Ok(match (raw.kind.as_str(), raw.request_id) {
            ("response", Some(request_id)) => ServerFrame::Response {
                request_id,
                data: raw.data,
            },
            (kind, _) => ServerFrame::Push(PushMessage {
                kind: PushKind::from_wire(kind),
                data: raw.data,
            }),
        })
    }
}

/// Interpret a response payload: `success == false` is a rejection carrying
/// the server message, anything else is the result.
pub fn response_outcome(data: Value) -> Result<Value, Option<String>> {
    match data.get("success").and_then(Value::as_bool) {
        Some(false) => Err(data
            .get("msg")
            .and_then(Value::as_str)
            .map(str::to_string)),
        _ => Ok(data),
    }
}
