//! fva admin client - session, permission and notification-socket layer
//!
//! This crate keeps one authenticated session against the admin backend:
//! login and token handling, the notification WebSocket with correlated
//! calls, REST fallback, and local permission checks.

pub mod logging;

pub mod api_client;
pub mod auth_session;
pub mod config;
pub mod fallback;
pub mod permission;
pub mod storage;
pub mod ws;

pub use api_client::ApiClient;
pub use auth_session::{AuthSession, PermissionStatus, SessionEvent, SessionState, UnauthorizedGuard};
pub use config::{AccessMode, ClientConfig, ReconnectConfig};
pub use fallback::FallbackAdapter;
pub use permission::{PermissionSnapshot, Permissions};
pub use storage::SessionStore;
pub use ws::{ConnectionManager, ConnectionState};
