//! Notification socket: one connection per session carrying both server
//! push messages and correlated request/response calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 ConnectionManager                   │
//! │   (state machine, heartbeat, backoff reconnect)     │
//! └─────────────────────────────────────────────────────┘
//!                 │                        │
//!     type == "response"          any other type
//!                 ▼                        ▼
//!        ┌────────────────┐      ┌──────────────────┐
//!        │   Correlator   │      │   PushHandlers   │
//!        │ (pending table)│      │ (ordered, each   │
//!        │                │      │  failure isolated)│
//!        └────────────────┘      └──────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = ConnectionManager::new(&config, move || token_url(), |_| {});
//! manager.add_handler(|msg| {
//!     println!("{}: {}", msg.kind.as_str(), msg.data);
//!     Ok(())
//! });
//! manager.connect().await;
//! let info = manager.call_action(Action::GetUserInfo).await?;
//! ```

mod connection;
mod correlator;
mod dispatch;

pub use connection::{ConnectionManager, ConnectionState};
pub use correlator::{CallResult, Correlator};
pub use dispatch::{HandlerId, PushHandler, PushHandlers};
