//! Shared types for the fva admin client: socket protocol, REST models and
//! the error taxonomy.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
