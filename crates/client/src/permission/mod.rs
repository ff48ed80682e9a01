//! Permission evaluation: snapshot, identity levels, route filtering and
//! the check engine.

mod engine;
mod identity;
mod routes;
mod snapshot;

pub use engine::Permissions;
pub use identity::{assignable_user_types, can_manage_user, meets_identity, Capabilities, UserTypeExt};
pub use routes::filter_route_tree;
pub use snapshot::PermissionSnapshot;
