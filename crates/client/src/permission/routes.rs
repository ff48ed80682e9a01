//! Route tree filtering by identity level.

use fva_shared::{RouteNode, UserType};

use super::identity::meets_identity;

/// Keep the routes `user_type` may reach.
///
/// A node needs `meta.minUserType` (default: normal user). A node that
/// arrived with children but has none left after filtering is dropped too;
/// a node that never had children is kept.
pub fn filter_route_tree(routes: &[RouteNode], user_type: UserType) -> Vec<RouteNode> {
    routes
        .iter()
        .filter_map(|node| filter_node(node, user_type))
        .collect()
}

fn filter_node(node: &RouteNode, user_type: UserType) -> Option<RouteNode> {
    let min_required = node.meta.min_user_type.unwrap_or(UserType::NormalUser);
    if !meets_identity(user_type, min_required) {
        return None;
    }

    let children = match &node.children {
        Some(children) if !children.is_empty() => {
            let kept = filter_route_tree(children, user_type);
            if kept.is_empty() {
                return None;
            }
            Some(kept)
        }
        other => other.clone(),
    };

    Some(RouteNode {
        name: node.name.clone(),
        path: node.path.clone(),
        component: node.component.clone(),
        meta: node.meta.clone(),
        children,
    })
}
