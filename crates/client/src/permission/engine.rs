//! Permission checks over the current snapshot.
//!
//! All answers are synchronous and never fail: no snapshot, or a missing
//! grant, reads as `false`.

use std::sync::Arc;

use fva_shared::{AuthItem, DataScope, RouteMeta, RouteNode, UserType};

use super::identity::meets_identity;
use super::routes::filter_route_tree;
use super::snapshot::PermissionSnapshot;
use crate::config::AccessMode;

/// Read-only view of one snapshot. Cheap to build; build a fresh one after
/// the session replaces its snapshot.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    snapshot: Option<Arc<PermissionSnapshot>>,
    mode: AccessMode,
}

impl Permissions {
    pub fn new(snapshot: Option<Arc<PermissionSnapshot>>, mode: AccessMode) -> Self {
        Self { snapshot, mode }
    }

    pub fn snapshot(&self) -> Option<&PermissionSnapshot> {
        self.snapshot.as_deref()
    }

    pub fn user_type(&self) -> Option<UserType> {
        self.snapshot().map(|s| s.user_type)
    }

    pub fn has_mark(&self, mark: &str) -> bool {
        self.snapshot()
            .is_some_and(|s| s.permission_marks.contains(mark))
    }

    pub fn has_any_mark<S: AsRef<str>>(&self, marks: &[S]) -> bool {
        marks.iter().any(|m| self.has_mark(m.as_ref()))
    }

    /// Vacuously true for an empty list.
    pub fn has_all_marks<S: AsRef<str>>(&self, marks: &[S]) -> bool {
        marks.iter().all(|m| self.has_mark(m.as_ref()))
    }

    pub fn has_role(&self, code: &str) -> bool {
        self.snapshot().is_some_and(|s| s.role_codes.contains(code))
    }

    pub fn has_any_role<S: AsRef<str>>(&self, codes: &[S]) -> bool {
        codes.iter().any(|c| self.has_role(c.as_ref()))
    }

    /// `userType <= min_required`; false with no snapshot.
    pub fn identity_at_least(&self, min_required: UserType) -> bool {
        self.user_type()
            .is_some_and(|t| meets_identity(t, min_required))
    }

    pub fn is_super_admin(&self) -> bool {
        self.user_type() == Some(UserType::SuperAdmin)
    }

    /// Admin or above.
    pub fn is_admin(&self) -> bool {
        self.identity_at_least(UserType::Admin)
    }

    /// Department admin or above.
    pub fn is_dept_admin(&self) -> bool {
        self.identity_at_least(UserType::DeptAdmin)
    }

    pub fn is_normal_user(&self) -> bool {
        self.user_type() == Some(UserType::NormalUser)
    }

    pub fn can_access_department(&self, dept_id: &str) -> bool {
        match self.snapshot() {
            Some(s) if s.data_scope == DataScope::All => true,
            Some(s) => s.accessible_department_ids.contains(dept_id),
            None => false,
        }
    }

    /// Method compared case-insensitively (`*` grants any). A granted path
    /// ending in `*` matches by prefix and a `:name` segment matches any
    /// one non-empty segment.
    pub fn can_call_api(&self, path: &str, method: &str) -> bool {
        self.snapshot().is_some_and(|s| {
            s.api_permissions.iter().any(|api| {
                (api.method == "*" || api.method.eq_ignore_ascii_case(method))
                    && api_path_matches(&api.path, path)
            })
        })
    }

    /// A route's own requirement: identity level first, then any of its
    /// listed marks.
    pub fn can_access_route(&self, meta: &RouteMeta) -> bool {
        if self.snapshot.is_none() {
            return false;
        }
        if let Some(min) = meta.min_user_type {
            if !self.identity_at_least(min) {
                return false;
            }
        }
        if meta.auth_list.is_empty() {
            return true;
        }
        meta.auth_list.iter().any(|item| self.has_mark(&item.auth_mark))
    }

    /// Routes the current user may reach. Empty without a snapshot.
    pub fn filter_routes(&self, routes: &[RouteNode]) -> Vec<RouteNode> {
        match self.user_type() {
            Some(t) => filter_route_tree(routes, t),
            None => Vec::new(),
        }
    }

    /// Resolve a short-form or fully-qualified auth token.
    ///
    /// `route_auth` is the `authList` of the route being rendered. A token
    /// with a `:` is a full mark. Otherwise, in frontend mode only the
    /// button list answers; in backend mode the first hit among exact
    /// route entry, snapshot mark ending in `:token`, route entry ending in
    /// `:token`, direct mark wins.
    ///
    /// Suffix matching can match the same action name in an unrelated
    /// module (`foo:btn:add` satisfies `add` on a `bar` page).
    pub fn resolve_auth(&self, token: &str, route_auth: &[AuthItem]) -> bool {
        let Some(snapshot) = self.snapshot() else {
            return false;
        };

        if token.contains(':') {
            return self.has_mark(token);
        }

        if self.mode == AccessMode::Frontend {
            return snapshot.button_ids.contains(token);
        }

        if route_auth.iter().any(|item| item.auth_mark == token) {
            return true;
        }

        let suffix = format!(":{token}");
        if snapshot
            .permission_marks
            .iter()
            .any(|mark| mark.ends_with(&suffix))
        {
            return true;
        }

        if route_auth.iter().any(|item| item.auth_mark.ends_with(&suffix)) {
            return true;
        }

        self.has_mark(token)
    }

    pub fn has_any_auth<S: AsRef<str>>(&self, tokens: &[S], route_auth: &[AuthItem]) -> bool {
        tokens
            .iter()
            .any(|t| self.resolve_auth(t.as_ref(), route_auth))
    }

    pub fn has_all_auth<S: AsRef<str>>(&self, tokens: &[S], route_auth: &[AuthItem]) -> bool {
        tokens
            .iter()
            .all(|t| self.resolve_auth(t.as_ref(), route_auth))
    }
}

fn api_path_matches(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    let mut granted = pattern.split('/');
    let mut requested = path.split('/');
    loop {
        match (granted.next(), requested.next()) {
            (None, None) => return true,
            (Some(g), Some(r)) if g == r || (g.starts_with(':') && !r.is_empty()) => {}
            _ => return false,
        }
    }
}
