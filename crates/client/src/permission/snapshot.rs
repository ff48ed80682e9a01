use std::collections::HashSet;

use fva_shared::{ApiPermission, DataScope, UserInfo, UserType};

/// Everything the evaluation engine knows about the current user, as of the
/// last successful fetch. Shared behind an `Arc` and replaced whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PermissionSnapshot {
    pub user_id: String,
    pub username: String,
    pub user_type: UserType,
    pub data_scope: DataScope,
    pub role_codes: HashSet<String>,
    pub menu_ids: HashSet<String>,
    pub button_ids: HashSet<String>,
    pub api_permissions: HashSet<ApiPermission>,
    pub permission_marks: HashSet<String>,
    pub accessible_department_ids: HashSet<String>,
}

impl From<&UserInfo> for PermissionSnapshot {
    fn from(info: &UserInfo) -> Self {
        Self {
            user_id: info.id.clone(),
            username: info.username.clone(),
            user_type: info.user_type,
            data_scope: info.data_scope,
            role_codes: info.casbin_roles.iter().cloned().collect(),
            menu_ids: info.menus.iter().cloned().collect(),
            button_ids: info.buttons.iter().cloned().collect(),
            api_permissions: info.apis.iter().cloned().collect(),
            permission_marks: info.permission_marks.iter().cloned().collect(),
            accessible_department_ids: info.sub_departments.iter().cloned().collect(),
        }
    }
}

impl From<UserInfo> for PermissionSnapshot {
    fn from(info: UserInfo) -> Self {
        Self::from(&info)
    }
}
