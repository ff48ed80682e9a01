//! Shared data models for the admin auth API.

use serde::{Deserialize, Deserializer, Serialize};

/// Envelope code of a successful response.
pub const CODE_SUCCESS: i64 = 200;
/// Envelope code (and HTTP status) of an unauthenticated response.
pub const CODE_UNAUTHORIZED: i64 = 401;

/// Treat an explicit `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// --- Envelope ---

/// Base response envelope returned by every REST endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default, deserialize_with = "nullable")]
    pub msg: String,
    pub data: T,
    #[serde(default)]
    pub success: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub time: String,
}

impl<T> ApiEnvelope<T> {
    /// Successful envelope for data obtained without a REST round trip.
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_SUCCESS,
            msg: "ok".to_string(),
            data,
            success: true,
            time: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

// --- Identity ---

/// Identity level. Lower ordinal means more privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum UserType {
    SuperAdmin = 0,
    Admin = 1,
    DeptAdmin = 2,
    #[default]
    NormalUser = 3,
}

impl UserType {
    pub const ALL: [UserType; 4] = [
        UserType::SuperAdmin,
        UserType::Admin,
        UserType::DeptAdmin,
        UserType::NormalUser,
    ];

    pub fn level(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for UserType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UserType::SuperAdmin),
            1 => Ok(UserType::Admin),
            2 => Ok(UserType::DeptAdmin),
            3 => Ok(UserType::NormalUser),
            other => Err(format!("invalid user_type {other}, expected 0..=3")),
        }
    }
}

impl From<UserType> for u8 {
    fn from(value: UserType) -> Self {
        value.level()
    }
}

/// Breadth of department data a user may view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataScope {
    All = 1,
    DeptAndChildren = 2,
    DeptOnly = 3,
    #[default]
    SelfOnly = 4,
}

impl DataScope {
    pub fn name(self) -> &'static str {
        match self {
            DataScope::All => "all data",
            DataScope::DeptAndChildren => "department and sub-departments",
            DataScope::DeptOnly => "department only",
            DataScope::SelfOnly => "self only",
        }
    }
}

impl TryFrom<u8> for DataScope {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DataScope::All),
            2 => Ok(DataScope::DeptAndChildren),
            3 => Ok(DataScope::DeptOnly),
            4 => Ok(DataScope::SelfOnly),
            other => Err(format!("invalid data_scope {other}, expected 1..=4")),
        }
    }
}

impl From<DataScope> for u8 {
    fn from(value: DataScope) -> Self {
        value as u8
    }
}

// --- Auth ---

/// Form body of `POST /api/auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub login_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            login_days: 7,
            code: None,
            uuid: None,
        }
    }

    pub fn with_login_days(mut self, days: u32) -> Self {
        self.login_days = days;
        self
    }

    /// Attach a solved captcha.
    pub fn with_captcha(mut self, uuid: impl Into<String>, code: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self.code = Some(code.into());
        self
    }
}

/// Tokens returned by login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default, deserialize_with = "nullable")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_time: Option<f64>,
}

/// One API grant. `path` may end in `*` or contain `:param` segments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ApiPermission {
    pub path: String,
    pub method: String,
}

impl ApiPermission {
    /// Expand the compact `METHOD[,METHOD]:path` form into one grant per
    /// method. `None` when there is no `:` or no method.
    pub fn parse_compact(entry: &str) -> Option<Vec<ApiPermission>> {
        let (methods, path) = entry.split_once(':')?;
        let path = path.trim();
        let grants: Vec<ApiPermission> = methods
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(|method| ApiPermission {
                path: path.to_string(),
                method: method.to_ascii_uppercase(),
            })
            .collect();
        (!grants.is_empty() && !path.is_empty()).then_some(grants)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ApiPermissionEntry {
    Compact(String),
    Full(ApiPermission),
}

/// `apis` arrives as `"GET,POST:/api/role/add"` strings; the object form
/// is accepted too. Malformed strings are skipped rather than failing the
/// whole payload.
fn api_permissions<'de, D>(deserializer: D) -> Result<Vec<ApiPermission>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<ApiPermissionEntry>>::deserialize(deserializer)?.unwrap_or_default();
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            ApiPermissionEntry::Full(grant) => out.push(grant),
            ApiPermissionEntry::Compact(text) => {
                out.extend(ApiPermission::parse_compact(&text).unwrap_or_default())
            }
        }
    }
    Ok(out)
}

/// User info payload as served by `/api/auth/info` and the `getUserInfo`
/// socket action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub username: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub department_id: Option<String>,
    #[serde(default)]
    pub department_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub user_type: UserType,
    #[serde(default, deserialize_with = "nullable")]
    pub data_scope: DataScope,
    #[serde(default, deserialize_with = "nullable")]
    pub casbin_roles: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub menus: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub buttons: Vec<String>,
    #[serde(default, deserialize_with = "api_permissions")]
    pub apis: Vec<ApiPermission>,
    #[serde(default, deserialize_with = "nullable")]
    pub permission_marks: Vec<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub sub_departments: Vec<String>,
}

// --- Routes ---

/// Permission entry attached to a route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub auth_mark: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_user_type: Option<UserType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_user_type: Option<UserType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "nullable")]
    pub auth_list: Vec<AuthItem>,
    /// Presentation keys (`icon`, `order`, `keepAlive`, `isHide`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One node of the dynamic route tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default)]
    pub meta: RouteMeta,
    /// `None` for leaves; `Some` even when the server sent an empty list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<RouteNode>>,
}
