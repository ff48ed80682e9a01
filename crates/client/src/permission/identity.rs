//! Identity-level rules that depend only on `UserType` ordinals.

use fva_shared::UserType;

/// What an identity level may do, independent of granted marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub manage_all: bool,
    pub manage_system: bool,
    pub manage_departments: bool,
    pub manage_users: bool,
    pub assign_roles: bool,
    pub view_all_data: bool,
}

/// `user_type` meets a requirement of `min_required`. Lower ordinal is more
/// privileged, so this is `user_type <= min_required`.
pub fn meets_identity(user_type: UserType, min_required: UserType) -> bool {
    user_type.level() <= min_required.level()
}

pub trait UserTypeExt {
    fn name(self) -> &'static str;
    fn capabilities(self) -> Capabilities;
}

impl UserTypeExt for UserType {
    fn name(self) -> &'static str {
        match self {
            UserType::SuperAdmin => "super admin",
            UserType::Admin => "admin",
            UserType::DeptAdmin => "department admin",
            UserType::NormalUser => "normal user",
        }
    }

    fn capabilities(self) -> Capabilities {
        match self {
            UserType::SuperAdmin => Capabilities {
                manage_all: true,
                manage_system: true,
                manage_departments: true,
                manage_users: true,
                assign_roles: true,
                view_all_data: true,
            },
            UserType::Admin => Capabilities {
                manage_all: false,
                manage_system: true,
                manage_departments: true,
                manage_users: true,
                assign_roles: true,
                view_all_data: true,
            },
            UserType::DeptAdmin => Capabilities {
                manage_all: false,
                manage_system: false,
                manage_departments: false,
                manage_users: true,
                assign_roles: false,
                view_all_data: false,
            },
            UserType::NormalUser => Capabilities {
                manage_all: false,
                manage_system: false,
                manage_departments: false,
                manage_users: false,
                assign_roles: false,
                view_all_data: false,
            },
        }
    }
}

/// Whether `current` may manage an account of level `target`.
pub fn can_manage_user(current: UserType, target: UserType) -> bool {
    match current {
        UserType::SuperAdmin => true,
        UserType::Admin => target != UserType::SuperAdmin,
        UserType::DeptAdmin => target.level() >= UserType::DeptAdmin.level(),
        UserType::NormalUser => false,
    }
}

/// Levels `current` may assign to other accounts.
pub fn assignable_user_types(current: UserType) -> Vec<UserType> {
    match current {
        UserType::NormalUser => Vec::new(),
        _ => UserType::ALL
            .into_iter()
            .filter(|t| t.level() >= current.level())
            .collect(),
    }
}
