use crate::users::db::CurrentUser;
use anyhow::Result;
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Coarse role check for a whole route. Row-level scoping happens in the
/// queries themselves; this only gates the surface.
pub fn check(current_user: &CurrentUser, resource: &str, action: &str) -> bool {
    let has_permission = current_user.has_permission(resource, action);
    info!(
        "{} [{}] [{}] : {}",
        current_user.user_id,
        action,
        resource,
        if has_permission {
            "OK"
        } else {
            "NOT AUTHORIZED"
        }
    );
    has_permission
}

#[derive(Debug, Deserialize)]
pub struct AuthorizationConfig {
    pub roles: HashMap<String, Role>,
}

#[derive(Debug, Deserialize)]
pub struct Role {
    pub description: String,
    pub inherits: Vec<String>,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Permission {
    pub action: String,
    pub resource: String,
}

impl AuthorizationConfig {
    pub fn new(config: &str) -> Result<Self> {
        let config: AuthorizationConfig = toml::from_str(config)?;
        Ok(config)
    }
}

impl std::fmt::Display for AuthorizationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "AUTHORIZATION CONFIGURATION")?;
        for (role_name, role) in &self.roles {
            writeln!(f, "ROLE {role_name}: {}", role.description)?;
            for permission in &role.permissions {
                writeln!(f, "  - {} on {}", permission.action, permission.resource)?;
            }
        }
        Ok(())
    }
}

/// What a caller may do with one specific device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Owner,
    Editor,
    Viewer,
}

impl AccessLevel {
    pub fn can_write(self) -> bool {
        !matches!(self, AccessLevel::Viewer)
    }

    /// Share management and deletion stay with the owner (admins resolve
    /// to Owner as well).
    pub fn can_manage(self) -> bool {
        matches!(self, AccessLevel::Owner)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeviceAccess {
    Granted(AccessLevel),
    Denied,
    NotFound,
}

#[derive(sqlx::FromRow)]
struct DeviceAccessRow {
    user_id: Option<Uuid>,
    permission_level: Option<String>,
}

fn resolve_access(
    is_admin: bool,
    owner: Option<Uuid>,
    permission_level: Option<&str>,
    caller: Uuid,
) -> Option<AccessLevel> {
    if is_admin || owner == Some(caller) {
        return Some(AccessLevel::Owner);
    }
    match permission_level {
        Some("editor") => Some(AccessLevel::Editor),
        Some("viewer") => Some(AccessLevel::Viewer),
        _ => None,
    }
}

/// Resolve the caller's access to a device at the data boundary: owner and
/// admin get full access, a `device_permission` row maps to its level,
/// anything else is denied.
pub async fn device_access(
    current_user: &CurrentUser,
    device_id: Uuid,
    pool: &PgPool,
) -> Result<DeviceAccess, sqlx::Error> {
    let row = sqlx::query_as::<_, DeviceAccessRow>(
        r#"
        SELECT d.user_id, p.permission_level
        FROM device d
        LEFT JOIN device_permission p
               ON p.device_id = d.id AND p.user_id = $2
        WHERE d.id = $1
        "#,
    )
    .bind(device_id)
    .bind(current_user.user_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(DeviceAccess::NotFound);
    };

    Ok(
        match resolve_access(
            current_user.is_admin,
            row.user_id,
            row.permission_level.as_deref(),
            current_user.user_id,
        ) {
            Some(level) => DeviceAccess::Granted(level),
            None => DeviceAccess::Denied,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_config() {
        let config = AuthorizationConfig::new(
            r#"
            [roles.user]
            description = "Regular account"
            inherits = []
            permissions = [{ resource = "devices", action = "read" }]

            [roles.admin]
            description = "Everything"
            inherits = ["user"]
            permissions = [
                { resource = "devices", action = "read" },
                { resource = "users", action = "write" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.roles.len(), 2);
        assert_eq!(config.roles["admin"].permissions.len(), 2);
        assert_eq!(config.roles["user"].inherits.len(), 0);
    }

    #[test]
    fn rejects_malformed_roles_config() {
        assert!(AuthorizationConfig::new("roles = 3").is_err());
    }

    #[test]
    fn owner_gets_full_access() {
        let caller = Uuid::new_v4();
        assert_eq!(
            resolve_access(false, Some(caller), None, caller),
            Some(AccessLevel::Owner)
        );
    }

    #[test]
    fn admin_gets_full_access_without_grant() {
        let caller = Uuid::new_v4();
        let owner = Uuid::new_v4();
        assert_eq!(
            resolve_access(true, Some(owner), None, caller),
            Some(AccessLevel::Owner)
        );
    }

    #[test]
    fn grant_maps_to_its_level() {
        let caller = Uuid::new_v4();
        let owner = Uuid::new_v4();
        assert_eq!(
            resolve_access(false, Some(owner), Some("viewer"), caller),
            Some(AccessLevel::Viewer)
        );
        assert_eq!(
            resolve_access(false, Some(owner), Some("editor"), caller),
            Some(AccessLevel::Editor)
        );
    }

    #[test]
    fn no_relation_means_no_access() {
        let caller = Uuid::new_v4();
        let owner = Uuid::new_v4();
        assert_eq!(resolve_access(false, Some(owner), None, caller), None);
        assert_eq!(resolve_access(false, None, None, caller), None);
    }

    #[test]
    fn unknown_grant_level_is_denied() {
        let caller = Uuid::new_v4();
        assert_eq!(resolve_access(false, None, Some("root"), caller), None);
    }

    #[test]
    fn viewer_cannot_write_or_manage() {
        assert!(!AccessLevel::Viewer.can_write());
        assert!(!AccessLevel::Viewer.can_manage());
        assert!(AccessLevel::Editor.can_write());
        assert!(!AccessLevel::Editor.can_manage());
        assert!(AccessLevel::Owner.can_write());
        assert!(AccessLevel::Owner.can_manage());
    }
}
