use crate::middlewares::authorization::{self, AuthorizationConfig};
use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "admin";
pub const DEFAULT_ROLE: &str = "user";

/// The authenticated human behind a request, resolved from the verified
/// token subject. Carries the flattened permissions of the user's role.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub is_admin: bool,
    permissions: Vec<authorization::Permission>,
}

impl CurrentUser {
    pub fn has_permission(&self, resource: &str, action: &str) -> bool {
        self.permissions
            .iter()
            .any(|permission| permission.resource == resource && permission.action == action)
    }

    pub async fn build(
        pg_pool: &PgPool,
        authorization: &AuthorizationConfig,
        subject: &str,
        email: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<Self> {
        #[derive(sqlx::FromRow)]
        struct UserIdRow {
            id: Uuid,
        }

        // First login creates the profile; later logins refresh whatever
        // the identity provider knows that we don't.
        let user = sqlx::query_as::<_, UserIdRow>(
            r#"
            INSERT INTO users (subject, email, full_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (subject) DO UPDATE
            SET email = COALESCE(EXCLUDED.email, users.email),
                full_name = COALESCE(EXCLUDED.full_name, users.full_name)
            RETURNING id
            "#,
        )
        .bind(subject)
        .bind(email)
        .bind(full_name)
        .fetch_one(pg_pool)
        .await?;

        #[derive(sqlx::FromRow)]
        struct UserRoleRow {
            role: String,
        }

        let role = sqlx::query_as::<_, UserRoleRow>(
            "SELECT role FROM user_roles WHERE user_id = $1",
        )
        .bind(user.id)
        .fetch_optional(pg_pool)
        .await?
        .map(|row| row.role)
        .unwrap_or_else(|| DEFAULT_ROLE.to_string());

        let permissions = authorization
            .roles
            .get(&role)
            .map(|role| role.permissions.clone())
            .unwrap_or_default();

        Ok(CurrentUser {
            user_id: user.id,
            is_admin: role == ADMIN_ROLE,
            permissions,
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_match_is_exact() {
        let user = CurrentUser {
            user_id: Uuid::new_v4(),
            is_admin: false,
            permissions: vec![authorization::Permission {
                resource: "devices".to_string(),
                action: "read".to_string(),
            }],
        };

        assert!(user.has_permission("devices", "read"));
        assert!(!user.has_permission("devices", "write"));
        assert!(!user.has_permission("users", "read"));
    }
}
