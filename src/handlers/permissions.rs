use crate::State;
use crate::handlers::events::PublicEvent;
use crate::middlewares::authorization::{self, AccessLevel, DeviceAccess};
use crate::users::db::CurrentUser;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, extract::Path};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::types::chrono;
use tracing::error;
use uuid::Uuid;

const SHARING_TAG: &str = "sharing";

#[derive(Debug, Clone, Copy, Deserialize, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    Viewer,
    Editor,
}

impl PermissionLevel {
    fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::Viewer => "viewer",
            PermissionLevel::Editor => "editor",
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct GrantPermission {
    pub email: String,
    pub permission_level: PermissionLevel,
}

#[derive(Debug, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct DevicePermissionRow {
    pub id: Uuid,
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub permission_level: String,
    pub granted_by: Option<Uuid>,
    pub granted_at: chrono::DateTime<chrono::Utc>,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

/// Grant and revoke stay with the owner (or an admin); a grant never lets
/// its holder share the device further.
async fn require_manage(
    state: &State,
    current_user: &CurrentUser,
    device_id: Uuid,
) -> Result<AccessLevel, Response> {
    match authorization::device_access(current_user, device_id, &state.pg_pool).await {
        Ok(DeviceAccess::Granted(level)) if level.can_manage() => Ok(level),
        Ok(DeviceAccess::Granted(_)) | Ok(DeviceAccess::Denied) => {
            Err(StatusCode::FORBIDDEN.into_response())
        }
        Ok(DeviceAccess::NotFound) => Err(StatusCode::NOT_FOUND.into_response()),
        Err(err) => {
            error!("Failed to resolve device access {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

#[utoipa::path(
    get,
    path = "/devices/:device_id/permissions",
    responses(
        (status = StatusCode::OK, description = "Grants for this device", body = Vec<DevicePermissionRow>),
        (status = StatusCode::FORBIDDEN, description = "Only the owner or an admin may list grants"),
        (status = StatusCode::NOT_FOUND, description = "Unknown device"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = SHARING_TAG
)]
pub async fn get_permissions_for_device(
    Path(device_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<DevicePermissionRow>>, Response> {
    require_manage(&state, &current_user, device_id).await?;

    let grants = sqlx::query_as::<_, DevicePermissionRow>(
        "SELECT p.id, p.device_id, p.user_id, p.permission_level, p.granted_by,
                p.granted_at, u.email, u.full_name
         FROM device_permission p
         JOIN users u ON u.id = p.user_id
         WHERE p.device_id = $1
         ORDER BY p.granted_at",
    )
    .bind(device_id)
    .fetch_all(&state.pg_pool)
    .await
    .map_err(|err| {
        error!("Failed to list device permissions {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    Ok(Json(grants))
}

#[utoipa::path(
    post,
    path = "/devices/:device_id/permissions",
    request_body = GrantPermission,
    responses(
        (status = StatusCode::CREATED, description = "Grant created"),
        (status = StatusCode::NOT_FOUND, description = "Unknown device or no account with that email"),
        (status = StatusCode::CONFLICT, description = "That account already holds a grant"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = SHARING_TAG
)]
pub async fn grant_permission(
    Path(device_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(payload): Json<GrantPermission>,
) -> Result<StatusCode, Response> {
    if !authorization::check(&current_user, "devices", "share") {
        return Err(StatusCode::FORBIDDEN.into_response());
    }
    require_manage(&state, &current_user, device_id).await?;

    #[derive(sqlx::FromRow)]
    struct GranteeRow {
        id: Uuid,
    }

    let grantee = sqlx::query_as::<_, GranteeRow>("SELECT id FROM users WHERE email = $1")
        .bind(payload.email.trim())
        .fetch_optional(&state.pg_pool)
        .await
        .map_err(|err| {
            error!("Failed to look up grantee {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "no account with that email" })),
            )
                .into_response()
        })?;

    let result = sqlx::query(
        "INSERT INTO device_permission (device_id, user_id, permission_level, granted_by)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(device_id)
    .bind(grantee.id)
    .bind(payload.permission_level.as_str())
    .bind(current_user.user_id)
    .execute(&state.pg_pool)
    .await;

    if let Err(err) = result {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Err((
                    StatusCode::CONFLICT,
                    Json(json!({ "error": "that account already holds a grant" })),
                )
                    .into_response());
            }
        }
        error!("Failed to insert device permission {err}");
        return Err(StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    let guard = state.public_events.lock().await;
    let _ = (*guard).send(PublicEvent::PermissionChanged { device_id });

    Ok(StatusCode::CREATED)
}

#[utoipa::path(
    delete,
    path = "/devices/:device_id/permissions/:permission_id",
    responses(
        (status = StatusCode::NO_CONTENT, description = "Grant revoked"),
        (status = StatusCode::NOT_FOUND, description = "Unknown device or grant"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = SHARING_TAG
)]
pub async fn revoke_permission(
    Path((device_id, permission_id)): Path<(Uuid, Uuid)>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<StatusCode, Response> {
    require_manage(&state, &current_user, device_id).await?;

    let deleted =
        sqlx::query("DELETE FROM device_permission WHERE id = $1 AND device_id = $2")
            .bind(permission_id)
            .bind(device_id)
            .execute(&state.pg_pool)
            .await
            .map_err(|err| {
                error!("Failed to revoke device permission {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            })?;

    if deleted.rows_affected() == 0 {
        return Err(StatusCode::NOT_FOUND.into_response());
    }

    let guard = state.public_events.lock().await;
    let _ = (*guard).send(PublicEvent::PermissionChanged { device_id });

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_level_parses_lowercase_only() {
        let viewer: PermissionLevel = serde_json::from_value(serde_json::json!("viewer")).unwrap();
        assert_eq!(viewer.as_str(), "viewer");

        let editor: PermissionLevel = serde_json::from_value(serde_json::json!("editor")).unwrap();
        assert_eq!(editor.as_str(), "editor");

        let bad: Result<PermissionLevel, _> = serde_json::from_value(serde_json::json!("Admin"));
        assert!(bad.is_err());
    }
}
