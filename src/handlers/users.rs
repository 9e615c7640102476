use crate::State;
use crate::middlewares::authorization;
use crate::users::db::CurrentUser;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, extract::Path};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::types::chrono;
use tracing::{error, info};
use uuid::Uuid;

const USERS_TAG: &str = "users";

#[derive(Debug, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct UserWithRole {
    pub id: Uuid,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UpdateRole {
    pub role: String,
}

#[utoipa::path(
    get,
    path = "/users",
    responses(
        (status = StatusCode::OK, description = "All accounts with their roles", body = Vec<UserWithRole>),
        (status = StatusCode::FORBIDDEN, description = "Admin only"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = USERS_TAG
)]
pub async fn get_users(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<UserWithRole>>, StatusCode> {
    if !authorization::check(&current_user, "users", "read") {
        return Err(StatusCode::FORBIDDEN);
    }

    let users = sqlx::query_as::<_, UserWithRole>(
        "SELECT u.id, u.email, u.full_name, u.created_at, r.role
         FROM users u
         LEFT JOIN user_roles r ON r.user_id = u.id
         ORDER BY u.created_at",
    )
    .fetch_all(&state.pg_pool)
    .await
    .map_err(|err| {
        error!("Failed to list users {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(users))
}

#[utoipa::path(
    put,
    path = "/users/:user_id/role",
    request_body = UpdateRole,
    responses(
        (status = StatusCode::OK, description = "Role replaced"),
        (status = StatusCode::BAD_REQUEST, description = "Role is not defined in the configuration"),
        (status = StatusCode::FORBIDDEN, description = "Admin only"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = USERS_TAG
)]
pub async fn update_user_role(
    Path(user_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(payload): Json<UpdateRole>,
) -> Result<StatusCode, Response> {
    if !authorization::check(&current_user, "users", "write") {
        return Err(StatusCode::FORBIDDEN.into_response());
    }

    if !state.authorization.roles.contains_key(&payload.role) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "unknown role" })),
        )
            .into_response());
    }

    let mut tx = state.pg_pool.begin().await.map_err(|err| {
        error!("Failed to start transaction {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    // Replace rather than update in place: a user holds one role and the
    // assignment records who handed it out.
    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            error!("Failed to clear previous role {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;

    sqlx::query("INSERT INTO user_roles (user_id, role, assigned_by) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(&payload.role)
        .bind(current_user.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            error!("Failed to assign role {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;

    tx.commit().await.map_err(|err| {
        error!("Failed to commit transaction {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    info!("Role of {user_id} set to {} by {}", payload.role, current_user.user_id);

    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/users/:user_id",
    responses(
        (status = StatusCode::NO_CONTENT, description = "Account removed, owned devices released"),
        (status = StatusCode::CONFLICT, description = "An admin cannot delete their own account"),
        (status = StatusCode::FORBIDDEN, description = "Admin only"),
        (status = StatusCode::NOT_FOUND, description = "Unknown user"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = USERS_TAG
)]
pub async fn delete_user(
    Path(user_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<StatusCode, Response> {
    if !authorization::check(&current_user, "users", "write") {
        return Err(StatusCode::FORBIDDEN.into_response());
    }

    if user_id == current_user.user_id {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({ "error": "cannot delete the calling account" })),
        )
            .into_response());
    }

    let mut tx = state.pg_pool.begin().await.map_err(|err| {
        error!("Failed to start transaction {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    // Owned devices go back to unclaimed; clearing the token with the
    // owner keeps "token present iff claimed" intact.
    sqlx::query(
        "UPDATE device
         SET user_id = NULL,
             is_claimed = FALSE,
             device_token = NULL,
             claimed_at = NULL,
             updated_at = NOW()
         WHERE user_id = $1",
    )
    .bind(user_id)
    .execute(&mut *tx)
    .await
    .map_err(|err| {
        error!("Failed to release devices of {user_id}: {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            error!("Failed to delete user {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;

    if deleted.rows_affected() == 0 {
        return Err(StatusCode::NOT_FOUND.into_response());
    }

    tx.commit().await.map_err(|err| {
        error!("Failed to commit transaction {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    info!("User {user_id} deleted by {}", current_user.user_id);

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = StatusCode::OK, description = "Profile of the calling account", body = UserWithRole),
        (status = StatusCode::UNAUTHORIZED, description = "No valid session"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = USERS_TAG
)]
pub async fn me(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<UserWithRole>, StatusCode> {
    let profile = sqlx::query_as::<_, UserWithRole>(
        "SELECT u.id, u.email, u.full_name, u.created_at, r.role
         FROM users u
         LEFT JOIN user_roles r ON r.user_id = u.id
         WHERE u.id = $1",
    )
    .bind(current_user.user_id)
    .fetch_one(&state.pg_pool)
    .await
    .map_err(|err| {
        error!("Failed to fetch profile {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(profile))
}
