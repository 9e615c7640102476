use crate::State;
use crate::device::{ClaimError, Device};
use crate::handlers::events::PublicEvent;
use crate::middlewares::authorization::{self, AccessLevel, DeviceAccess};
use crate::users::db::CurrentUser;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, extract::Path, extract::Query};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

pub mod types;

const DEVICES_TAG: &str = "devices";

const DEVICE_COLUMNS: &str = "id, hardware_id, device_name, firmware_version, is_claimed, \
     user_id, claimed_at, is_online, last_seen_at, created_at, updated_at";

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Resolve the caller's access to a device, mapping "no such device" and
/// "no relation to it" to the responses the handlers return.
async fn require_access(
    state: &State,
    current_user: &CurrentUser,
    device_id: Uuid,
) -> Result<AccessLevel, Response> {
    match authorization::device_access(current_user, device_id, &state.pg_pool).await {
        Ok(DeviceAccess::Granted(level)) => Ok(level),
        Ok(DeviceAccess::Denied) => Err(StatusCode::FORBIDDEN.into_response()),
        Ok(DeviceAccess::NotFound) => Err(StatusCode::NOT_FOUND.into_response()),
        Err(err) => {
            error!("Failed to resolve device access {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

#[utoipa::path(
    post,
    path = "/devices/claim",
    request_body = types::ClaimRequest,
    responses(
        (status = StatusCode::OK, description = "Device bound to the calling account", body = types::ClaimResponse),
        (status = StatusCode::BAD_REQUEST, description = "Malformed claim code"),
        (status = StatusCode::NOT_FOUND, description = "Invalid or already used code"),
        (status = StatusCode::CONFLICT, description = "Device belongs to another account"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = DEVICES_TAG
)]
pub async fn claim_device(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(payload): Json<types::ClaimRequest>,
) -> Result<Json<types::ClaimResponse>, Response> {
    if !authorization::check(&current_user, "devices", "write") {
        return Err(StatusCode::FORBIDDEN.into_response());
    }

    match Device::claim(&payload.claim_code, current_user.user_id, &state.pg_pool).await {
        Ok(grant) => {
            let guard = state.public_events.lock().await;
            let _ = (*guard).send(PublicEvent::DeviceClaimed {
                device_id: grant.device_id,
            });

            Ok(Json(types::ClaimResponse {
                success: true,
                device_id: grant.device_id,
            }))
        }
        Err(ClaimError::MalformedCode) => Err(error_body(
            StatusCode::BAD_REQUEST,
            "malformed claim code",
        )),
        Err(ClaimError::InvalidOrUsed) => Err(error_body(
            StatusCode::NOT_FOUND,
            "invalid or already used code",
        )),
        Err(ClaimError::OwnedByOtherUser) => Err(error_body(
            StatusCode::CONFLICT,
            "device belongs to another account",
        )),
        Err(ClaimError::Database(err)) => {
            error!("Failed to claim device {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = StatusCode::OK, description = "Devices visible to the caller", body = Vec<Device>),
        (status = StatusCode::INTERNAL_SERVER_ERROR, description = "Failed to retrieve devices"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = DEVICES_TAG
)]
pub async fn get_devices(
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Vec<Device>>, StatusCode> {
    if !authorization::check(&current_user, "devices", "read") {
        return Err(StatusCode::FORBIDDEN);
    }

    // Visibility is decided here, not in the dashboard: admins see the
    // fleet, everyone else their own plus explicitly shared devices.
    let devices = if current_user.is_admin {
        sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM device ORDER BY created_at DESC"
        ))
        .fetch_all(&state.pg_pool)
        .await
    } else {
        sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM device d
             WHERE d.user_id = $1
                OR EXISTS (
                    SELECT 1 FROM device_permission p
                    WHERE p.device_id = d.id AND p.user_id = $1
                )
             ORDER BY created_at DESC"
        ))
        .bind(current_user.user_id)
        .fetch_all(&state.pg_pool)
        .await
    }
    .map_err(|err| {
        error!("Failed to get devices {err}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(devices))
}

#[utoipa::path(
    get,
    path = "/devices/:device_id",
    responses(
        (status = StatusCode::OK, description = "Device retrieved successfully", body = Device),
        (status = StatusCode::FORBIDDEN, description = "No access to this device"),
        (status = StatusCode::NOT_FOUND, description = "Unknown device"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = DEVICES_TAG
)]
pub async fn get_device_info(
    Path(device_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Device>, Response> {
    require_access(&state, &current_user, device_id).await?;

    let device = sqlx::query_as::<_, Device>(&format!(
        "SELECT {DEVICE_COLUMNS} FROM device WHERE id = $1"
    ))
    .bind(device_id)
    .fetch_one(&state.pg_pool)
    .await
    .map_err(|err| {
        error!("Failed to fetch device info {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    Ok(Json(device))
}

pub async fn update_device_name(
    Path(device_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Json(payload): Json<types::RenameDevice>,
) -> Result<StatusCode, Response> {
    let access = require_access(&state, &current_user, device_id).await?;
    if !access.can_write() {
        return Err(StatusCode::FORBIDDEN.into_response());
    }

    let device_name = payload.device_name.trim();
    if device_name.is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "device name is empty"));
    }

    sqlx::query("UPDATE device SET device_name = $2, updated_at = NOW() WHERE id = $1")
        .bind(device_id)
        .bind(device_name)
        .execute(&state.pg_pool)
        .await
        .map_err(|err| {
            error!("Failed to rename device {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;

    let guard = state.public_events.lock().await;
    let _ = (*guard).send(PublicEvent::DeviceUpdated { device_id });

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/devices/:device_id",
    responses(
        (status = StatusCode::NO_CONTENT, description = "Device and its telemetry deleted"),
        (status = StatusCode::FORBIDDEN, description = "Only the owner or an admin may delete"),
        (status = StatusCode::NOT_FOUND, description = "Unknown device"),
    ),
    security(
        ("Access Token" = [])
    ),
    tag = DEVICES_TAG
)]
pub async fn delete_device(
    Path(device_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<StatusCode, Response> {
    let access = require_access(&state, &current_user, device_id).await?;
    if !access.can_manage() {
        return Err(StatusCode::FORBIDDEN.into_response());
    }

    // Cascade drops telemetry and grants with the device row; this is the
    // only way a claimed device ever becomes unbound.
    sqlx::query("DELETE FROM device WHERE id = $1")
        .bind(device_id)
        .execute(&state.pg_pool)
        .await
        .map_err(|err| {
            error!("Failed to delete device {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?;

    let guard = state.public_events.lock().await;
    let _ = (*guard).send(PublicEvent::DeviceDeleted { device_id });

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_status_for_device(
    Path(device_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<types::HistoryQuery>,
) -> Result<Json<Vec<types::DeviceStatusRow>>, Response> {
    require_access(&state, &current_user, device_id).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let rows = sqlx::query_as::<_, types::DeviceStatusRow>(
        "SELECT id, device_id, display_active, wifi_connected, usb_host_active,
                transfer_active, storage_used_mb, total_backups, created_at
         FROM device_status
         WHERE device_id = $1
         ORDER BY created_at DESC
         LIMIT $2",
    )
    .bind(device_id)
    .bind(limit)
    .fetch_all(&state.pg_pool)
    .await
    .map_err(|err| {
        error!("Failed to get status history {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    Ok(Json(rows))
}

pub async fn get_logs_for_device(
    Path(device_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<types::LogHistoryQuery>,
) -> Result<Json<Vec<types::DeviceLogRow>>, Response> {
    require_access(&state, &current_user, device_id).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let rows = match &query.level {
        Some(level) => {
            sqlx::query_as::<_, types::DeviceLogRow>(
                "SELECT id, device_id, log_level, message, created_at
                 FROM device_log
                 WHERE device_id = $1 AND log_level = $3
                 ORDER BY created_at DESC
                 LIMIT $2",
            )
            .bind(device_id)
            .bind(limit)
            .bind(level)
            .fetch_all(&state.pg_pool)
            .await
        }
        None => {
            sqlx::query_as::<_, types::DeviceLogRow>(
                "SELECT id, device_id, log_level, message, created_at
                 FROM device_log
                 WHERE device_id = $1
                 ORDER BY created_at DESC
                 LIMIT $2",
            )
            .bind(device_id)
            .bind(limit)
            .fetch_all(&state.pg_pool)
            .await
        }
    }
    .map_err(|err| {
        error!("Failed to get logs {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    Ok(Json(rows))
}

pub async fn get_backups_for_device(
    Path(device_id): Path<Uuid>,
    Extension(state): Extension<State>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<types::HistoryQuery>,
) -> Result<Json<Vec<types::DeviceBackupRow>>, Response> {
    require_access(&state, &current_user, device_id).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    let rows = sqlx::query_as::<_, types::DeviceBackupRow>(
        "SELECT id, device_id, filename, file_size_mb, backup_type, status,
                destination, created_at
         FROM device_backup
         WHERE device_id = $1
         ORDER BY created_at DESC
         LIMIT $2",
    )
    .bind(device_id)
    .bind(limit)
    .fetch_all(&state.pg_pool)
    .await
    .map_err(|err| {
        error!("Failed to get backup history {err}");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })?;

    Ok(Json(rows))
}
