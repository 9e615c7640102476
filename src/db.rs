use crate::device;
use crate::device::schema::{BackupReport, LogReport, StatusReport};
use anyhow::Result;
use sqlx::PgPool;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// A device whose hardware id + bearer token pair checked out against a
/// claimed row. Only constructed by `DBHandler::validate_device`.
#[derive(Debug, sqlx::FromRow)]
pub struct AuthedDevice {
    pub id: Uuid,
    pub hardware_id: String,
}

pub struct DBHandler;

impl DBHandler {
    /// Authenticate a telemetry request: identifier, token and claimed
    /// state must all match the same row. Anything less is a 401.
    pub async fn validate_device(
        hardware_id: &str,
        token: &str,
        pool: &PgPool,
    ) -> Result<AuthedDevice, DeviceAuthError> {
        let hardware_id = device::normalize_hardware_id(hardware_id)
            .ok_or(DeviceAuthError::UnauthorizedDevice)?;

        let authed = sqlx::query_as::<_, AuthedDevice>(
            "SELECT id, hardware_id FROM device
             WHERE hardware_id = $1 AND device_token = $2 AND is_claimed = TRUE",
        )
        .bind(&hardware_id)
        .bind(token)
        .fetch_optional(pool)
        .await
        .map_err(|err| {
            error!("Failed to fetch device information {err}");
            DeviceAuthError::Database(err)
        })?;

        authed.ok_or(DeviceAuthError::UnauthorizedDevice)
    }

    /// Mark the device alive. Separate from the status insert; a stale
    /// online flag is tolerable if one of the two writes fails.
    pub async fn touch_presence(device: &AuthedDevice, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE device SET is_online = TRUE, last_seen_at = NOW(), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(device.id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn insert_status(
        device: &AuthedDevice,
        report: &StatusReport,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_status
                 (device_id, display_active, wifi_connected, usb_host_active,
                  transfer_active, storage_used_mb, total_backups)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(device.id)
        .bind(report.display_active)
        .bind(report.wifi_connected)
        .bind(report.usb_host_active)
        .bind(report.transfer_active)
        .bind(report.storage_used_mb)
        .bind(report.total_backups)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn insert_log(device: &AuthedDevice, report: &LogReport, pool: &PgPool) -> Result<()> {
        sqlx::query("INSERT INTO device_log (device_id, log_level, message) VALUES ($1, $2, $3)")
            .bind(device.id)
            .bind(&report.log_level)
            .bind(&report.message)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn insert_backup(
        device: &AuthedDevice,
        report: &BackupReport,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_backup
                 (device_id, filename, file_size_mb, backup_type, status, destination)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(device.id)
        .bind(&report.filename)
        .bind(report.file_size_mb)
        .bind(&report.backup_type)
        .bind(&report.status)
        .bind(&report.destination)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum DeviceAuthError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("device is not authorized to access the API")]
    UnauthorizedDevice,
}
