use serde::{Deserialize, Serialize};
use sqlx::types::chrono;
use uuid::Uuid;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ClaimRequest {
    pub claim_code: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ClaimResponse {
    pub success: bool,
    pub device_id: Uuid,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RenameDevice {
    pub device_name: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LogHistoryQuery {
    pub limit: Option<i64>,
    pub level: Option<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct DeviceStatusRow {
    pub id: Uuid,
    pub device_id: Uuid,
    pub display_active: bool,
    pub wifi_connected: bool,
    pub usb_host_active: bool,
    pub transfer_active: bool,
    pub storage_used_mb: i32,
    pub total_backups: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct DeviceLogRow {
    pub id: Uuid,
    pub device_id: Uuid,
    pub log_level: String,
    pub message: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct DeviceBackupRow {
    pub id: Uuid,
    pub device_id: Uuid,
    pub filename: String,
    pub file_size_mb: Option<f64>,
    pub backup_type: String,
    pub status: String,
    pub destination: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
