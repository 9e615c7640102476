use serde::{Deserialize, Serialize};
use sqlx::types::chrono;
use uuid::Uuid;

/// Dashboard-facing view of a device row. The bearer token and claim code
/// never leave the server through this struct.
#[derive(Debug, Serialize, sqlx::FromRow, utoipa::ToSchema)]
pub struct Device {
    pub id: Uuid,
    pub hardware_id: String,
    pub device_name: String,
    pub firmware_version: Option<String>,
    pub is_claimed: bool,
    pub user_id: Option<Uuid>,
    pub claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_online: bool,
    pub last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DeviceRegistration {
    pub mac_address: String,
    pub firmware_version: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DeviceRegistrationResponse {
    pub device_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_registered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_claimed: Option<bool>,
}

/// Answer to an unclaimed device polling for its binding. `token` is only
/// populated once the claim is genuinely bound to an owner.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ClaimStatus {
    pub claimed: bool,
    pub token: Option<String>,
}

impl ClaimStatus {
    pub fn unclaimed() -> Self {
        ClaimStatus {
            claimed: false,
            token: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusReport {
    pub display_active: bool,
    pub wifi_connected: bool,
    pub usb_host_active: bool,
    pub transfer_active: bool,
    pub storage_used_mb: i32,
    pub total_backups: i32,
}

#[derive(Debug, Deserialize)]
pub struct LogReport {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub message: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct BackupReport {
    pub filename: String,
    #[serde(default)]
    pub file_size_mb: Option<f64>,
    #[serde(default = "default_backup_type")]
    pub backup_type: String,
    #[serde(default = "default_backup_status")]
    pub status: String,
    #[serde(default)]
    pub destination: Option<String>,
}

fn default_backup_type() -> String {
    "auto".to_string()
}

fn default_backup_status() -> String {
    "completed".to_string()
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_report_fills_missing_fields() {
        let report: StatusReport =
            serde_json::from_value(serde_json::json!({ "wifi_connected": true })).unwrap();
        assert!(report.wifi_connected);
        assert!(!report.display_active);
        assert_eq!(report.storage_used_mb, 0);
        assert_eq!(report.total_backups, 0);
    }

    #[test]
    fn log_report_defaults_to_info() {
        let report: LogReport =
            serde_json::from_value(serde_json::json!({ "message": "boot ok" })).unwrap();
        assert_eq!(report.log_level, "info");
    }

    #[test]
    fn log_report_requires_message() {
        let report: Result<LogReport, _> =
            serde_json::from_value(serde_json::json!({ "log_level": "error" }));
        assert!(report.is_err());
    }

    #[test]
    fn backup_report_defaults() {
        let report: BackupReport =
            serde_json::from_value(serde_json::json!({ "filename": "backup-001.img" })).unwrap();
        assert_eq!(report.backup_type, "auto");
        assert_eq!(report.status, "completed");
        assert!(report.file_size_mb.is_none());
    }

    #[test]
    fn registration_response_omits_absent_flags() {
        let response = DeviceRegistrationResponse {
            device_uuid: Uuid::nil(),
            already_registered: None,
            is_claimed: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("already_registered").is_none());
        assert!(value.get("is_claimed").is_none());
    }
}
