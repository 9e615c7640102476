use crate::State;
use crate::db::{AuthedDevice, DBHandler};
use crate::device::schema::{BackupReport, HeartbeatResponse, LogReport, StatusReport};
use crate::handlers::events::PublicEvent;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatAction {
    Status,
    Log,
    Backup,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatQuery {
    pub action: HeartbeatAction,
}

/// Authenticated telemetry ingestion. The `AuthedDevice` extractor has
/// already matched identifier + token + claimed state; a failure there is
/// a 401 before anything is written.
#[tracing::instrument(skip(state, body))]
pub async fn heartbeat(
    device: AuthedDevice,
    Extension(state): Extension<State>,
    Query(query): Query<HeartbeatQuery>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<HeartbeatResponse>, StatusCode> {
    debug!(
        "Heartbeat {:?} from {}",
        query.action, device.hardware_id
    );

    let event = match query.action {
        HeartbeatAction::Status => {
            let report: StatusReport =
                serde_json::from_value(body).map_err(|_| StatusCode::BAD_REQUEST)?;

            // Presence update and status insert are deliberately separate
            // statements; a stale online flag is tolerable.
            DBHandler::touch_presence(&device, &state.pg_pool)
                .await
                .unwrap_or_else(|err| {
                    error!("Failed to update presence for {}: {err}", device.hardware_id);
                });

            DBHandler::insert_status(&device, &report, &state.pg_pool)
                .await
                .map_err(|err| {
                    error!("Failed to insert status for {}: {err}", device.hardware_id);
                    StatusCode::INTERNAL_SERVER_ERROR
                })?;

            PublicEvent::StatusReported {
                device_id: device.id,
            }
        }
        HeartbeatAction::Log => {
            let report: LogReport =
                serde_json::from_value(body).map_err(|_| StatusCode::BAD_REQUEST)?;

            DBHandler::insert_log(&device, &report, &state.pg_pool)
                .await
                .map_err(|err| {
                    error!("Failed to insert log for {}: {err}", device.hardware_id);
                    StatusCode::INTERNAL_SERVER_ERROR
                })?;

            PublicEvent::LogAppended {
                device_id: device.id,
            }
        }
        HeartbeatAction::Backup => {
            let report: BackupReport =
                serde_json::from_value(body).map_err(|_| StatusCode::BAD_REQUEST)?;

            DBHandler::insert_backup(&device, &report, &state.pg_pool)
                .await
                .map_err(|err| {
                    error!("Failed to insert backup for {}: {err}", device.hardware_id);
                    StatusCode::INTERNAL_SERVER_ERROR
                })?;

            PublicEvent::BackupRecorded {
                device_id: device.id,
            }
        }
    };

    let guard = state.public_events.lock().await;
    let _ = (*guard).send(event);

    Ok(Json(HeartbeatResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_the_three_known_values() {
        for (raw, expected) in [
            ("status", "Status"),
            ("log", "Log"),
            ("backup", "Backup"),
        ] {
            let action: HeartbeatAction =
                serde_json::from_value(serde_json::json!(raw)).unwrap();
            assert_eq!(format!("{action:?}"), expected);
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let action: Result<HeartbeatAction, _> =
            serde_json::from_value(serde_json::json!("check-claim"));
        assert!(action.is_err());
    }
}
