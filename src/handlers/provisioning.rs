use crate::State;
use crate::device::{Device, RegistrationError};
use crate::device::schema::{ClaimStatus, DeviceRegistration, DeviceRegistrationResponse};
use crate::handlers::events::PublicEvent;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::{error, info};

/// Called by a device on every boot. Idempotent: re-registering a known
/// hardware id returns the existing record.
#[tracing::instrument(skip(state))]
pub async fn register_device(
    Extension(state): Extension<State>,
    Json(payload): Json<DeviceRegistration>,
) -> Result<Json<DeviceRegistrationResponse>, StatusCode> {
    info!("Registering device {:?}", payload);

    match Device::register(payload, &state.pg_pool, state.config).await {
        Ok(response) => {
            if response.already_registered.is_none() {
                let guard = state.public_events.lock().await;
                let _ = (*guard).send(PublicEvent::DeviceRegistered {
                    device_id: response.device_uuid,
                });
            }
            Ok(Json(response))
        }
        Err(RegistrationError::MalformedHardwareId) => Err(StatusCode::BAD_REQUEST),
        Err(err) => {
            error!("Failed to register device: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckClaimQuery {
    pub device_id: String,
}

/// Polled by an unclaimed device while it waits for a human to enter its
/// code. Unknown identifiers read as "not claimed yet", never an error.
#[tracing::instrument(skip(state))]
pub async fn check_claim(
    Extension(state): Extension<State>,
    Query(params): Query<CheckClaimQuery>,
) -> Result<Json<ClaimStatus>, StatusCode> {
    match Device::check_claim(&params.device_id, &state.pg_pool).await {
        Ok(status) => Ok(Json(status)),
        Err(err) => {
            error!("Failed to check claim state: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
