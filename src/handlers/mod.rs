pub mod devices;
pub mod events;
pub mod health;
pub mod heartbeat;
pub mod permissions;
pub mod provisioning;
pub mod users;

use crate::State;
use crate::db::{AuthedDevice, DBHandler, DeviceAuthError};
use axum::{
    async_trait,
    extract::{Extension, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use tracing::error;

// Device requests carry their identity in plain headers rather than an
// Authorization scheme, matching what the firmware sends.
pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const DEVICE_TOKEN_HEADER: &str = "x-device-token";

// https://docs.rs/axum/latest/axum/extract/index.html#accessing-other-extractors-in-fromrequest-or-fromrequestparts-implementations
#[async_trait]
impl<S> FromRequestParts<S> for AuthedDevice
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };

        let (Some(hardware_id), Some(token)) =
            (header(DEVICE_ID_HEADER), header(DEVICE_TOKEN_HEADER))
        else {
            return Err((StatusCode::UNAUTHORIZED,).into_response());
        };

        use axum::RequestPartsExt;
        let Extension(state) = parts
            .extract::<Extension<State>>()
            .await
            .map_err(|err| err.into_response())?;

        let device = DBHandler::validate_device(&hardware_id, &token, &state.pg_pool)
            .await
            .map_err(|auth_err| match auth_err {
                DeviceAuthError::UnauthorizedDevice => (StatusCode::UNAUTHORIZED,).into_response(),
                DeviceAuthError::Database(err) => {
                    error!("Database error: {:?}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR,).into_response()
                }
            })?;

        Ok(device)
    }
}
