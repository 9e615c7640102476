use crate::State;
use axum::{
    Error, Extension,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Serialize;
use std::time::Duration;
use tokio_stream::{StreamExt as _, wrappers::BroadcastStream};
use uuid::Uuid;

const EVENTS_TAG: &str = "events";

/// Change notifications pushed to dashboard subscribers. Events only carry
/// identifiers; clients refetch the canonical state on every notification,
/// so delivery order does not matter.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublicEvent {
    DeviceRegistered { device_id: Uuid },
    DeviceClaimed { device_id: Uuid },
    DeviceUpdated { device_id: Uuid },
    DeviceDeleted { device_id: Uuid },
    StatusReported { device_id: Uuid },
    LogAppended { device_id: Uuid },
    BackupRecorded { device_id: Uuid },
    PermissionChanged { device_id: Uuid },
}

#[utoipa::path(
    get,
    path = "/events",
    responses(
        (status = StatusCode::OK, description = "Event stream opened"),
        (status = StatusCode::INTERNAL_SERVER_ERROR, description = "Failed to initiate event stream"),
    ),
    tag = EVENTS_TAG
)]
pub async fn sse_handler(
    Extension(state): Extension<State>,
) -> Sse<impl Stream<Item = Result<Event, Error>>> {
    let tx_message = state.public_events;

    let guard = tx_message.lock().await;
    let rx_message = (*guard).subscribe();

    // A lagged subscriber just misses notifications; it refetches on the
    // next one anyway.
    let stream = BroadcastStream::new(rx_message)
        .filter_map(|event| event.ok())
        .map(|event| Event::default().json_data(event));

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(1))
            .text("keep-alive-text"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_kind_tag() {
        let event = PublicEvent::DeviceClaimed {
            device_id: Uuid::nil(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "device_claimed");
        assert!(value["device_id"].is_string());
    }
}
