use crate::config::Config;
use crate::credentials;
pub(crate) use crate::device::schema::Device;
use crate::device::schema::{ClaimStatus, DeviceRegistration, DeviceRegistrationResponse};
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

pub mod schema;

/// A hardware id is the device MAC with the separators dropped: exactly 12
/// hex characters. The same pattern doubles as the claim code.
pub const HARDWARE_ID_LEN: usize = 12;

/// Validate and case-normalize a MAC-derived identifier. Returns `None` for
/// anything that must not reach the storage layer.
pub fn normalize_hardware_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() != HARDWARE_ID_LEN || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(trimmed.to_ascii_uppercase())
}

#[derive(Debug, sqlx::FromRow)]
struct DeviceClaimRow {
    id: Uuid,
    is_claimed: bool,
    user_id: Option<Uuid>,
}

#[derive(Debug, PartialEq, Eq)]
enum ClaimDecision {
    Claimable,
    OwnedByOther,
}

/// Whether `caller` may take (or re-take) a device in the given state. An
/// unclaimed device is free for anyone; a claimed one only for its owner,
/// who gets a fresh token out of the re-claim.
fn claim_decision(is_claimed: bool, owner: Option<Uuid>, caller: Uuid) -> ClaimDecision {
    match owner {
        Some(existing) if is_claimed && existing != caller => ClaimDecision::OwnedByOther,
        _ => ClaimDecision::Claimable,
    }
}

/// Result of a successful claim: the device's internal id plus the token
/// that was just bound to it.
#[derive(Debug)]
pub struct ClaimGrant {
    pub device_id: Uuid,
}

impl Device {
    /// Idempotent boot-time registration. A known hardware id returns the
    /// existing row untouched; a new one is inserted unclaimed with the
    /// hardware id doubling as its claim code.
    pub async fn register(
        payload: DeviceRegistration,
        pool: &PgPool,
        config: &Config,
    ) -> Result<DeviceRegistrationResponse, RegistrationError> {
        let hardware_id = normalize_hardware_id(&payload.mac_address)
            .ok_or(RegistrationError::MalformedHardwareId)?;

        #[derive(sqlx::FromRow)]
        struct RegisteredRow {
            id: Uuid,
            is_claimed: bool,
        }

        let inserted = sqlx::query_as::<_, RegisteredRow>(
            r#"
            INSERT INTO device (hardware_id, device_name, firmware_version, claim_code, is_online)
            VALUES ($1, $2, $3, $1, TRUE)
            ON CONFLICT (hardware_id) DO NOTHING
            RETURNING id, is_claimed
            "#,
        )
        .bind(&hardware_id)
        .bind(format!("T-Dongle-{}", &hardware_id[..6]))
        .bind(payload.firmware_version.as_deref().unwrap_or("1.0.0"))
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            info!("Registered device {hardware_id} -> {}", row.id);
            Device::notify_registration(&hardware_id, config).await;
            return Ok(DeviceRegistrationResponse {
                device_uuid: row.id,
                already_registered: None,
                is_claimed: None,
            });
        }

        // Either the device was known all along or a concurrent register
        // won the insert; the surviving row answers both cases.
        let existing = sqlx::query_as::<_, RegisteredRow>(
            "SELECT id, is_claimed FROM device WHERE hardware_id = $1",
        )
        .bind(&hardware_id)
        .fetch_one(pool)
        .await?;

        Ok(DeviceRegistrationResponse {
            device_uuid: existing.id,
            already_registered: Some(true),
            is_claimed: Some(existing.is_claimed),
        })
    }

    async fn notify_registration(hardware_id: &str, config: &Config) {
        if let Some(slack_hook_url) = &config.slack_hook_url {
            let message = json!({
                "text": format!("Device {hardware_id} registered via API"),
                "blocks": [
                    {
                        "type": "section",
                        "text": {
                            "type": "mrkdwn",
                            "text": format!(
                                "New dongle *{hardware_id}* has registered and is waiting to be claimed."
                            )
                        }
                    },
                ]
            });
            let client = reqwest::Client::new();
            let _res = client
                .post(slack_hook_url)
                .header("Content-Type", "application/json")
                .json(&message)
                .send()
                .await;
        }
    }

    /// Bind a device to `user_id` by claim code and mint its bearer token.
    ///
    /// The update is guarded on the device still being claimable at write
    /// time, so of two concurrent attempts exactly one ends up owning the
    /// device; the loser surfaces the same outcome as an unknown code.
    pub async fn claim(
        claim_code: &str,
        user_id: Uuid,
        pool: &PgPool,
    ) -> Result<ClaimGrant, ClaimError> {
        let code = normalize_hardware_id(claim_code).ok_or(ClaimError::MalformedCode)?;

        let candidate = sqlx::query_as::<_, DeviceClaimRow>(
            "SELECT id, is_claimed, user_id FROM device WHERE claim_code = $1",
        )
        .bind(&code)
        .fetch_optional(pool)
        .await?
        .ok_or(ClaimError::InvalidOrUsed)?;

        if claim_decision(candidate.is_claimed, candidate.user_id, user_id)
            == ClaimDecision::OwnedByOther
        {
            return Err(ClaimError::OwnedByOtherUser);
        }

        let token = credentials::generate_device_token();

        let updated = sqlx::query(
            r#"
            UPDATE device
            SET user_id = $2,
                is_claimed = TRUE,
                claimed_at = NOW(),
                device_token = $3,
                updated_at = NOW()
            WHERE id = $1
              AND (is_claimed = FALSE OR user_id = $2)
            "#,
        )
        .bind(candidate.id)
        .bind(user_id)
        .bind(&token)
        .execute(pool)
        .await?;

        if updated.rows_affected() == 0 {
            // Lost the race: someone else bound the device between the
            // lookup and the update.
            return Err(ClaimError::InvalidOrUsed);
        }

        info!("Device {} claimed by user {user_id}", candidate.id);
        Ok(ClaimGrant {
            device_id: candidate.id,
        })
    }

    /// Poll answer for a waiting device. An unknown (or even malformed)
    /// identifier reads as "not claimed yet" rather than an error, because
    /// the device may poll before its own register call lands.
    pub async fn check_claim(hardware_id: &str, pool: &PgPool) -> Result<ClaimStatus, sqlx::Error> {
        let normalized = match normalize_hardware_id(hardware_id) {
            Some(normalized) => normalized,
            None => return Ok(ClaimStatus::unclaimed()),
        };

        #[derive(sqlx::FromRow)]
        struct ClaimStateRow {
            is_claimed: bool,
            user_id: Option<Uuid>,
            device_token: Option<String>,
        }

        let row = sqlx::query_as::<_, ClaimStateRow>(
            "SELECT is_claimed, user_id, device_token FROM device WHERE hardware_id = $1",
        )
        .bind(&normalized)
        .fetch_optional(pool)
        .await
        .map_err(|err| {
            error!("Failed to fetch claim state for {normalized}: {err}");
            err
        })?;

        Ok(match row {
            Some(row) if row.is_claimed && row.user_id.is_some() => ClaimStatus {
                claimed: true,
                token: row.device_token,
            },
            _ => ClaimStatus::unclaimed(),
        })
    }
}

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("malformed hardware identifier")]
    MalformedHardwareId,
}

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    #[error("malformed claim code")]
    MalformedCode,
    #[error("invalid or already used code")]
    InvalidOrUsed,
    #[error("device belongs to another account")]
    OwnedByOtherUser,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_valid_ids_to_uppercase() {
        assert_eq!(
            normalize_hardware_id("aabbccddeeff").as_deref(),
            Some("AABBCCDDEEFF")
        );
        assert_eq!(
            normalize_hardware_id("  AABBCCDDEEFF ").as_deref(),
            Some("AABBCCDDEEFF")
        );
        assert_eq!(
            normalize_hardware_id("0123456789aB").as_deref(),
            Some("0123456789AB")
        );
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(normalize_hardware_id("AABBCCDDEEF").is_none());
        assert!(normalize_hardware_id("AABBCCDDEEFF0").is_none());
        assert!(normalize_hardware_id("").is_none());
    }

    #[test]
    fn rejects_non_hex_and_separators() {
        assert!(normalize_hardware_id("AABBCCDDEEFG").is_none());
        assert!(normalize_hardware_id("AA:BB:CC:DD:EE:FF").is_none());
        assert!(normalize_hardware_id("AA-BB-CC-DD-E").is_none());
    }

    #[test]
    fn unclaimed_device_is_claimable() {
        let caller = Uuid::new_v4();
        assert_eq!(claim_decision(false, None, caller), ClaimDecision::Claimable);
    }

    #[test]
    fn owner_may_reclaim_their_own_device() {
        let caller = Uuid::new_v4();
        assert_eq!(
            claim_decision(true, Some(caller), caller),
            ClaimDecision::Claimable
        );
    }

    #[test]
    fn claimed_by_someone_else_is_a_conflict() {
        let caller = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_eq!(
            claim_decision(true, Some(other), caller),
            ClaimDecision::OwnedByOther
        );
    }

    #[test]
    fn stale_owner_without_claim_flag_is_claimable() {
        // A released device keeps no owner, but even a row with an owner and
        // the flag cleared is treated as free for the taking.
        let caller = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert_eq!(
            claim_decision(false, Some(other), caller),
            ClaimDecision::Claimable
        );
    }
}
