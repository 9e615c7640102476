//! Credential / token issuer.
//!
//! `generate_device_token` mints the 256-bit device token used by the claim
//! state machine. Implementation per SPEC_FULL.md: 32 bytes (256 bits) from a
//! CSPRNG (`rand::rngs::OsRng`), base64-encoded with the `base64` crate's
//! STANDARD engine. Panics only if OS entropy is unavailable (fatal, no weak
//! fallback).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;

/// Mint a fresh 256-bit device token, base64-encoded.
pub fn generate_device_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
