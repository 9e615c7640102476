use crate::{State, users::db::CurrentUser};
use axum::{
    Extension,
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jwks_client_rs::{JwksClient, source::WebSource};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

/// `aud` claim: issuers emit either a bare string or a list.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Multiple(Vec<String>),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    aud: Audience,
    exp: u64,
    iat: u64,
    iss: String,
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

pub async fn check(
    Extension(state): Extension<State>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();

    let url = Url::parse(&state.config.auth_issuer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .join(".well-known/jwks.json")
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let source: WebSource = WebSource::builder()
        .build(url)
        .map_err(|err| {
            error!("Failed to build JWKS source: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let client: JwksClient<WebSource> = JwksClient::builder()
        .time_to_live(Duration::from_secs(60))
        .build(source);

    let audience = vec![state.config.auth_audience.clone()];

    let claims = client
        .decode::<Claims>(token, &audience)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let current_user = CurrentUser::build(
        &state.pg_pool,
        &state.authorization,
        &claims.sub,
        claims.email.as_deref(),
        claims.name.as_deref(),
    )
    .await
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    request.extensions_mut().insert(current_user);

    let response = next.run(request).await;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_accepts_a_single_string() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "aud": "dongle-api",
            "exp": 2_000_000_000u64,
            "iat": 1_700_000_000u64,
            "iss": "https://auth.example.com/",
            "sub": "auth0|abc123",
        }))
        .unwrap();
        assert!(matches!(claims.aud, Audience::Single(value) if value == "dongle-api"));
        assert!(claims.email.is_none());
    }

    #[test]
    fn audience_accepts_a_list() {
        let claims: Claims = serde_json::from_value(serde_json::json!({
            "aud": ["dongle-api", "dongle-dashboard"],
            "exp": 2_000_000_000u64,
            "iat": 1_700_000_000u64,
            "iss": "https://auth.example.com/",
            "sub": "auth0|abc123",
            "email": "owner@example.com",
        }))
        .unwrap();
        assert!(matches!(claims.aud, Audience::Multiple(values) if values.len() == 2));
        assert_eq!(claims.email.as_deref(), Some("owner@example.com"));
    }
}
