use anyhow::Context;
use std::env;

#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub auth_issuer: String,
    pub auth_audience: String,
    pub bind_addr: String,
    pub sentry_url: Option<String>,
    pub slack_hook_url: Option<String>,
}

impl Config {
    pub fn new() -> anyhow::Result<Config> {
        _ = dotenvy::dotenv();

        Ok(Config {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required.")?,
            auth_issuer: env::var("AUTH_ISSUER").context("AUTH_ISSUER is required.")?,
            auth_audience: env::var("AUTH_AUDIENCE").context("AUTH_AUDIENCE is required.")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            sentry_url: env::var("SENTRY_URL").ok(),
            slack_hook_url: env::var("SLACK_HOOK_URL").ok(),
        })
    }
}
