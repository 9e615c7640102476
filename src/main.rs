use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::MatchedPath;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::{
    Extension,
    extract::Request,
    middleware,
    routing::{get, post, put},
};
use config::Config;
use handlers::events::PublicEvent;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use middlewares::authorization::AuthorizationConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::borrow::Cow;
use std::env;
use std::fs;
use std::future::ready;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast::Sender;
use tokio::sync::{Mutex, broadcast};
use tower::ServiceBuilder;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, prelude::*};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_scalar::{Scalar, Servable as ScalarServable};

mod config;
mod credentials;
mod db;
mod device;
mod handlers;
mod middlewares;
mod users;

#[derive(Clone, Debug)]
pub struct State {
    pg_pool: PgPool,
    config: &'static Config,
    public_events: Arc<Mutex<Sender<PublicEvent>>>,
    authorization: Arc<AuthorizationConfig>,
}

fn main() {
    let roles_path = env::var("ROLES_PATH").unwrap_or_else(|_| "roles.toml".to_string());

    let roles_toml = fs::read_to_string(&roles_path)
        .unwrap_or_else(|_| panic!("Failed to read roles file at {}", roles_path));

    let authorization =
        AuthorizationConfig::new(&roles_toml).expect("Failed to load authorization config");

    let config: &'static Config = Box::leak(Box::new(
        Config::new().expect("error: failed to construct config"),
    ));

    // Sentry needs to be initialized outside of an async block.
    // See https://docs.sentry.io/platforms/rust.
    let _sentry_guard = config.sentry_url.as_ref().map(|sentry_url| {
        sentry::init(sentry::ClientOptions {
            dsn: Some(sentry_url.parse().expect("Invalid Sentry DSN")),
            traces_sample_rate: 0.75,
            release: sentry::release_name!(),
            environment: match env::var("ENVIRONMENT") {
                Ok(value) => Some(Cow::Owned(value)),
                Err(_) => Some(Cow::Borrowed("development")),
            },
            ..Default::default()
        })
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{}", authorization);

    // Corresponds to `#[tokio::main]`.
    // See https://docs.rs/tokio-macros/latest/src/tokio_macros/lib.rs.html#225.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("error: failed to initialize tokio runtime")
        .block_on(async {
            _ = tokio::spawn(async move { start_main_server(config, authorization).await }).await;
        });
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Access Token",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("Authorization"))),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(modifiers(&SecurityAddon))]
struct ApiDoc;

async fn start_main_server(config: &'static Config, authorization: AuthorizationConfig) {
    info!("Starting up DONGLE API");
    // set up connection pool
    let pool = PgPoolOptions::new()
        .max_connections(100)
        .min_connections(10)
        .connect(&config.database_url)
        .await
        .expect("can't connect to database.");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("sqlx migration failed");

    let (tx_message, _rx_message) = broadcast::channel::<PublicEvent>(16);
    let tx_message = Arc::new(Mutex::new(tx_message));

    let state = State {
        pg_pool: pool,
        config,
        public_events: tx_message,
        authorization: Arc::new(authorization),
    };

    let recorder_handle = setup_metrics_recorder();

    // build our application with a route
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(routes!(handlers::devices::get_devices))
        .routes(routes!(handlers::devices::claim_device))
        .routes(routes!(
            handlers::devices::get_device_info,
            handlers::devices::delete_device
        ))
        .routes(routes!(
            handlers::permissions::get_permissions_for_device,
            handlers::permissions::grant_permission
        ))
        .routes(routes!(handlers::permissions::revoke_permission))
        .routes(routes!(handlers::users::get_users))
        .routes(routes!(handlers::users::me))
        .routes(routes!(handlers::users::update_user_role))
        .routes(routes!(handlers::users::delete_user))
        .route(
            "/devices/:device_id/name",
            put(handlers::devices::update_device_name),
        )
        .route(
            "/devices/:device_id/status",
            get(handlers::devices::get_status_for_device),
        )
        .route(
            "/devices/:device_id/logs",
            get(handlers::devices::get_logs_for_device),
        )
        .route(
            "/devices/:device_id/backups",
            get(handlers::devices::get_backups_for_device),
        )
        // Auth middleware. Every route prior to this is protected.
        .route_layer(middleware::from_fn(middlewares::authentication::check))
        .routes(routes!(handlers::events::sse_handler))
        .split_for_parts();

    // !Routes after the auth layer are not protected!
    let dongle_router = Router::new()
        .route(
            "/dongle/register",
            post(handlers::provisioning::register_device).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(|_| async move {
                        (StatusCode::INTERNAL_SERVER_ERROR, "Unhandled server error")
                    }))
                    .layer(RequestDecompressionLayer::new()),
            ),
        )
        .route(
            "/dongle/check-claim",
            get(handlers::provisioning::check_claim),
        )
        .route(
            "/dongle/heartbeat",
            post(handlers::heartbeat::heartbeat).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(|_| async move {
                        (StatusCode::INTERNAL_SERVER_ERROR, "Unhandled server error")
                    }))
                    .layer(RequestDecompressionLayer::new()),
            ),
        );

    let json_specification = api.to_pretty_json().expect("API docs generation failed");

    let app = router
        .merge(dongle_router)
        .route("/metrics", get(move || ready(recorder_handle.render())))
        .route("/health", get(handlers::health::check))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(Extension(state))
        .route(
            "/api-docs/openapi.json",
            get(move || ready(json_specification.clone())),
        )
        .merge(Scalar::with_url("/api-docs", api));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .expect("error: failed to bind to port");
    info!("{:<12} - {:?}", "LISTENING", listener.local_addr());

    axum::serve(listener, app.into_make_service())
        .await
        .expect("error: failed to initialize axum server");
}

fn setup_metrics_recorder() -> PrometheusHandle {
    // Metrics
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )
        .expect("error: failed to build prometheus recorder")
        .install_recorder()
        .expect("error: failed to install prometheus recorder")
}

async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::increment_counter!("http_requests_total", &labels);
    metrics::histogram!("http_requests_duration_seconds", latency, &labels);

    response
}
