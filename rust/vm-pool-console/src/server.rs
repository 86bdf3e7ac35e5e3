//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::api;
use crate::config::{AppConfig, ConfigurationError};
use crate::database::{self, SqliteBackend};
use crate::gateway;
use crate::logging::OpTimer;
use crate::{AppState, log_banner, log_init_step, log_init_warning, log_success};

/// Console version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the application with all routes and middleware.
///
/// `existing_db` replaces the configured database, which is how tests run
/// the full stack against an in-memory store.
pub async fn create_app(
    config: AppConfig,
    existing_db: Option<SqliteBackend>,
) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🖥️  VM Pool Console v{VERSION}"),
        format!("Database: {}", config.database.path)
    );

    // [1/3] Authentication
    let step_timer = OpTimer::new("server", "authentication");
    let auth_info = match (config.gateway.jwt_enabled(), config.gateway.trust_remote_user) {
        (true, true) => "🔐 Bearer JWT + trusted remote user",
        (true, false) => "🔐 Bearer JWT",
        (false, true) => "🔐 Trusted remote user",
        (false, false) => "🔐 None configured",
    };
    log_init_step!(1, 3, "Authentication", auth_info);
    if config.gateway.trust_remote_user {
        log_init_warning!(
            "Trusting the {} header; only expose this console behind an authenticating proxy",
            gateway::auth::REMOTE_USER_HEADER
        );
    }
    step_timer.finish();

    // [2/3] Database
    let step_timer = OpTimer::new("server", "database");
    let database = match existing_db {
        Some(db) => {
            log_init_step!(2, 3, "Database", "🗄️  Using shared connection");
            db
        }
        None => {
            let db = database::create_database(&config.database)
                .await
                .map_err(|e| {
                    ConfigurationError::connection_failed(
                        "SQLite",
                        &config.database.path,
                        e.to_string(),
                        "Check that the database directory exists and is writable",
                    )
                })?;
            log_init_step!(2, 3, "Database", format!("🗄️  {}", db.location()));
            db
        }
    };
    step_timer.finish();

    let state = AppState {
        config: Arc::new(config),
        database,
    };

    // [3/3] Router
    let step_timer = OpTimer::new("server", "router");
    let app = api::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(state.config.server.timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::auth::auth_middleware,
        ))
        .with_state(state);

    log_init_step!(3, 3, "Router", "🌐 Routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("VM Pool Console created successfully");

    Ok(app)
}
