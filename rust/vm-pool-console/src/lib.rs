//! VM Pool Console - web controller for virtual machine resource pools
//!
//! Users browse the VM resource pools they may see, inspect a pool's VMs and
//! permission grants, create, rename and remove pools, and queue lifecycle
//! actions (start, shutdown, suspend, ...) on batches of VMs. Every request
//! is authorized against roles granted on the pool hierarchy; a grant on a
//! pool applies to everything beneath it.
//!
//! # Architecture
//!
//! - [`config`]: Configuration loading and validation
//! - [`domain`]: Pools, VMs, VM actions, roles and privileges
//! - [`database`]: SQLite persistence behind repository traits
//! - [`gateway`]: Authentication and flash messages
//! - [`api`]: HTTP endpoints and view models
//! - [`server`]: Router assembly and middleware
//!
//! # Example
//!
//! ```rust,ignore
//! use vm_pool_console::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config, None).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod gateway;
pub mod logging;
pub mod server;

use std::sync::Arc;

use config::AppConfig;
use database::SqliteBackend;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Pool, VM and permission storage.
    pub database: SqliteBackend,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("database", &self.database.location())
            .finish()
    }
}
