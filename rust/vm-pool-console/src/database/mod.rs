//! Persistence layer.
//!
//! SQLite holds the pool tree, VMs, permission grants and queued VM tasks.
//! Handlers talk to it through the repository traits; multi-row mutations
//! run inside a [`ScopedTransaction`].

pub mod error;
pub mod queries;
pub mod repository;
pub mod schema;
pub mod sqlite;

pub use error::{DatabaseError, DatabaseResult};
pub use repository::{ActionOutcome, PermissionRepository, PoolRepository, VmRepository};
pub use sqlite::{IN_MEMORY, ScopedTransaction, SqliteBackend};

use crate::config::DatabaseConfig;

/// Open the configured database and seed it when empty.
pub async fn create_database(config: &DatabaseConfig) -> DatabaseResult<SqliteBackend> {
    let database = SqliteBackend::open(&config.path)?;
    if database.bootstrap(config.bootstrap_admin.clone()).await? {
        tracing::info!(
            admin = config.bootstrap_admin.as_deref().unwrap_or("<none>"),
            "Seeded empty database with root and default hardware pools"
        );
    }
    Ok(database)
}
