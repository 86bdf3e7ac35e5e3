//! SQLite backend.
//!
//! One connection sits behind a mutex; every call hops onto the blocking
//! pool with `spawn_blocking`. Multi-row mutations go through
//! [`SqliteBackend::transaction`], which hands the closure a
//! [`ScopedTransaction`] that rolls back unless the closure returns `Ok`.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use super::error::{DatabaseError, DatabaseResult};
use super::queries;
use super::schema::{DEFAULT_HARDWARE_POOL_NAME, ROOT_POOL_NAME, SQLITE_SCHEMA};
use crate::domain::{
    Pool, PoolId, PoolKind, Privilege, PrivilegeSet, Role, Vm, VmAction, VmId, VmTask,
};
use crate::logging::OpTimer;

/// Path value that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Shared handle to the console database.
#[derive(Clone)]
pub struct SqliteBackend {
    location: Arc<str>,
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = path.as_ref();
        let conn = if path.as_os_str() == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        };
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SQLITE_SCHEMA)?;

        tracing::debug!(location = %path.display(), "SQLite schema applied");

        Ok(Self {
            location: Arc::from(path.to_string_lossy().as_ref()),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> DatabaseResult<Self> {
        Self::open(IN_MEMORY)
    }

    /// Where the database lives, as configured.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run `f` against the shared connection on the blocking pool.
    pub async fn call<T, F>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }

    /// Run `f` inside one transaction, committing only if it returns `Ok`.
    pub async fn transaction<T, F>(&self, operation: &'static str, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&ScopedTransaction<'_>) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let timer = OpTimer::new("database", operation);
        let result = self
            .call(move |conn| {
                let tx = ScopedTransaction::begin(conn)?;
                let value = f(&tx)?;
                tx.commit()?;
                Ok(value)
            })
            .await;
        timer.finish_with_result(&result);
        result
    }

    /// Check that the connection answers.
    pub async fn ping(&self) -> DatabaseResult<()> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    /// Seed an empty database with a root directory pool and a default
    /// hardware pool, granting `admin` Super Admin on the root.
    ///
    /// Returns `false` when the database already had pools.
    pub async fn bootstrap(&self, admin: Option<String>) -> DatabaseResult<bool> {
        self.transaction("bootstrap", move |tx| {
            if queries::count_pools(tx.conn())? > 0 {
                return Ok(false);
            }
            let root = queries::insert_pool_row(tx.conn(), PoolKind::Directory, ROOT_POOL_NAME, None, None)?;
            queries::insert_pool_row(
                tx.conn(),
                PoolKind::Hardware,
                DEFAULT_HARDWARE_POOL_NAME,
                None,
                Some(root.id),
            )?;
            if let Some(admin) = admin.as_deref() {
                queries::upsert_permission(tx.conn(), admin, Role::SuperAdmin, root.id)?;
            }
            Ok(true)
        })
        .await
    }
}

/// A transaction scoped to one storage call.
///
/// Dropping it without [`commit`](Self::commit) rolls back.
pub struct ScopedTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
}

impl std::fmt::Debug for ScopedTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTransaction").finish_non_exhaustive()
    }
}

impl<'conn> ScopedTransaction<'conn> {
    fn begin(conn: &'conn mut Connection) -> DatabaseResult<Self> {
        Ok(Self {
            tx: conn.transaction()?,
        })
    }

    fn commit(self) -> DatabaseResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    /// Connection view of the open transaction.
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn find_pool(&self, id: PoolId) -> DatabaseResult<Pool> {
        queries::find_pool(&self.tx, id)?.ok_or_else(|| DatabaseError::not_found("pool", id))
    }

    pub fn find_vm(&self, id: VmId) -> DatabaseResult<Vm> {
        queries::find_vm(&self.tx, id)?.ok_or_else(|| DatabaseError::not_found("vm", id))
    }

    pub fn privileges(&self, uid: &str, pool_id: PoolId) -> DatabaseResult<PrivilegeSet> {
        Ok(queries::privileges(&self.tx, uid, pool_id)?)
    }

    /// Fail with `Forbidden` unless `uid` holds `privilege` on `pool_id`.
    pub fn require(&self, uid: &str, privilege: Privilege, pool_id: PoolId) -> DatabaseResult<()> {
        if self.privileges(uid, pool_id)?.has(privilege) {
            Ok(())
        } else {
            Err(DatabaseError::Forbidden(format!(
                "{uid} lacks {privilege:?} on pool {pool_id}"
            )))
        }
    }

    /// Remove `pool`, refusing while it still owns VMs or child pools.
    pub fn destroy_pool(&self, pool: &Pool) -> DatabaseResult<()> {
        let vms = queries::count_vms_in_pool(&self.tx, pool.id)?;
        if vms > 0 {
            return Err(DatabaseError::Conflict(format!(
                "pool '{}' still contains {vms} virtual machine(s)",
                pool.name
            )));
        }
        let children = queries::count_child_pools(&self.tx, pool.id)?;
        if children > 0 {
            return Err(DatabaseError::Conflict(format!(
                "pool '{}' still contains {children} pool(s)",
                pool.name
            )));
        }
        queries::delete_pool(&self.tx, pool.id)?;
        Ok(())
    }

    /// Record `action` against `vm` on behalf of `uid`.
    pub fn queue_action(&self, vm: &Vm, uid: &str, action: VmAction) -> DatabaseResult<VmTask> {
        Ok(queries::insert_task(&self.tx, vm.id, uid, action)?)
    }
}
