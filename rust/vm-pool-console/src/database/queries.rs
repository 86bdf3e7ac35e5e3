//! Row-level SQL used by the SQLite backend.
//!
//! Every function takes a plain `&Connection` so it can run both on the
//! shared connection and inside a [`ScopedTransaction`](super::ScopedTransaction).

use std::str::FromStr;

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::domain::{
    NewPool, NewVm, Permission, Pool, PoolChanges, PoolId, PoolKind, PrivilegeSet, Role,
    TaskState, Vm, VmAction, VmId, VmTask,
};

const POOL_COLUMNS: &str = "id, kind, name, description, parent_id, created_at, updated_at";

const VM_COLUMNS: &str = "id, description, uuid, num_vcpus_allocated, memory_allocated_in_mb, \
                          vnic_mac_addr, state, vm_resource_pool_id";

/// Read a text column and parse it with `FromStr`.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn pool_from_row(row: &Row<'_>) -> rusqlite::Result<Pool> {
    Ok(Pool {
        id: row.get(0)?,
        kind: parse_column(row, 1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        parent_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn vm_from_row(row: &Row<'_>) -> rusqlite::Result<Vm> {
    Ok(Vm {
        id: row.get(0)?,
        description: row.get(1)?,
        uuid: parse_column(row, 2)?,
        num_vcpus_allocated: row.get(3)?,
        memory_allocated_in_mb: row.get(4)?,
        vnic_mac_addr: row.get(5)?,
        state: parse_column(row, 6)?,
        vm_resource_pool_id: row.get(7)?,
    })
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: row.get(0)?,
        uid: row.get(1)?,
        user_role: parse_column(row, 2)?,
        pool_id: row.get(3)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<VmTask> {
    Ok(VmTask {
        id: row.get(0)?,
        vm_id: row.get(1)?,
        user: row.get(2)?,
        action: parse_column(row, 3)?,
        state: parse_column(row, 4)?,
        created_at: row.get(5)?,
    })
}

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

pub fn find_pool(conn: &Connection, id: PoolId) -> rusqlite::Result<Option<Pool>> {
    conn.query_row(
        &format!("SELECT {POOL_COLUMNS} FROM pools WHERE id = ?1"),
        params![id],
        pool_from_row,
    )
    .optional()
}

/// Whether a child of `parent_id` other than `exclude` is called `name`.
pub fn pool_name_taken(
    conn: &Connection,
    parent_id: Option<PoolId>,
    name: &str,
    exclude: Option<PoolId>,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM pools
             WHERE parent_id IS ?1 AND name = ?2 AND (?3 IS NULL OR id != ?3)
         )",
        params![parent_id, name, exclude],
        |row| row.get(0),
    )
}

pub fn insert_pool_row(
    conn: &Connection,
    kind: PoolKind,
    name: &str,
    description: Option<&str>,
    parent_id: Option<PoolId>,
) -> rusqlite::Result<Pool> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO pools (kind, name, description, parent_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![kind.as_str(), name, description, parent_id, now],
    )?;
    Ok(Pool {
        id: conn.last_insert_rowid(),
        kind,
        name: name.to_string(),
        description: description.map(str::to_string),
        parent_id,
        created_at: now,
        updated_at: now,
    })
}

pub fn insert_pool(conn: &Connection, pool: &NewPool) -> rusqlite::Result<Pool> {
    insert_pool_row(
        conn,
        pool.kind,
        &pool.name,
        pool.description.as_deref(),
        Some(pool.parent_id),
    )
}

/// Apply `changes` and return the number of rows touched.
pub fn update_pool(conn: &Connection, id: PoolId, changes: &PoolChanges) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE pools SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
        params![changes.name, changes.description, Utc::now(), id],
    )
}

pub fn delete_pool(conn: &Connection, id: PoolId) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM pools WHERE id = ?1", params![id])
}

pub fn count_pools(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM pools", [], |row| row.get(0))
}

pub fn count_child_pools(conn: &Connection, id: PoolId) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM pools WHERE parent_id = ?1",
        params![id],
        |row| row.get(0),
    )
}

pub fn count_vms_in_pool(conn: &Connection, id: PoolId) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM vms WHERE vm_resource_pool_id = ?1",
        params![id],
        |row| row.get(0),
    )
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// Union of the roles `uid` holds on `pool_id` and all of its ancestors.
pub fn privileges(conn: &Connection, uid: &str, pool_id: PoolId) -> rusqlite::Result<PrivilegeSet> {
    let mut stmt = conn.prepare_cached(
        "WITH RECURSIVE lineage(id, parent_id) AS (
             SELECT id, parent_id FROM pools WHERE id = ?1
             UNION ALL
             SELECT p.id, p.parent_id FROM pools p JOIN lineage l ON p.id = l.parent_id
         )
         SELECT perm.user_role
         FROM permissions perm JOIN lineage l ON perm.pool_id = l.id
         WHERE perm.uid = ?2",
    )?;
    let roles = stmt
        .query_map(params![pool_id, uid], |row| parse_column::<Role>(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(PrivilegeSet::from_roles(roles))
}

/// VM resource pools reachable below any grant of `uid` with one of `roles_json`.
///
/// `roles_json` is a JSON array of role keys.
pub fn visible_vm_pools(conn: &Connection, uid: &str, roles_json: &str) -> rusqlite::Result<Vec<Pool>> {
    let mut stmt = conn.prepare_cached(&format!(
        "WITH RECURSIVE granted(id) AS (
             SELECT pool_id FROM permissions
             WHERE uid = ?1 AND user_role IN (SELECT value FROM json_each(?2))
             UNION
             SELECT p.id FROM pools p JOIN granted g ON p.parent_id = g.id
         )
         SELECT {POOL_COLUMNS} FROM pools
         WHERE kind = 'vm_resource' AND id IN (SELECT id FROM granted)
         ORDER BY name, id"
    ))?;
    stmt.query_map(params![uid, roles_json], pool_from_row)?
        .collect()
}

/// Grants made directly on `pool_id`.
pub fn permissions_for_pool(conn: &Connection, pool_id: PoolId) -> rusqlite::Result<Vec<Permission>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, uid, user_role, pool_id FROM permissions WHERE pool_id = ?1 ORDER BY uid",
    )?;
    stmt.query_map(params![pool_id], permission_from_row)?
        .collect()
}

/// Grant `role` to `uid` on `pool_id`, replacing any earlier grant there.
pub fn upsert_permission(
    conn: &Connection,
    uid: &str,
    role: Role,
    pool_id: PoolId,
) -> rusqlite::Result<Permission> {
    conn.query_row(
        "INSERT INTO permissions (uid, user_role, pool_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(uid, pool_id) DO UPDATE SET user_role = excluded.user_role
         RETURNING id, uid, user_role, pool_id",
        params![uid, role.as_str(), pool_id],
        permission_from_row,
    )
}

// ---------------------------------------------------------------------------
// VMs and tasks
// ---------------------------------------------------------------------------

pub fn find_vm(conn: &Connection, id: VmId) -> rusqlite::Result<Option<Vm>> {
    conn.query_row(
        &format!("SELECT {VM_COLUMNS} FROM vms WHERE id = ?1"),
        params![id],
        vm_from_row,
    )
    .optional()
}

/// VMs owned by any pool in `pool_ids_json`, a JSON array of pool ids.
pub fn vms_in_pools(conn: &Connection, pool_ids_json: &str) -> rusqlite::Result<Vec<Vm>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {VM_COLUMNS} FROM vms
         WHERE vm_resource_pool_id IN (SELECT value FROM json_each(?1))
         ORDER BY id"
    ))?;
    stmt.query_map(params![pool_ids_json], vm_from_row)?
        .collect()
}

pub fn insert_vm(conn: &Connection, vm: &NewVm) -> rusqlite::Result<Vm> {
    conn.execute(
        "INSERT INTO vms (description, uuid, num_vcpus_allocated, memory_allocated_in_mb,
                          vnic_mac_addr, state, vm_resource_pool_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            vm.description,
            vm.uuid.to_string(),
            vm.num_vcpus_allocated,
            vm.memory_allocated_in_mb,
            vm.vnic_mac_addr,
            vm.state.as_str(),
            vm.vm_resource_pool_id
        ],
    )?;
    Ok(Vm {
        id: conn.last_insert_rowid(),
        description: vm.description.clone(),
        uuid: vm.uuid,
        num_vcpus_allocated: vm.num_vcpus_allocated,
        memory_allocated_in_mb: vm.memory_allocated_in_mb,
        vnic_mac_addr: vm.vnic_mac_addr.clone(),
        state: vm.state,
        vm_resource_pool_id: vm.vm_resource_pool_id,
    })
}

pub fn insert_task(conn: &Connection, vm_id: VmId, user: &str, action: VmAction) -> rusqlite::Result<VmTask> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO vm_tasks (vm_id, user, action, state, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![vm_id, user, action.as_str(), TaskState::Queued.as_str(), now],
    )?;
    Ok(VmTask {
        id: conn.last_insert_rowid(),
        vm_id,
        user: user.to_string(),
        action,
        state: TaskState::Queued,
        created_at: now,
    })
}

pub fn tasks_for_vm(conn: &Connection, vm_id: VmId) -> rusqlite::Result<Vec<VmTask>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, vm_id, user, action, state, created_at FROM vm_tasks
         WHERE vm_id = ?1 ORDER BY id",
    )?;
    stmt.query_map(params![vm_id], task_from_row)?.collect()
}
