//! Database schema definitions.
//!
//! Pools form a tree through `parent_id`. Deleting a pool that still has
//! child pools or VMs is refused by the foreign keys; permission grants and
//! queued tasks go away with their pool or VM.

/// SQLite schema for the console.
pub const SQLITE_SCHEMA: &str = r"
-- Pool hierarchy
CREATE TABLE IF NOT EXISTS pools (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN ('directory', 'hardware', 'vm_resource')),
    name TEXT NOT NULL,
    description TEXT,
    parent_id INTEGER REFERENCES pools(id) ON DELETE RESTRICT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pools_parent ON pools(parent_id);
CREATE INDEX IF NOT EXISTS idx_pools_kind ON pools(kind);

-- Virtual machines
CREATE TABLE IF NOT EXISTS vms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL,
    uuid TEXT NOT NULL UNIQUE,
    num_vcpus_allocated INTEGER NOT NULL,
    memory_allocated_in_mb INTEGER NOT NULL,
    vnic_mac_addr TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL,
    vm_resource_pool_id INTEGER NOT NULL REFERENCES pools(id) ON DELETE RESTRICT
);
CREATE INDEX IF NOT EXISTS idx_vms_pool ON vms(vm_resource_pool_id);

-- Role grants
CREATE TABLE IF NOT EXISTS permissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uid TEXT NOT NULL,
    user_role TEXT NOT NULL,
    pool_id INTEGER NOT NULL REFERENCES pools(id) ON DELETE CASCADE,
    UNIQUE (uid, pool_id)
);
CREATE INDEX IF NOT EXISTS idx_permissions_uid ON permissions(uid);
CREATE INDEX IF NOT EXISTS idx_permissions_pool ON permissions(pool_id);

-- Queued VM actions
CREATE TABLE IF NOT EXISTS vm_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    vm_id INTEGER NOT NULL REFERENCES vms(id) ON DELETE CASCADE,
    user TEXT NOT NULL,
    action TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vm_tasks_vm ON vm_tasks(vm_id);
";

/// Name of the root directory pool created on an empty database.
pub const ROOT_POOL_NAME: &str = "root";

/// Name of the hardware pool created under the root on an empty database.
pub const DEFAULT_HARDWARE_POOL_NAME: &str = "default";
