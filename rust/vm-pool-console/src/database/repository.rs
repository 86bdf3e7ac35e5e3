//! Repository traits over the console's storage.
//!
//! Handlers depend on these traits rather than on SQLite directly. Every
//! method that touches more than one row runs inside a single transaction.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Serialize;

use super::error::{DatabaseError, DatabaseResult};
use super::queries;
use super::sqlite::SqliteBackend;
use crate::domain::{
    NewVm, Permission, Pool, PoolAttributes, PoolId, PoolKind, Privilege, PrivilegeSet, Role, Vm,
    VmAction, VmId, VmTask,
};

/// Split outcome of a bulk VM action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    /// VMs the action was queued on.
    pub succeeded: Vec<Vm>,
    /// VMs that refused the action or that the user may not control.
    pub failed: Vec<Vm>,
}

/// Pool storage operations.
#[async_trait]
pub trait PoolRepository: Send + Sync {
    /// Look up a pool by id.
    async fn find_pool(&self, id: PoolId) -> DatabaseResult<Option<Pool>>;

    /// VM resource pools on which `uid` holds `privilege`, directly or inherited.
    async fn list_pools_for_user(&self, uid: &str, privilege: Privilege) -> DatabaseResult<Vec<Pool>>;

    /// Validate `attrs` and insert a pool of `kind` under `parent_id`.
    async fn create_pool(
        &self,
        kind: PoolKind,
        parent_id: PoolId,
        attrs: PoolAttributes,
    ) -> DatabaseResult<Pool>;

    /// Validate `attrs` and apply them to pool `id`.
    async fn update_pool(&self, id: PoolId, attrs: PoolAttributes) -> DatabaseResult<Pool>;

    /// Remove an empty pool, returning what was removed.
    async fn destroy_pool(&self, id: PoolId) -> DatabaseResult<Pool>;

    /// Remove every pool in `ids` on behalf of `uid`, or none of them.
    ///
    /// Each pool must be an empty VM resource pool and `uid` must hold
    /// modify on its parent. Repeated ids count once and ids with no pool are
    /// skipped; if none of `ids` exists the call fails. Returns the removed
    /// pool names in first-seen order.
    async fn destroy_vm_pools(&self, uid: &str, ids: Vec<PoolId>) -> DatabaseResult<Vec<String>>;
}

/// VM storage operations.
#[async_trait]
pub trait VmRepository: Send + Sync {
    /// VMs owned by any of `pool_ids`, ordered by id.
    async fn vms_in_pools(&self, pool_ids: Vec<PoolId>) -> DatabaseResult<Vec<Vm>>;

    /// Register a VM in an existing VM resource pool.
    async fn create_vm(&self, vm: NewVm) -> DatabaseResult<Vm>;

    /// Queue `action` on every VM in `ids` on behalf of `uid`.
    ///
    /// A VM whose state refuses the action, or whose pool `uid` may not
    /// control, lands in [`ActionOutcome::failed`]. An unknown VM id fails the
    /// whole call and nothing is queued.
    async fn queue_vm_actions(
        &self,
        uid: &str,
        action: VmAction,
        ids: Vec<VmId>,
    ) -> DatabaseResult<ActionOutcome>;

    /// Tasks queued against a VM, oldest first.
    async fn tasks_for_vm(&self, vm_id: VmId) -> DatabaseResult<Vec<VmTask>>;
}

/// Permission storage operations.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Effective privileges of `uid` on `pool_id`, including inherited grants.
    async fn privileges(&self, uid: &str, pool_id: PoolId) -> DatabaseResult<PrivilegeSet>;

    /// Grants made directly on `pool_id`.
    async fn permissions_for_pool(&self, pool_id: PoolId) -> DatabaseResult<Vec<Permission>>;

    /// Grant `role` to `uid` on `pool_id`, replacing an earlier grant there.
    async fn grant(&self, uid: &str, role: Role, pool_id: PoolId) -> DatabaseResult<Permission>;
}

#[async_trait]
impl PoolRepository for SqliteBackend {
    async fn find_pool(&self, id: PoolId) -> DatabaseResult<Option<Pool>> {
        self.call(move |conn| Ok(queries::find_pool(conn, id)?)).await
    }

    async fn list_pools_for_user(&self, uid: &str, privilege: Privilege) -> DatabaseResult<Vec<Pool>> {
        let uid = uid.to_string();
        let roles = serde_json::to_string(&Role::with_privilege(privilege))?;
        self.call(move |conn| Ok(queries::visible_vm_pools(conn, &uid, &roles)?))
            .await
    }

    async fn create_pool(
        &self,
        kind: PoolKind,
        parent_id: PoolId,
        attrs: PoolAttributes,
    ) -> DatabaseResult<Pool> {
        self.transaction("create_pool", move |tx| {
            let parent = tx.find_pool(parent_id)?;
            let taken = match attrs.trimmed_name() {
                Some(name) => queries::pool_name_taken(tx.conn(), Some(parent.id), name, None)?,
                None => false,
            };
            let new_pool = attrs.validate_new(kind, &parent, taken)?;
            Ok(queries::insert_pool(tx.conn(), &new_pool)?)
        })
        .await
    }

    async fn update_pool(&self, id: PoolId, attrs: PoolAttributes) -> DatabaseResult<Pool> {
        self.transaction("update_pool", move |tx| {
            let pool = tx.find_pool(id)?;
            let taken = match attrs.trimmed_name() {
                Some(name) => queries::pool_name_taken(tx.conn(), pool.parent_id, name, Some(pool.id))?,
                None => false,
            };
            let changes = attrs.validate_changes(&pool, taken)?;
            queries::update_pool(tx.conn(), pool.id, &changes)?;
            tx.find_pool(pool.id)
        })
        .await
    }

    async fn destroy_pool(&self, id: PoolId) -> DatabaseResult<Pool> {
        self.transaction("destroy_pool", move |tx| {
            let pool = tx.find_pool(id)?;
            tx.destroy_pool(&pool)?;
            Ok(pool)
        })
        .await
    }

    async fn destroy_vm_pools(&self, uid: &str, ids: Vec<PoolId>) -> DatabaseResult<Vec<String>> {
        let uid = uid.to_string();
        self.transaction("destroy_vm_pools", move |tx| {
            let mut seen = HashSet::with_capacity(ids.len());
            let mut names = Vec::with_capacity(ids.len());
            for &id in &ids {
                if !seen.insert(id) {
                    continue;
                }
                let Some(pool) = queries::find_pool(tx.conn(), id)? else {
                    continue;
                };
                if !pool.is_vm_pool() {
                    return Err(DatabaseError::Conflict(format!(
                        "pool {id} is a {} pool, not a VM resource pool",
                        pool.kind
                    )));
                }
                let parent_id = pool.parent_id.ok_or_else(|| {
                    DatabaseError::Conflict(format!("pool {id} has no parent"))
                })?;
                tx.require(&uid, Privilege::Modify, parent_id)?;
                tx.destroy_pool(&pool)?;
                names.push(pool.name);
            }
            match ids.first() {
                Some(&first) if names.is_empty() => Err(DatabaseError::not_found("pool", first)),
                _ => Ok(names),
            }
        })
        .await
    }
}

#[async_trait]
impl VmRepository for SqliteBackend {
    async fn vms_in_pools(&self, pool_ids: Vec<PoolId>) -> DatabaseResult<Vec<Vm>> {
        if pool_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = serde_json::to_string(&pool_ids)?;
        self.call(move |conn| Ok(queries::vms_in_pools(conn, &ids)?)).await
    }

    async fn create_vm(&self, vm: NewVm) -> DatabaseResult<Vm> {
        self.transaction("create_vm", move |tx| {
            let pool = tx.find_pool(vm.vm_resource_pool_id)?;
            if !pool.is_vm_pool() {
                return Err(DatabaseError::Conflict(format!(
                    "VMs can only be placed in VM resource pools, not in {} pool '{}'",
                    pool.kind, pool.name
                )));
            }
            Ok(queries::insert_vm(tx.conn(), &vm)?)
        })
        .await
    }

    async fn queue_vm_actions(
        &self,
        uid: &str,
        action: VmAction,
        ids: Vec<VmId>,
    ) -> DatabaseResult<ActionOutcome> {
        let uid = uid.to_string();
        self.transaction("queue_vm_actions", move |tx| {
            let mut outcome = ActionOutcome::default();
            for id in ids {
                let vm = tx.find_vm(id)?;
                let allowed = tx
                    .privileges(&uid, vm.vm_resource_pool_id)?
                    .has(Privilege::VmControl);
                if allowed && vm.accepts(action) {
                    tx.queue_action(&vm, &uid, action)?;
                    outcome.succeeded.push(vm);
                } else {
                    tracing::debug!(
                        user = %uid,
                        vm_id = vm.id,
                        action = %action,
                        state = %vm.state,
                        allowed,
                        "VM action refused"
                    );
                    outcome.failed.push(vm);
                }
            }
            Ok(outcome)
        })
        .await
    }

    async fn tasks_for_vm(&self, vm_id: VmId) -> DatabaseResult<Vec<VmTask>> {
        self.call(move |conn| Ok(queries::tasks_for_vm(conn, vm_id)?))
            .await
    }
}

#[async_trait]
impl PermissionRepository for SqliteBackend {
    async fn privileges(&self, uid: &str, pool_id: PoolId) -> DatabaseResult<PrivilegeSet> {
        let uid = uid.to_string();
        self.call(move |conn| Ok(queries::privileges(conn, &uid, pool_id)?))
            .await
    }

    async fn permissions_for_pool(&self, pool_id: PoolId) -> DatabaseResult<Vec<Permission>> {
        self.call(move |conn| Ok(queries::permissions_for_pool(conn, pool_id)?))
            .await
    }

    async fn grant(&self, uid: &str, role: Role, pool_id: PoolId) -> DatabaseResult<Permission> {
        let uid = uid.to_string();
        self.transaction("grant", move |tx| {
            tx.find_pool(pool_id)?;
            Ok(queries::upsert_permission(tx.conn(), &uid, role, pool_id)?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VmState;

    const ROOT: PoolId = 1;
    const DEFAULT_HW: PoolId = 2;

    async fn seeded() -> SqliteBackend {
        let db = SqliteBackend::in_memory().unwrap();
        db.bootstrap(Some("admin".to_string())).await.unwrap();
        db
    }

    fn attrs(name: &str) -> PoolAttributes {
        PoolAttributes {
            name: Some(name.to_string()),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_create_pool_validates_siblings() {
        let db = seeded().await;
        let web = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("web")).await.unwrap();
        assert_eq!(web.parent_id, Some(DEFAULT_HW));

        let err = db
            .create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("web"))
            .await
            .unwrap_err();
        match err {
            DatabaseError::Invalid(errors) => {
                assert_eq!(errors.messages(), ["Name has already been taken"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_pool_missing_parent() {
        let db = seeded().await;
        let err = db
            .create_pool(PoolKind::VmResource, 404, attrs("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { entity: "pool", id: 404 }));
    }

    #[tokio::test]
    async fn test_update_pool() {
        let db = seeded().await;
        let web = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("web")).await.unwrap();
        let updated = db
            .update_pool(
                web.id,
                PoolAttributes {
                    name: Some("frontend".to_string()),
                    description: Some("edge".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "frontend");
        assert_eq!(updated.description.as_deref(), Some("edge"));
    }

    #[tokio::test]
    async fn test_destroy_vm_pools_is_all_or_nothing() {
        let db = seeded().await;
        let a = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("a")).await.unwrap();
        let b = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("b")).await.unwrap();
        let busy = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("busy")).await.unwrap();
        db.create_vm(NewVm::new("vm", busy.id)).await.unwrap();

        assert!(db.destroy_vm_pools("admin", vec![a.id, b.id, busy.id]).await.is_err());
        assert!(db.find_pool(a.id).await.unwrap().is_some());
        assert!(db.find_pool(b.id).await.unwrap().is_some());

        let names = db.destroy_vm_pools("admin", vec![a.id, b.id]).await.unwrap();
        assert_eq!(names, ["a", "b"]);
        assert!(db.find_pool(a.id).await.unwrap().is_none());
        assert!(db.find_pool(busy.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_destroy_vm_pools_dedups_and_skips_missing() {
        let db = seeded().await;
        let a = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("a")).await.unwrap();
        let b = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("b")).await.unwrap();

        let names = db.destroy_vm_pools("admin", vec![a.id, a.id]).await.unwrap();
        assert_eq!(names, ["a"]);
        assert!(db.find_pool(a.id).await.unwrap().is_none());

        let names = db.destroy_vm_pools("admin", vec![b.id, 9999]).await.unwrap();
        assert_eq!(names, ["b"]);
        assert!(db.find_pool(b.id).await.unwrap().is_none());

        let err = db.destroy_vm_pools("admin", vec![9999]).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { id: 9999, .. }));
    }

    #[tokio::test]
    async fn test_destroy_vm_pools_checks_modify() {
        let db = seeded().await;
        let a = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("a")).await.unwrap();
        db.grant("mallory", Role::User, ROOT).await.unwrap();

        let err = db.destroy_vm_pools("mallory", vec![a.id]).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Forbidden(_)));
        assert!(db.destroy_vm_pools("admin", vec![DEFAULT_HW]).await.is_err());
    }

    #[tokio::test]
    async fn test_queue_vm_actions_partitions() {
        let db = seeded().await;
        let pool = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("web")).await.unwrap();
        let running = db
            .create_vm(NewVm::new("web01", pool.id).with_state(VmState::Running))
            .await
            .unwrap();
        let stopped = db.create_vm(NewVm::new("web02", pool.id)).await.unwrap();

        let outcome = db
            .queue_vm_actions("admin", VmAction::SuspendVm, vec![running.id, stopped.id])
            .await
            .unwrap();
        assert_eq!(outcome.succeeded, [running.clone()]);
        assert_eq!(outcome.failed, [stopped.clone()]);
        assert_eq!(db.tasks_for_vm(running.id).await.unwrap().len(), 1);
        assert!(db.tasks_for_vm(stopped.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_vm_actions_unknown_vm_queues_nothing() {
        let db = seeded().await;
        let pool = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("web")).await.unwrap();
        let vm = db
            .create_vm(NewVm::new("web01", pool.id).with_state(VmState::Running))
            .await
            .unwrap();

        let result = db
            .queue_vm_actions("admin", VmAction::SaveVm, vec![vm.id, 9999])
            .await;
        assert!(result.is_err());
        assert!(db.tasks_for_vm(vm.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_vm_actions_requires_vm_control() {
        let db = seeded().await;
        let pool = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("web")).await.unwrap();
        let vm = db
            .create_vm(NewVm::new("web01", pool.id).with_state(VmState::Running))
            .await
            .unwrap();
        db.grant("watcher", Role::Monitor, pool.id).await.unwrap();

        let outcome = db
            .queue_vm_actions("watcher", VmAction::ShutdownVm, vec![vm.id])
            .await
            .unwrap();
        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_create_vm_rejects_hardware_pool() {
        let db = seeded().await;
        let err = db.create_vm(NewVm::new("stray", DEFAULT_HW)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_pools_for_user() {
        let db = seeded().await;
        let web = db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("web")).await.unwrap();
        db.create_pool(PoolKind::VmResource, DEFAULT_HW, attrs("db")).await.unwrap();
        db.grant("viewer", Role::Monitor, web.id).await.unwrap();

        let admin_pools = db.list_pools_for_user("admin", Privilege::View).await.unwrap();
        assert_eq!(admin_pools.len(), 2);
        let viewer_pools = db.list_pools_for_user("viewer", Privilege::View).await.unwrap();
        assert_eq!(viewer_pools, [web]);
    }
}
