//! JSON view models rendered by the resources controller.
//!
//! A view carries the layout it would be drawn in and the data the page
//! needs. Acknowledgments (`PoolAck`) are the bare JSON replies of the
//! asynchronous create and bulk delete calls.

use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    ActionMenuItem, ActionValue, Permission, PermissionId, Pool, PoolAttributes, PoolId,
    PoolPermissions, PoolSummary, Role, Vm, VmId, VmState,
};
use crate::gateway::Flash;

/// Page chrome a view is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// Full page.
    Default,
    /// Tab body loaded into an existing page.
    TabsAndContent,
    /// Summary pane next to a selection tree.
    Selection,
    /// Modal form.
    Popup,
    /// Outcome of a submitted action.
    Confirmation,
}

/// VM fields exposed to lists and `vms_json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmRow {
    pub id: VmId,
    pub description: String,
    pub uuid: Uuid,
    pub num_vcpus_allocated: u32,
    pub memory_allocated_in_mb: u32,
    pub vnic_mac_addr: String,
    pub state: VmState,
}

impl From<&Vm> for VmRow {
    fn from(vm: &Vm) -> Self {
        Self {
            id: vm.id,
            description: vm.description.clone(),
            uuid: vm.uuid,
            num_vcpus_allocated: vm.num_vcpus_allocated,
            memory_allocated_in_mb: vm.memory_allocated_in_mb,
            vnic_mac_addr: vm.vnic_mac_addr.clone(),
            state: vm.state,
        }
    }
}

/// Permission fields exposed by `users_json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionRow {
    pub id: PermissionId,
    pub uid: String,
    pub user_role: Role,
}

impl From<&Permission> for PermissionRow {
    fn from(permission: &Permission) -> Self {
        Self {
            id: permission.id,
            uid: permission.uid.clone(),
            user_role: permission.user_role,
        }
    }
}

/// Every VM the user may see, across all visible VM pools.
#[derive(Debug, Serialize)]
pub struct ListView {
    pub layout: Layout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<Flash>,
    pub user: String,
    pub vm_resource_pools: Vec<PoolSummary>,
    pub vms: Vec<VmRow>,
    pub action_values: Vec<ActionValue>,
}

/// Detail page of one VM pool and its tabs.
#[derive(Debug, Serialize)]
pub struct PoolView {
    pub layout: Layout,
    /// Which detail page this is: `show`, `quick_summary`, `show_vms` or `show_users`.
    pub template: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<Flash>,
    pub current_pool_id: PoolId,
    pub vm_resource_pool: Pool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<PoolSummary>,
    #[serde(flatten)]
    pub permissions: PoolPermissions,
    pub is_hwpool_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_values: Option<Vec<ActionValue>>,
    /// Single-VM action menu, on the VMs tab.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<ActionMenuItem>>,
    /// Role keys offered on the users tab.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<&'static str>>,
}

/// New or edit form for a VM pool.
#[derive(Debug, Serialize)]
pub struct FormView {
    pub layout: Layout,
    /// `new` or `edit`.
    pub template: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<Flash>,
    pub parent: PoolSummary,
    /// The pool being edited; absent on the new form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_resource_pool: Option<Pool>,
    /// Values to pre-fill the form with.
    pub attributes: PoolAttributes,
    pub errors: Vec<String>,
}

/// Outcome of a bulk VM action.
#[derive(Debug, Serialize)]
pub struct ConfirmationView {
    pub layout: Layout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<Flash>,
    pub vm_resource_pool: PoolSummary,
    pub action: String,
    pub action_label: Option<&'static str>,
    pub success_list: Vec<VmRow>,
    pub failure_list: Vec<VmRow>,
}

/// Object name reported in every acknowledgment.
pub const ACK_OBJECT: &str = "vm_resource_pool";

/// JSON reply of `create` and `delete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolAck {
    pub object: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl PoolAck {
    pub fn success(alert: impl Into<String>) -> Self {
        Self {
            object: ACK_OBJECT,
            success: true,
            alert: Some(alert.into()),
            errors: None,
        }
    }

    /// Failure carrying an alert only.
    pub fn alert(alert: impl Into<String>) -> Self {
        Self {
            object: ACK_OBJECT,
            success: false,
            alert: Some(alert.into()),
            errors: None,
        }
    }

    /// Failure carrying a list of messages.
    pub fn errors(errors: Vec<String>) -> Self {
        Self {
            object: ACK_OBJECT,
            success: false,
            alert: None,
            errors: Some(errors),
        }
    }

    #[must_use]
    pub fn with_alert(mut self, alert: impl Into<String>) -> Self {
        self.alert = Some(alert.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layout_names() {
        assert_eq!(serde_json::to_value(Layout::TabsAndContent).unwrap(), "tabs-and-content");
        assert_eq!(serde_json::to_value(Layout::Default).unwrap(), "default");
    }

    #[test]
    fn test_ack_shapes() {
        assert_eq!(
            serde_json::to_value(PoolAck::success("done")).unwrap(),
            json!({"object": "vm_resource_pool", "success": true, "alert": "done"})
        );
        assert_eq!(
            serde_json::to_value(PoolAck::errors(vec!["Name can't be blank".into()])).unwrap(),
            json!({"object": "vm_resource_pool", "success": false, "errors": ["Name can't be blank"]})
        );
    }

    #[test]
    fn test_vm_row_projection() {
        let vm = Vm {
            id: 4,
            description: "db01".to_string(),
            uuid: Uuid::nil(),
            num_vcpus_allocated: 2,
            memory_allocated_in_mb: 2048,
            vnic_mac_addr: "00:16:3e:00:00:04".to_string(),
            state: VmState::Saved,
            vm_resource_pool_id: 9,
        };
        let row = serde_json::to_value(VmRow::from(&vm)).unwrap();
        assert_eq!(row["state"], "saved");
        assert!(row.get("vm_resource_pool_id").is_none());
        assert_eq!(row.as_object().unwrap().len(), 7);
    }
}
