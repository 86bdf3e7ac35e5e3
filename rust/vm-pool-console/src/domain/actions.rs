//! VM lifecycle actions and the task records that queue them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::vms::{VmId, VmState};

/// Lifecycle operation that can be queued against a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmAction {
    StartVm,
    ShutdownVm,
    SuspendVm,
    ResumeVm,
    SaveVm,
    RestoreVm,
}

/// Actions offered in the bulk action menu of pool and VM lists.
pub const BULK_ACTIONS: [VmAction; 4] = [
    VmAction::SuspendVm,
    VmAction::ResumeVm,
    VmAction::SaveVm,
    VmAction::RestoreVm,
];

impl VmAction {
    /// Every action, in menu order.
    pub const ALL: [Self; 6] = [
        Self::StartVm,
        Self::ShutdownVm,
        Self::SuspendVm,
        Self::ResumeVm,
        Self::SaveVm,
        Self::RestoreVm,
    ];

    /// Wire token of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartVm => "start_vm",
            Self::ShutdownVm => "shutdown_vm",
            Self::SuspendVm => "suspend_vm",
            Self::ResumeVm => "resume_vm",
            Self::SaveVm => "save_vm",
            Self::RestoreVm => "restore_vm",
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::StartVm => "Start",
            Self::ShutdownVm => "Shutdown",
            Self::SuspendVm => "Suspend",
            Self::ResumeVm => "Resume",
            Self::SaveVm => "Save",
            Self::RestoreVm => "Restore",
        }
    }

    /// Whether a VM in `state` may be given this action.
    pub fn valid_from(self, state: VmState) -> bool {
        use VmState::{Paused, Running, Saved, Stopped};
        match self {
            Self::StartVm => state == Stopped,
            Self::ShutdownVm => matches!(state, Running | Paused),
            Self::SuspendVm => state == Running,
            Self::ResumeVm => state == Paused,
            Self::SaveVm => matches!(state, Running | Paused),
            Self::RestoreVm => state == Saved,
        }
    }

    /// Label lookup by wire token; `None` for unknown tokens.
    pub fn label_for(token: &str) -> Option<&'static str> {
        token.parse::<Self>().ok().map(Self::label)
    }
}

impl std::fmt::Display for VmAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VmAction {
    type Err = UnknownVmAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownVmAction(s.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown VM action '{0}'")]
pub struct UnknownVmAction(pub String);

/// A `(label, action)` pair for action pickers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionValue {
    pub label: &'static str,
    pub action: VmAction,
}

impl From<VmAction> for ActionValue {
    fn from(action: VmAction) -> Self {
        Self {
            label: action.label(),
            action,
        }
    }
}

/// Entry in the single-VM action menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionMenuItem {
    pub label: &'static str,
    pub action: VmAction,
    /// Draw a separator after this entry.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub separator_after: bool,
}

/// Menu of bulk actions shown on list and summary pages.
pub fn bulk_action_values() -> Vec<ActionValue> {
    BULK_ACTIONS.into_iter().map(ActionValue::from).collect()
}

/// Menu of single-VM actions, with a separator after shutdown.
pub fn single_vm_action_menu() -> Vec<ActionMenuItem> {
    VmAction::ALL
        .into_iter()
        .map(|action| ActionMenuItem {
            label: action.label(),
            action,
            separator_after: action == VmAction::ShutdownVm,
        })
        .collect()
}

/// Processing state of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Finished,
    Failed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = UnknownTaskState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownTaskState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown task state '{0}'")]
pub struct UnknownTaskState(pub String);

/// An action queued against a VM on behalf of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmTask {
    pub id: i64,
    pub vm_id: VmId,
    /// Login of the user who queued the action.
    pub user: String,
    pub action: VmAction,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
}
