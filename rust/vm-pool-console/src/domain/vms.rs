//! Virtual machine records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actions::VmAction;
use super::pools::PoolId;

/// Database identifier of a VM.
pub type VmId = i64;

/// Lifecycle state of a VM as last reported by its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Pending,
    Creating,
    Running,
    Stopped,
    Paused,
    Saved,
    Invalid,
}

impl VmState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Saved => "saved",
            Self::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VmState {
    type Err = UnknownVmState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "creating" => Ok(Self::Creating),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "paused" => Ok(Self::Paused),
            "saved" => Ok(Self::Saved),
            "invalid" => Ok(Self::Invalid),
            other => Err(UnknownVmState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown VM state '{0}'")]
pub struct UnknownVmState(pub String);

/// A virtual machine belonging to a VM resource pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub id: VmId,
    pub description: String,
    pub uuid: Uuid,
    pub num_vcpus_allocated: u32,
    pub memory_allocated_in_mb: u32,
    pub vnic_mac_addr: String,
    pub state: VmState,
    /// Owning VM resource pool.
    pub vm_resource_pool_id: PoolId,
}

impl Vm {
    pub fn accepts(&self, action: VmAction) -> bool {
        action.valid_from(self.state)
    }
}

/// VM definition used to register a machine in a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVm {
    pub description: String,
    #[serde(default = "Uuid::new_v4")]
    pub uuid: Uuid,
    pub num_vcpus_allocated: u32,
    pub memory_allocated_in_mb: u32,
    pub vnic_mac_addr: String,
    #[serde(default = "default_state")]
    pub state: VmState,
    pub vm_resource_pool_id: PoolId,
}

fn default_state() -> VmState {
    VmState::Stopped
}

impl NewVm {
    /// A stopped VM with a fresh UUID.
    pub fn new(description: impl Into<String>, pool_id: PoolId) -> Self {
        Self {
            description: description.into(),
            uuid: Uuid::new_v4(),
            num_vcpus_allocated: 1,
            memory_allocated_in_mb: 512,
            vnic_mac_addr: String::new(),
            state: default_state(),
            vm_resource_pool_id: pool_id,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: VmState) -> Self {
        self.state = state;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(state: VmState) -> Vm {
        Vm {
            id: 1,
            description: "web01".to_string(),
            uuid: Uuid::new_v4(),
            num_vcpus_allocated: 2,
            memory_allocated_in_mb: 1024,
            vnic_mac_addr: "00:16:3e:00:00:01".to_string(),
            state,
            vm_resource_pool_id: 3,
        }
    }

    #[test]
    fn test_running_vm_accepts() {
        let running = vm(VmState::Running);
        assert!(running.accepts(VmAction::SuspendVm));
        assert!(!running.accepts(VmAction::StartVm));
    }

    #[test]
    fn test_pending_vm_accepts_nothing() {
        let pending = vm(VmState::Pending);
        assert!(VmAction::ALL.into_iter().all(|a| !pending.accepts(a)));
    }

    #[test]
    fn test_state_parse() {
        assert_eq!("paused".parse::<VmState>().unwrap(), VmState::Paused);
        assert!("zombie".parse::<VmState>().is_err());
    }

    #[test]
    fn test_new_vm_builder() {
        let new_vm = NewVm::new("db01", 7)
            .with_state(VmState::Running);
        assert_eq!(new_vm.vm_resource_pool_id, 7);
        assert_eq!(new_vm.num_vcpus_allocated, 1);
        assert_eq!(new_vm.state, VmState::Running);
    }
}
