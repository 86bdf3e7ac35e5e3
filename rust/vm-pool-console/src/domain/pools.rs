//! Pool hierarchy model and pool attribute validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database identifier of a pool.
pub type PoolId = i64;

/// Maximum length of a pool name.
pub const MAX_NAME_LEN: usize = 255;

/// Kind of a pool node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    /// Organizational root node.
    Directory,
    /// Pool of physical hosts and storage.
    Hardware,
    /// Pool of virtual machines.
    VmResource,
}

impl PoolKind {
    /// Stored representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Hardware => "hardware",
            Self::VmResource => "vm_resource",
        }
    }

    /// Controller segment serving pools of this kind.
    pub fn controller(self) -> &'static str {
        match self {
            Self::Directory => "pools",
            Self::Hardware => "hardware",
            Self::VmResource => "resources",
        }
    }

    /// Whether a pool of this kind may sit under a pool of `parent` kind.
    pub fn accepts_parent(self, parent: Self) -> bool {
        match self {
            Self::Directory => parent == Self::Directory,
            Self::Hardware => matches!(parent, Self::Directory | Self::Hardware),
            Self::VmResource => parent == Self::Hardware,
        }
    }

    fn parent_rule(self) -> &'static str {
        match self {
            Self::Directory => "Parent must be a directory pool",
            Self::Hardware => "Parent must be a directory or hardware pool",
            Self::VmResource => "Parent must be a hardware pool",
        }
    }

    /// Path of the detail view for a pool of this kind.
    pub fn show_path(self, id: PoolId) -> String {
        format!("/{}/show/{id}", self.controller())
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PoolKind {
    type Err = UnknownPoolKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(Self::Directory),
            "hardware" => Ok(Self::Hardware),
            "vm_resource" => Ok(Self::VmResource),
            other => Err(UnknownPoolKind(other.to_string())),
        }
    }
}

/// Stored pool kind that is not one of the known kinds.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown pool kind '{0}'")]
pub struct UnknownPoolKind(pub String);

/// A node in the pool tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Pool identifier.
    pub id: PoolId,
    /// Pool kind.
    pub kind: PoolKind,
    /// Display name, unique among siblings.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Parent pool; `None` only for roots.
    pub parent_id: Option<PoolId>,
    /// When the pool was created.
    pub created_at: DateTime<Utc>,
    /// When the pool was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Pool {
    /// Path of this pool's detail view.
    pub fn show_path(&self) -> String {
        self.kind.show_path(self.id)
    }

    /// Whether this pool groups virtual machines.
    pub fn is_vm_pool(&self) -> bool {
        self.kind == PoolKind::VmResource
    }
}

/// Short reference to a pool used in views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub id: PoolId,
    pub kind: PoolKind,
    pub name: String,
    pub path: String,
}

impl From<&Pool> for PoolSummary {
    fn from(pool: &Pool) -> Self {
        Self {
            id: pool.id,
            kind: pool.kind,
            name: pool.name.clone(),
            path: pool.show_path(),
        }
    }
}

/// Attributes a client may submit when creating or editing a VM pool.
///
/// Unknown fields are rejected at deserialization time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolAttributes {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,
    /// New description. An empty string clears it.
    #[serde(default)]
    pub description: Option<String>,
}

/// Validated pool ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPool {
    pub kind: PoolKind,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: PoolId,
}

/// Validated changes to an existing pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolChanges {
    pub name: String,
    pub description: Option<String>,
}

/// Human-readable validation failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, thiserror::Error)]
#[error("{}", .0.join(", "))]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    /// Create an empty error list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure message.
    pub fn add(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The collected messages, in the order they were found.
    pub fn messages(&self) -> &[String] {
        &self.0
    }

    pub fn into_messages(self) -> Vec<String> {
        self.0
    }

    fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl From<&str> for ValidationErrors {
    fn from(message: &str) -> Self {
        Self(vec![message.to_string()])
    }
}

fn check_name(name: &str, name_taken: bool, errors: &mut ValidationErrors) {
    if name.trim().is_empty() {
        errors.add("Name can't be blank");
    } else if name.chars().count() > MAX_NAME_LEN {
        errors.add(format!(
            "Name is too long (maximum is {MAX_NAME_LEN} characters)"
        ));
    } else if name_taken {
        errors.add("Name has already been taken");
    }
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

impl PoolAttributes {
    /// Trimmed submitted name, if any.
    pub fn trimmed_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim)
    }

    /// Validate these attributes as a new pool of `kind` under `parent`.
    ///
    /// `name_taken` reports whether a sibling already uses the submitted name.
    pub fn validate_new(
        self,
        kind: PoolKind,
        parent: &Pool,
        name_taken: bool,
    ) -> Result<NewPool, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = self.trimmed_name().unwrap_or_default().to_string();
        check_name(&name, name_taken, &mut errors);
        if !kind.accepts_parent(parent.kind) {
            errors.add(kind.parent_rule());
        }
        errors.into_result(NewPool {
            kind,
            name,
            description: normalize_description(self.description),
            parent_id: parent.id,
        })
    }

    /// Validate these attributes as changes to `pool`.
    ///
    /// Fields left out keep their current value.
    pub fn validate_changes(self, pool: &Pool, name_taken: bool) -> Result<PoolChanges, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = match self.trimmed_name() {
            Some(name) => name.to_string(),
            None => pool.name.clone(),
        };
        check_name(&name, name_taken && name != pool.name, &mut errors);
        let description = match self.description {
            Some(d) => normalize_description(Some(d)),
            None => pool.description.clone(),
        };
        errors.into_result(PoolChanges { name, description })
    }
}
