//! Core domain models.
//!
//! This module contains the pool hierarchy, virtual machines, VM actions and
//! the role/permission model used to authorize every console request.

pub mod actions;
pub mod permissions;
pub mod pools;
pub mod vms;

pub use actions::*;
pub use permissions::*;
pub use pools::*;
pub use vms::*;
