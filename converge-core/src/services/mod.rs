//! Per-resource-kind specs.
//!
//! Each kind supplies one value type implementing
//! [`SpecGetter`](crate::resource::SpecGetter); sub-entity diffing and
//! ownership are delegated to the shared engine.

pub mod compute;
pub mod scale_set;
pub mod security_group;
pub mod virtual_machine;

pub use scale_set::{ScaleSet, ScaleSetSpec};
pub use security_group::{SecurityGroup, SecurityGroupSpec, SecurityRule};
pub use virtual_machine::{VirtualMachine, VirtualMachineSpec};
