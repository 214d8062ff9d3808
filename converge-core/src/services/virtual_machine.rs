//! Virtual machines.
//!
//! VMs are create-only: once the VM exists its spec is never diffed again.
//! A VM that carries a provider ID but cannot be found was deleted out of
//! band and is never silently recreated.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::compute::{
    self, AdditionalCapabilities, DataDisk, Diagnostics, DiagnosticsProfile, Image, ImagePlan,
    OsDisk, OsProfile, SecurityProfile, SpotSettings, SpotVmOptions, StorageProfile,
};
use crate::error::{ReconcileError, Result};
use crate::identity::{self, ResourceIdentity, UserAssignedIdentity, VmIdentity};
use crate::resource::SpecGetter;
use crate::skus::{CapabilityLookup, Sku};
use crate::tags::{self, Tags};

fn default_role() -> String {
    "node".to_string()
}

/// Desired state of one virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachineSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cluster_name: String,
    pub size: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub availability_set_id: Option<String>,
    #[serde(default)]
    pub nic_ids: Vec<String>,
    #[serde(default)]
    pub ssh_key_data: String,
    #[serde(default)]
    pub bootstrap_data: String,
    #[serde(default)]
    pub os_disk: OsDisk,
    #[serde(default)]
    pub data_disks: Vec<DataDisk>,
    pub image: Image,
    #[serde(default)]
    pub identity: VmIdentity,
    #[serde(default)]
    pub user_assigned_identities: Vec<UserAssignedIdentity>,
    #[serde(default)]
    pub security_profile: Option<SecurityProfile>,
    #[serde(default)]
    pub spot_vm_options: Option<SpotVmOptions>,
    #[serde(default)]
    pub additional_capabilities: Option<AdditionalCapabilities>,
    #[serde(default)]
    pub diagnostics: Option<Diagnostics>,
    /// Set once the VM was created; its absence afterwards means deletion.
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub additional_tags: Tags,
    /// SKU of `size`, resolved with [`VirtualMachineSpec::with_sku`].
    #[serde(default)]
    pub sku: Sku,
}

/// Remote virtual machine object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub location: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<ResourceIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ImagePlan>,
    pub vm_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<OsProfile>,
    pub storage_profile: StorageProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_profile: Option<SecurityProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot: Option<SpotSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_capabilities: Option<AdditionalCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_profile: Option<DiagnosticsProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_set_id: Option<String>,
    #[serde(default)]
    pub network_interface_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

impl VirtualMachineSpec {
    /// Resolve the SKU of the requested size.
    pub fn with_sku(mut self, lookup: &dyn CapabilityLookup) -> Result<Self> {
        self.sku = lookup.sku(&self.size, &self.location)?;
        Ok(self)
    }

    fn zones(&self) -> Vec<String> {
        self.zone.iter().cloned().collect()
    }

    fn create_parameters(&self) -> Result<VirtualMachine> {
        if self.sku.name.is_empty() {
            return Err(ReconcileError::invalid_spec(
                "size",
                format!("no SKU resolved for VM size {}", self.size),
            ));
        }
        compute::validate_size(&self.sku)?;

        let storage_profile = compute::storage_profile(
            &self.name,
            &self.os_disk,
            Some(format!("{}_OSDisk", self.name)),
            &self.data_disks,
            &self.image,
            &self.sku,
        )?;
        let security_profile =
            compute::security_profile(self.security_profile.as_ref(), &self.os_disk, &self.sku)?;
        let spot = compute::spot_settings(self.spot_vm_options.as_ref(), &self.os_disk)?;
        let additional_capabilities = compute::additional_capabilities(
            self.additional_capabilities.as_ref(),
            &self.data_disks,
            &self.sku,
            &self.location,
            &self.zones(),
        )?;
        let identity = identity::resource_identity(self.identity, &self.user_assigned_identities)?;

        let mut os_profile =
            compute::os_profile(self.os_disk.os_type, &self.ssh_key_data, &self.bootstrap_data)?;
        os_profile.computer_name = Some(self.name.clone());

        Ok(VirtualMachine {
            id: None,
            location: self.location.clone(),
            tags: tags::build_tags(
                &self.cluster_name,
                &self.name,
                Some(&self.role),
                &self.additional_tags,
            ),
            zones: self.zones(),
            identity,
            plan: self.image.plan(),
            vm_size: self.size.clone(),
            os_profile: Some(os_profile),
            storage_profile,
            security_profile,
            spot,
            additional_capabilities,
            diagnostics_profile: compute::diagnostics_profile(self.diagnostics.as_ref()),
            availability_set_id: self.availability_set_id.clone(),
            network_interface_ids: self.nic_ids.clone(),
            provisioning_state: None,
        })
    }
}

impl SpecGetter for VirtualMachineSpec {
    type Resource = VirtualMachine;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&VirtualMachine>) -> Result<Option<VirtualMachine>> {
        if existing.is_some() {
            debug!(vm = %self.name, "vm exists, no in-place update");
            return Ok(None);
        }
        if let Some(provider_id) = &self.provider_id {
            return Err(ReconcileError::ResourceDeleted {
                provider_id: provider_id.clone(),
            });
        }
        self.create_parameters().map(Some)
    }
}
