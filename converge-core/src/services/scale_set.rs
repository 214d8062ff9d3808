//! Virtual machine scale sets.
//!
//! Unlike single VMs, scale sets are updated in place. An update recomputes
//! the creation payload, keeps the network profile the provider already has,
//! and consults the surge policy so rolling model updates can replace
//! instances without dropping below the desired size.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::compute::{
    self, AdditionalCapabilities, DataDisk, Diagnostics, DiagnosticsProfile, Image, ImagePlan,
    OsDisk, OsProfile, Requested, SecurityProfile, SpotSettings, SpotVmOptions, StorageProfile,
};
use crate::error::{ReconcileError, Result};
use crate::identity::{self, ResourceIdentity, UserAssignedIdentity, VmIdentity};
use crate::resource::SpecGetter;
use crate::skus::{self, CapabilityLookup, Sku};
use crate::surge::{Rollout, SurgePolicy};
use crate::tags::{self, Tags};

pub const FLEXIBLE_NETWORK_API_VERSION: &str = "2020-11-01";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestrationMode {
    #[default]
    Uniform,
    Flexible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeMode {
    Manual,
    Automatic,
    Rolling,
}

/// An instance of the set as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetInstance {
    pub instance_id: String,
    pub latest_model_applied: bool,
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

/// A network interface as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub subnet_id: String,
    #[serde(default = "one")]
    pub private_ip_configs: u32,
    #[serde(default)]
    pub accelerated_networking: Option<bool>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConfiguration {
    pub name: String,
    pub subnet_id: String,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    pub name: String,
    pub primary: bool,
    pub enable_ip_forwarding: bool,
    pub enable_accelerated_networking: bool,
    pub ip_configurations: Vec<IpConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_api_version: Option<String>,
    pub network_interface_configurations: Vec<NetworkConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateNotification {
    /// ISO 8601 duration, e.g. `PT10M`.
    pub not_before_timeout: String,
    pub enable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetSku {
    pub name: String,
    pub tier: String,
    pub capacity: i64,
}

/// Template every instance of the set is created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<OsProfile>,
    pub storage_profile: StorageProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_profile: Option<SecurityProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_profile: Option<DiagnosticsProfile>,
    /// Omitted on updates so the provider keeps what it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<NetworkProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spot: Option<SpotSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_notification: Option<TerminateNotification>,
}

/// Remote scale set object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleSet {
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
    pub sku: ScaleSetSku,
    #[serde(default)]
    pub orchestration_mode: OrchestrationMode,
    #[serde(default)]
    pub single_placement_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overprovision: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_mode: Option<UpgradeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_fault_domain_count: Option<i32>,
    pub vm_profile: VmProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_capabilities: Option<AdditionalCapabilities>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

impl ScaleSet {
    /// Instance template fields differ in a way that needs an instance
    /// upgrade. `self` is the observed set; fields `desired` leaves unset are
    /// provider defaults and never count. Tags are metadata and never count.
    pub fn has_model_changes(&self, desired: &ScaleSet) -> bool {
        let observed = &self.vm_profile;
        let wanted = &desired.vm_profile;
        !self.sku.name.eq_ignore_ascii_case(&desired.sku.name)
            || self.zones != desired.zones
            || self.identity != desired.identity
            || observed.storage_profile.image != wanted.storage_profile.image
            || !wanted
                .storage_profile
                .os_disk
                .satisfied_by(&observed.storage_profile.os_disk)
            || !compute::data_disks_satisfied(
                &wanted.storage_profile.data_disks,
                &observed.storage_profile.data_disks,
            )
            || !wanted.security_profile.satisfied_by(&observed.security_profile)
            || !wanted.spot.satisfied_by(&observed.spot)
    }
}

/// True when the fleet does not need a surge to converge: every instance
/// runs the latest model, none does (the model is not mixed), or at least
/// `capacity` instances already do.
pub fn has_enough_latest_model(instances: &[ScaleSetInstance], capacity: i64) -> bool {
    let latest = instances.iter().filter(|i| i.latest_model_applied).count();
    latest == instances.len() || latest == 0 || latest as i64 >= capacity
}

/// Desired state of one scale set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSetSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cluster_name: String,
    pub size: String,
    pub capacity: i64,
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
    pub subnet_id: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub accelerated_networking: Option<bool>,
    /// Minutes before a scheduled termination proceeds.
    #[serde(default)]
    pub terminate_notification_timeout: Option<u32>,
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
    #[serde(default)]
    pub failure_domains: Vec<String>,
    #[serde(default)]
    pub orchestration_mode: OrchestrationMode,
    #[serde(default)]
    pub surge: SurgePolicy,
    /// Force an update so new bootstrap data reaches future instances.
    #[serde(default)]
    pub should_patch_custom_data: bool,
    #[serde(default)]
    pub additional_tags: Tags,
    /// Instances as last listed from the provider.
    #[serde(default)]
    pub instances: Vec<ScaleSetInstance>,
    #[serde(default)]
    pub sku: Sku,
}

impl ScaleSetSpec {
    pub fn with_sku(mut self, lookup: &dyn CapabilityLookup) -> Result<Self> {
        self.sku = lookup.sku(&self.size, &self.location)?;
        Ok(self)
    }

    fn network_profile(&self, accelerated_networking: bool) -> NetworkProfile {
        let default_nic;
        let nics = if self.network_interfaces.is_empty() {
            default_nic = [NetworkInterface {
                subnet_id: self.subnet_id.clone(),
                private_ip_configs: 1,
                accelerated_networking: None,
            }];
            &default_nic[..]
        } else {
            &self.network_interfaces[..]
        };

        let configurations = nics
            .iter()
            .enumerate()
            .map(|(i, nic)| NetworkConfiguration {
                name: format!("{}-nic-{i}", self.name),
                primary: i == 0,
                enable_ip_forwarding: true,
                enable_accelerated_networking: nic
                    .accelerated_networking
                    .unwrap_or(accelerated_networking),
                ip_configurations: (0..nic.private_ip_configs.max(1))
                    .map(|j| IpConfiguration {
                        name: format!("ipConfig{j}"),
                        subnet_id: nic.subnet_id.clone(),
                        primary: j == 0,
                    })
                    .collect(),
            })
            .collect();

        NetworkProfile {
            network_api_version: (self.orchestration_mode == OrchestrationMode::Flexible)
                .then(|| FLEXIBLE_NETWORK_API_VERSION.to_string()),
            network_interface_configurations: configurations,
        }
    }

    fn create_parameters(&self) -> Result<ScaleSet> {
        if self.sku.name.is_empty() {
            return Err(ReconcileError::invalid_spec(
                "size",
                format!("no SKU resolved for VM size {}", self.size),
            ));
        }
        if self.capacity < 0 {
            return Err(ReconcileError::invalid_spec(
                "capacity",
                format!("capacity must not be negative, got {}", self.capacity),
            ));
        }

        let accelerated_networking = self
            .accelerated_networking
            .unwrap_or_else(|| self.sku.has_capability(skus::ACCELERATED_NETWORKING));

        let storage_profile = compute::storage_profile(
            &self.name,
            &self.os_disk,
            None,
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
            &self.failure_domains,
        )?;
        let identity = identity::resource_identity(self.identity, &self.user_assigned_identities)?;

        let mut os_profile =
            compute::os_profile(self.os_disk.os_type, &self.ssh_key_data, &self.bootstrap_data)?;
        os_profile.computer_name_prefix = Some(self.name.clone());

        let mut scale_set = ScaleSet {
            id: None,
            location: self.location.clone(),
            tags: tags::build_tags(&self.cluster_name, &self.name, Some("node"), &self.additional_tags),
            zones: self.failure_domains.clone(),
            identity,
            plan: self.image.plan(),
            sku: ScaleSetSku {
                name: self.size.clone(),
                tier: "Standard".to_string(),
                capacity: self.capacity,
            },
            orchestration_mode: self.orchestration_mode,
            single_placement_group: false,
            overprovision: None,
            upgrade_mode: None,
            platform_fault_domain_count: None,
            vm_profile: VmProfile {
                os_profile: Some(os_profile),
                storage_profile,
                security_profile,
                diagnostics_profile: compute::diagnostics_profile(self.diagnostics.as_ref()),
                network_profile: Some(self.network_profile(accelerated_networking)),
                spot,
                terminate_notification: self.terminate_notification_timeout.map(|minutes| {
                    TerminateNotification {
                        not_before_timeout: format!("PT{minutes}M"),
                        enable: true,
                    }
                }),
            },
            additional_capabilities,
            provisioning_state: None,
        };

        match self.orchestration_mode {
            OrchestrationMode::Uniform => {
                scale_set.overprovision = Some(false);
                scale_set.upgrade_mode = Some(UpgradeMode::Manual);
            }
            OrchestrationMode::Flexible => {
                let domains = self.failure_domains.len().max(1);
                scale_set.platform_fault_domain_count = Some(domains as i32);
            }
        }

        Ok(scale_set)
    }

    fn update_parameters(&self, existing: &ScaleSet) -> Result<Option<ScaleSet>> {
        let mut params = self.create_parameters()?;
        params.vm_profile.network_profile = None;
        params.id = existing.id.clone();

        let model_changed = existing.has_model_changes(&params);
        let fleet_converged = self.orchestration_mode == OrchestrationMode::Flexible
            || has_enough_latest_model(&self.instances, existing.sku.capacity);
        let plan = self.surge.plan(
            existing.sku.capacity,
            self.capacity,
            Rollout {
                model_changed,
                fleet_converged,
            },
        );

        let tags_changed = params
            .tags
            .iter()
            .any(|(k, v)| existing.tags.get(k) != Some(v));
        let mut tags = existing.tags.clone();
        tags.extend(params.tags);
        params.tags = tags;

        if !plan.grows() && !model_changed && !tags_changed && !self.should_patch_custom_data {
            debug!(vmss = %self.name, capacity = existing.sku.capacity, "scale set up to date");
            return Ok(None);
        }

        // Scaling down is done by deleting instances, never through this PUT.
        params.sku.capacity = plan.target.max(existing.sku.capacity);

        info!(
            vmss = %self.name,
            current = plan.current,
            target = params.sku.capacity,
            surged = plan.surged,
            model_changed,
            tags_changed,
            "scale set needs update"
        );
        Ok(Some(params))
    }
}

impl SpecGetter for ScaleSetSpec {
    type Resource = ScaleSet;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&ScaleSet>) -> Result<Option<ScaleSet>> {
        match existing {
            Some(existing) => self.update_parameters(existing),
            None => self.create_parameters().map(Some),
        }
    }
}
