//! Settings shared by virtual machines and scale sets.
//!
//! Spec-side types are what users declare; payload-side types are what the
//! provider receives. Builders validate against the SKU of the chosen size
//! and fail with terminal errors naming the offending setting.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};
use crate::skus::{self, Sku};

pub const ULTRA_SSD_LRS: &str = "UltraSSD_LRS";
pub const DEFAULT_ADMIN_USER: &str = "converge";
pub const DEFAULT_SSH_KEY_PATH: &str = "/home/converge/.ssh/authorized_keys";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
    #[default]
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityEncryptionType {
    #[serde(rename = "VMGuestStateOnly")]
    VmGuestStateOnly,
    #[serde(rename = "DiskWithVMGuestState")]
    DiskWithVmGuestState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityType {
    TrustedLaunch,
    #[serde(rename = "ConfidentialVM")]
    ConfidentialVm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedDisk {
    pub storage_account_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_encryption_type: Option<SecurityEncryptionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_encryption_set_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsDisk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub os_type: OsType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<ManagedDisk>,
    /// Place the OS disk on the local host cache.
    #[serde(default)]
    pub ephemeral: bool,
}

impl OsDisk {
    fn security_encryption_type(&self) -> Option<SecurityEncryptionType> {
        self.managed_disk
            .as_ref()
            .and_then(|d| d.security_encryption_type)
    }
}

/// A data disk as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDisk {
    pub name_suffix: String,
    pub disk_size_gb: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lun: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<ManagedDisk>,
}

impl DataDisk {
    fn is_ultra(&self) -> bool {
        self.managed_disk
            .as_ref()
            .is_some_and(|d| d.storage_account_type == ULTRA_SSD_LRS)
    }
}

/// A data disk as sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDiskPayload {
    pub name: String,
    pub lun: i32,
    pub disk_size_gb: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<ManagedDisk>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceImage {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
    /// Third-party images must be purchased through a plan.
    #[serde(default)]
    pub third_party_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Image {
    Id(String),
    Marketplace(MarketplaceImage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePlan {
    pub name: String,
    pub product: String,
    pub publisher: String,
}

impl Image {
    pub fn plan(&self) -> Option<ImagePlan> {
        match self {
            Image::Marketplace(m) if m.third_party_image => Some(ImagePlan {
                name: m.sku.clone(),
                product: m.offer.clone(),
                publisher: m.publisher.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProfile {
    pub image: Image,
    pub os_disk: OsDisk,
    #[serde(default)]
    pub data_disks: Vec<DataDiskPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UefiSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_boot_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vtpm_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_at_host: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_type: Option<SecurityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uefi_settings: Option<UefiSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    Deallocate,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Regular,
    Spot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotVmOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_policy: Option<EvictionPolicy>,
}

/// Priority, eviction and billing as sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotSettings {
    pub priority: Priority,
    pub eviction_policy: EvictionPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultra_ssd_enabled: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootDiagnosticsStorage {
    Disabled,
    Managed,
    UserManaged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootDiagnostics {
    pub storage_account_type: BootDiagnosticsStorage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_account_uri: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot: Option<BootDiagnostics>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsProfile {
    pub boot_diagnostics_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshPublicKey {
    pub path: String,
    pub key_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxConfiguration {
    pub disable_password_authentication: bool,
    pub ssh_public_keys: Vec<SshPublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsConfiguration {
    pub enable_automatic_updates: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name_prefix: Option<String>,
    pub admin_username: String,
    /// Base64-encoded bootstrap data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux: Option<LinuxConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<WindowsConfiguration>,
}

/// Whether an observed value already carries everything a desired value
/// asks for. Fields the desired value leaves unset are filled in by the
/// provider and never count as a difference.
pub trait Requested {
    fn satisfied_by(&self, observed: &Self) -> bool;
}

fn unset_or_eq<T: PartialEq>(desired: &Option<T>, observed: &Option<T>) -> bool {
    desired.is_none() || desired == observed
}

fn unset_or_eq_ignore_case(desired: &Option<String>, observed: &Option<String>) -> bool {
    match (desired, observed) {
        (None, _) => true,
        (Some(d), Some(o)) => d.eq_ignore_ascii_case(o),
        (Some(_), None) => false,
    }
}

impl<T: Requested> Requested for Option<T> {
    fn satisfied_by(&self, observed: &Self) -> bool {
        match (self, observed) {
            (None, _) => true,
            (Some(d), Some(o)) => d.satisfied_by(o),
            (Some(_), None) => false,
        }
    }
}

impl Requested for ManagedDisk {
    fn satisfied_by(&self, observed: &Self) -> bool {
        self.storage_account_type
            .eq_ignore_ascii_case(&observed.storage_account_type)
            && unset_or_eq(&self.security_encryption_type, &observed.security_encryption_type)
            && unset_or_eq_ignore_case(&self.disk_encryption_set_id, &observed.disk_encryption_set_id)
    }
}

impl Requested for OsDisk {
    fn satisfied_by(&self, observed: &Self) -> bool {
        self.os_type == observed.os_type
            && self.ephemeral == observed.ephemeral
            && unset_or_eq(&self.name, &observed.name)
            && unset_or_eq(&self.disk_size_gb, &observed.disk_size_gb)
            && unset_or_eq_ignore_case(&self.caching, &observed.caching)
            && self.managed_disk.satisfied_by(&observed.managed_disk)
    }
}

impl Requested for DataDiskPayload {
    fn satisfied_by(&self, observed: &Self) -> bool {
        self.lun == observed.lun
            && self.disk_size_gb == observed.disk_size_gb
            && self.name.eq_ignore_ascii_case(&observed.name)
            && unset_or_eq_ignore_case(&self.caching, &observed.caching)
            && self.managed_disk.satisfied_by(&observed.managed_disk)
    }
}

/// Data disks are matched by LUN; the provider may list them in any order.
pub fn data_disks_satisfied(desired: &[DataDiskPayload], observed: &[DataDiskPayload]) -> bool {
    desired.len() == observed.len()
        && desired.iter().all(|wanted| {
            observed
                .iter()
                .find(|disk| disk.lun == wanted.lun)
                .is_some_and(|disk| wanted.satisfied_by(disk))
        })
}

impl Requested for UefiSettings {
    fn satisfied_by(&self, observed: &Self) -> bool {
        unset_or_eq(&self.secure_boot_enabled, &observed.secure_boot_enabled)
            && unset_or_eq(&self.vtpm_enabled, &observed.vtpm_enabled)
    }
}

impl Requested for SecurityProfile {
    fn satisfied_by(&self, observed: &Self) -> bool {
        unset_or_eq(&self.encryption_at_host, &observed.encryption_at_host)
            && unset_or_eq(&self.security_type, &observed.security_type)
            && self.uefi_settings.satisfied_by(&observed.uefi_settings)
    }
}

impl Requested for SpotSettings {
    fn satisfied_by(&self, observed: &Self) -> bool {
        self.priority == observed.priority
            && self.eviction_policy == observed.eviction_policy
            && unset_or_eq(&self.max_price, &observed.max_price)
    }
}

/// Reject sizes below the node hardware minimum.
pub fn validate_size(sku: &Sku) -> Result<()> {
    if !sku.capability_at_least(skus::VCPUS, skus::MINIMUM_VCPUS)? {
        return Err(ReconcileError::invalid_spec(
            "size",
            "VM size should be bigger or equal to at least 2 vCPUs",
        ));
    }
    if !sku.capability_at_least(skus::MEMORY_GB, skus::MINIMUM_MEMORY_GB)? {
        return Err(ReconcileError::invalid_spec(
            "size",
            "VM memory should be bigger or equal to at least 2Gi",
        ));
    }
    Ok(())
}

/// OS profile for a Linux or Windows machine. `ssh_key_data` is the
/// base64-encoded public key.
pub fn os_profile(os_type: OsType, ssh_key_data: &str, bootstrap_data: &str) -> Result<OsProfile> {
    let custom_data = (!bootstrap_data.is_empty()).then(|| STANDARD.encode(bootstrap_data));
    let mut profile = OsProfile {
        computer_name: None,
        computer_name_prefix: None,
        admin_username: DEFAULT_ADMIN_USER.to_string(),
        custom_data,
        linux: None,
        windows: None,
    };

    match os_type {
        OsType::Windows => {
            profile.windows = Some(WindowsConfiguration {
                enable_automatic_updates: false,
            });
        }
        OsType::Linux => {
            let decoded = STANDARD.decode(ssh_key_data.trim()).map_err(|e| {
                ReconcileError::invalid_spec("sshPublicKey", format!("failed to decode ssh public key: {e}"))
            })?;
            let key_data = String::from_utf8(decoded).map_err(|_| {
                ReconcileError::invalid_spec("sshPublicKey", "ssh public key is not valid UTF-8")
            })?;
            profile.linux = Some(LinuxConfiguration {
                disable_password_authentication: true,
                ssh_public_keys: vec![SshPublicKey {
                    path: DEFAULT_SSH_KEY_PATH.to_string(),
                    key_data,
                }],
            });
        }
    }
    Ok(profile)
}

/// Storage profile with data disks named `<resource>_<suffix>`.
pub fn storage_profile(
    resource_name: &str,
    os_disk: &OsDisk,
    os_disk_name: Option<String>,
    data_disks: &[DataDisk],
    image: &Image,
    sku: &Sku,
) -> Result<StorageProfile> {
    if os_disk.ephemeral && !sku.has_capability(skus::EPHEMERAL_OS_DISK) {
        return Err(ReconcileError::invalid_spec(
            "osDisk.diffDiskSettings",
            format!(
                "VM size {} does not support ephemeral os. Select a different VM size or disable ephemeral os",
                sku.name
            ),
        ));
    }

    let mut os_disk = os_disk.clone();
    os_disk.name = os_disk_name;

    let data_disks = data_disks
        .iter()
        .enumerate()
        .map(|(i, disk)| DataDiskPayload {
            name: format!("{resource_name}_{}", disk.name_suffix),
            lun: disk.lun.unwrap_or(i as i32),
            disk_size_gb: disk.disk_size_gb,
            caching: disk.caching.clone(),
            managed_disk: disk.managed_disk.clone(),
        })
        .collect();

    Ok(StorageProfile {
        image: image.clone(),
        os_disk,
        data_disks,
    })
}

/// Validate a requested security profile against the OS disk and the SKU.
pub fn security_profile(
    requested: Option<&SecurityProfile>,
    os_disk: &OsDisk,
    sku: &Sku,
) -> Result<Option<SecurityProfile>> {
    let Some(requested) = requested else {
        return Ok(None);
    };
    let encryption_at_host = requested.encryption_at_host.unwrap_or(false);
    let uefi = requested.uefi_settings.clone().unwrap_or_default();
    let secure_boot = uefi.secure_boot_enabled.unwrap_or(false);
    let vtpm = uefi.vtpm_enabled.unwrap_or(false);

    if let Some(encryption_type) = os_disk.security_encryption_type() {
        let guest_state = encryption_type == SecurityEncryptionType::DiskWithVmGuestState;
        if encryption_at_host && guest_state {
            return Err(ReconcileError::invalid_spec(
                "securityProfile.encryptionAtHost",
                "encryption at host is not supported when securityEncryptionType is set to DiskWithVMGuestState",
            ));
        }
        if requested.security_type != Some(SecurityType::ConfidentialVm) {
            return Err(ReconcileError::invalid_spec(
                "securityProfile.securityType",
                "securityType should be set to ConfidentialVM when securityEncryptionType is set",
            ));
        }
        if guest_state && !secure_boot {
            return Err(ReconcileError::invalid_spec(
                "securityProfile.uefiSettings.secureBootEnabled",
                "secureBootEnabled should be true when securityEncryptionType is set to DiskWithVMGuestState",
            ));
        }
        if !vtpm {
            return Err(ReconcileError::invalid_spec(
                "securityProfile.uefiSettings.vTpmEnabled",
                "vTpmEnabled should be true when securityEncryptionType is set",
            ));
        }
        if sku.capability(skus::CONFIDENTIAL_COMPUTING_TYPE).is_none() {
            return Err(ReconcileError::invalid_spec(
                "size",
                format!(
                    "VM size {} does not support confidential computing. Select a different VM size or remove the security profile of the OS disk",
                    sku.name
                ),
            ));
        }
        return Ok(Some(SecurityProfile {
            encryption_at_host: requested.encryption_at_host,
            security_type: Some(SecurityType::ConfidentialVm),
            uefi_settings: Some(uefi),
        }));
    }

    if encryption_at_host && !sku.has_capability(skus::ENCRYPTION_AT_HOST) {
        return Err(ReconcileError::invalid_spec(
            "securityProfile.encryptionAtHost",
            format!(
                "encryption at host is not supported for VM type {} (capability {})",
                sku.name,
                skus::ENCRYPTION_AT_HOST
            ),
        ));
    }

    let trusted_launch_disabled = sku.has_capability(skus::TRUSTED_LAUNCH_DISABLED);
    let trusted_launch = requested.security_type == Some(SecurityType::TrustedLaunch);
    if secure_boot {
        if trusted_launch_disabled {
            return Err(ReconcileError::invalid_spec(
                "securityProfile.uefiSettings.secureBootEnabled",
                format!("secure boot is not supported for VM type {}", sku.name),
            ));
        }
        if !trusted_launch {
            return Err(ReconcileError::invalid_spec(
                "securityProfile.securityType",
                "securityType should be set to TrustedLaunch when secureBootEnabled is true",
            ));
        }
    }
    if vtpm {
        if trusted_launch_disabled {
            return Err(ReconcileError::invalid_spec(
                "securityProfile.uefiSettings.vTpmEnabled",
                format!("vTPM is not supported for VM type {}", sku.name),
            ));
        }
        if !trusted_launch {
            return Err(ReconcileError::invalid_spec(
                "securityProfile.securityType",
                "securityType should be set to TrustedLaunch when vTpmEnabled is true",
            ));
        }
    }
    if trusted_launch && trusted_launch_disabled {
        return Err(ReconcileError::invalid_spec(
            "securityProfile.securityType",
            format!("trusted launch is not supported for VM type {}", sku.name),
        ));
    }

    Ok(Some(requested.clone()))
}

/// Priority and eviction settings of a spot machine.
pub fn spot_settings(options: Option<&SpotVmOptions>, os_disk: &OsDisk) -> Result<Option<SpotSettings>> {
    let Some(options) = options else {
        return Ok(None);
    };
    let eviction_policy = match (os_disk.ephemeral, options.eviction_policy) {
        (true, Some(EvictionPolicy::Deallocate)) => {
            return Err(ReconcileError::invalid_spec(
                "spotVMOptions.evictionPolicy",
                "spot VMs with an ephemeral OS disk must use the Delete eviction policy",
            ));
        }
        (true, _) => EvictionPolicy::Delete,
        (false, policy) => policy.unwrap_or(EvictionPolicy::Deallocate),
    };
    Ok(Some(SpotSettings {
        priority: Priority::Spot,
        eviction_policy,
        max_price: options.max_price,
    }))
}

/// Additional capabilities, enabling ultra SSD support when an ultra data
/// disk is present and nothing was set explicitly.
pub fn additional_capabilities(
    requested: Option<&AdditionalCapabilities>,
    data_disks: &[DataDisk],
    sku: &Sku,
    location: &str,
    zones: &[String],
) -> Result<Option<AdditionalCapabilities>> {
    let explicit = requested.and_then(|c| c.ultra_ssd_enabled);
    let wants_ultra = data_disks.iter().any(DataDisk::is_ultra);

    if wants_ultra && explicit != Some(false) {
        let supported = if zones.is_empty() {
            sku.has_location_capability(skus::ULTRA_SSD_AVAILABLE, location, None)
        } else {
            zones
                .iter()
                .all(|zone| sku.has_location_capability(skus::ULTRA_SSD_AVAILABLE, location, Some(zone)))
        };
        if !supported {
            return Err(ReconcileError::invalid_spec(
                "dataDisks.managedDisk.storageAccountType",
                format!(
                    "VM size {} does not support ultra disks in location {location}. Select a different VM size or disable ultra disks",
                    sku.name
                ),
            ));
        }
    }

    let ultra_ssd_enabled = match explicit {
        Some(value) => Some(value),
        None if wants_ultra => Some(true),
        None => None,
    };
    Ok(ultra_ssd_enabled.map(|enabled| AdditionalCapabilities {
        ultra_ssd_enabled: Some(enabled),
    }))
}

pub fn diagnostics_profile(diagnostics: Option<&Diagnostics>) -> Option<DiagnosticsProfile> {
    let boot = diagnostics?.boot.as_ref()?;
    Some(match boot.storage_account_type {
        BootDiagnosticsStorage::Disabled => DiagnosticsProfile {
            boot_diagnostics_enabled: false,
            storage_uri: None,
        },
        BootDiagnosticsStorage::Managed => DiagnosticsProfile {
            boot_diagnostics_enabled: true,
            storage_uri: None,
        },
        BootDiagnosticsStorage::UserManaged => DiagnosticsProfile {
            boot_diagnostics_enabled: true,
            storage_uri: boot.storage_account_uri.clone(),
        },
    })
}
