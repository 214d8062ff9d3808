//! Compute SKU capabilities.
//!
//! Specs validate hardware-dependent settings against the SKU of the chosen
//! size. The lookup is injected as a read-only [`CapabilityLookup`] so specs
//! never consult ambient state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

pub const VCPUS: &str = "vCPUs";
pub const MEMORY_GB: &str = "MemoryGB";
pub const ENCRYPTION_AT_HOST: &str = "EncryptionAtHostSupported";
pub const EPHEMERAL_OS_DISK: &str = "EphemeralOSDiskSupported";
pub const ACCELERATED_NETWORKING: &str = "AcceleratedNetworkingEnabled";
pub const TRUSTED_LAUNCH_DISABLED: &str = "TrustedLaunchDisabled";
pub const CONFIDENTIAL_COMPUTING_TYPE: &str = "ConfidentialComputingType";
pub const ULTRA_SSD_AVAILABLE: &str = "UltraSSDAvailable";

/// Minimum vCPU count of a node.
pub const MINIMUM_VCPUS: f64 = 2.0;
/// Minimum memory of a node, in GiB.
pub const MINIMUM_MEMORY_GB: f64 = 2.0;

/// Capabilities a SKU offers in one location, per zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub location: String,
    #[serde(default)]
    pub zones: Vec<String>,
    /// Capabilities that only hold in the listed zones.
    #[serde(default)]
    pub zone_capabilities: BTreeMap<String, String>,
}

/// A compute SKU and its capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub name: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, String>,
    #[serde(default)]
    pub location_info: Vec<LocationInfo>,
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("supported")
}

impl Sku {
    pub fn capability(&self, name: &str) -> Option<&str> {
        self.capabilities.get(name).map(String::as_str)
    }

    /// The capability is present and set to `True` or `Supported`.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capability(name).is_some_and(is_truthy)
    }

    /// The capability is numeric and at least `minimum`.
    pub fn capability_at_least(&self, name: &str, minimum: f64) -> Result<bool> {
        let Some(value) = self.capability(name) else {
            return Ok(false);
        };
        let parsed: f64 = value.parse().map_err(|_| {
            ReconcileError::invalid_spec(
                "size",
                format!("capability {name} of VM size {} is not numeric: {value}", self.name),
            )
        })?;
        Ok(parsed >= minimum)
    }

    /// The capability holds in `location`, and in `zone` when one is given.
    pub fn has_location_capability(&self, name: &str, location: &str, zone: Option<&str>) -> bool {
        self.location_info
            .iter()
            .filter(|info| info.location.eq_ignore_ascii_case(location))
            .any(|info| {
                let zone_ok = match zone {
                    Some(zone) => info.zones.iter().any(|z| z == zone),
                    None => true,
                };
                zone_ok && info.zone_capabilities.get(name).is_some_and(|v| is_truthy(v))
            })
    }
}

/// Read-only SKU lookup injected into specs.
pub trait CapabilityLookup: Send + Sync {
    fn sku(&self, size: &str, location: &str) -> Result<Sku>;
}

/// In-memory SKU catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkuCatalog {
    skus: Vec<Sku>,
}

impl SkuCatalog {
    pub fn new(skus: Vec<Sku>) -> Self {
        Self { skus }
    }

    pub fn len(&self) -> usize {
        self.skus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skus.is_empty()
    }
}

impl CapabilityLookup for SkuCatalog {
    fn sku(&self, size: &str, location: &str) -> Result<Sku> {
        self.skus
            .iter()
            .find(|sku| {
                sku.name.eq_ignore_ascii_case(size)
                    && (sku.locations.is_empty()
                        || sku.locations.iter().any(|l| l.eq_ignore_ascii_case(location)))
            })
            .cloned()
            .ok_or_else(|| {
                ReconcileError::invalid_spec(
                    "size",
                    format!("VM size {size} is not available in location {location}"),
                )
            })
    }
}
