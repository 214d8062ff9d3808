//! `converge plan`: run the diff of one spec against an observed object.

use std::path::Path;

use anyhow::{Context, Result};
use converge_core::services::{ScaleSetSpec, SecurityGroupSpec, VirtualMachineSpec};
use converge_core::skus::SkuCatalog;
use converge_core::SpecGetter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::{read_json, Kind};

/// Payload a reconcile pass would submit, or `None` when nothing would be
/// written.
pub fn plan(
    kind: Kind,
    spec: &Path,
    observed: Option<&Path>,
    skus: Option<&Path>,
) -> Result<Option<serde_json::Value>> {
    let catalog: Option<SkuCatalog> = skus.map(read_json).transpose()?;
    if let Some(catalog) = &catalog {
        debug!(skus = catalog.len(), "SKU catalog loaded");
    }

    match kind {
        Kind::SecurityGroup => {
            let spec: SecurityGroupSpec = read_json(spec)?;
            diff(&spec, observed)
        }
        Kind::VirtualMachine => {
            let mut spec: VirtualMachineSpec = read_json(spec)?;
            if let Some(catalog) = &catalog {
                spec = spec.with_sku(catalog)?;
            }
            diff(&spec, observed)
        }
        Kind::ScaleSet => {
            let mut spec: ScaleSetSpec = read_json(spec)?;
            if let Some(catalog) = &catalog {
                spec = spec.with_sku(catalog)?;
            }
            diff(&spec, observed)
        }
    }
}

fn diff<S>(spec: &S, observed: Option<&Path>) -> Result<Option<serde_json::Value>>
where
    S: SpecGetter,
    S::Resource: DeserializeOwned + Serialize,
{
    let existing: Option<S::Resource> = observed.map(read_json).transpose()?;
    let id = spec.id();
    let payload = spec
        .parameters(existing.as_ref())
        .with_context(|| format!("Failed to plan {id}"))?;
    match payload {
        Some(payload) => {
            info!(resource = %id, exists = existing.is_some(), "write required");
            Ok(Some(serde_json::to_value(payload)?))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &tempfile::TempDir, name: &str, value: serde_json::Value) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, value.to_string()).unwrap();
        path
    }

    fn nsg_spec() -> serde_json::Value {
        serde_json::json!({
            "name": "my-nsg",
            "resource_group": "my-rg",
            "location": "westeurope",
            "cluster_name": "my-cluster",
            "security_rules": [{
                "name": "allow_ssh",
                "description": "Allow SSH",
                "protocol": "Tcp",
                "priority": 2200,
                "destination_port_range": "22",
                "access": "Allow",
                "direction": "Inbound"
            }]
        })
    }

    #[test]
    fn test_plan_security_group_create() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(&dir, "spec.json", nsg_spec());

        let payload = plan(Kind::SecurityGroup, &spec, None, None).unwrap().unwrap();
        assert_eq!(payload["location"], "westeurope");
        assert_eq!(payload["security_rules"][0]["name"], "allow_ssh");
    }

    #[test]
    fn test_plan_security_group_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(&dir, "spec.json", nsg_spec());
        let created = plan(Kind::SecurityGroup, &spec, None, None).unwrap().unwrap();
        let observed = write(&dir, "observed.json", created);

        let payload = plan(Kind::SecurityGroup, &spec, Some(&observed), None).unwrap();
        assert!(payload.is_none());
    }

    #[test]
    fn test_plan_unknown_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(
            &dir,
            "vm.json",
            serde_json::json!({
                "name": "my-vm",
                "resource_group": "my-rg",
                "location": "westeurope",
                "cluster_name": "my-cluster",
                "size": "Standard_D2s_v3",
                "image": {"id": "image"}
            }),
        );
        let skus = write(&dir, "skus.json", serde_json::json!([]));

        let err = plan(Kind::VirtualMachine, &spec, None, Some(&skus)).unwrap_err();
        assert!(format!("{err:#}").contains("Standard_D2s_v3"));
    }

    #[test]
    fn test_plan_missing_spec_file() {
        let err = plan(Kind::SecurityGroup, Path::new("/nonexistent/spec.json"), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
