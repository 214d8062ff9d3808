//! `converge status`: tabulate a saved reconcile status.

use converge_core::{OperationHandle, OwnershipRecord, ReconcileStatus};
use tabled::{Table, Tabled};
use tracing::warn;

#[derive(Tabled)]
struct OwnershipRow {
    #[tabled(rename = "KEY")]
    key: String,
    #[tabled(rename = "ENTITY")]
    entity: String,
    #[tabled(rename = "MARKER")]
    marker: String,
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "RESOURCE")]
    resource: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "TOKEN")]
    token: String,
    #[tabled(rename = "AGE")]
    age: String,
}

impl From<&OperationHandle> for OperationRow {
    fn from(handle: &OperationHandle) -> Self {
        Self {
            resource: handle.resource.to_string(),
            kind: handle.kind.to_string(),
            state: format!("{:?}", handle.state).to_lowercase(),
            token: handle.token.clone(),
            age: format_age(handle.age()),
        }
    }
}

fn format_age(age: chrono::Duration) -> String {
    let secs = age.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

fn ownership_rows(status: &ReconcileStatus) -> Vec<OwnershipRow> {
    let mut rows = Vec::new();
    for (key, value) in &status.annotations {
        let record = match OwnershipRecord::from_annotation(key, value) {
            Ok(record) => record,
            Err(e) => {
                warn!(key, error = %e, "skipping unreadable annotation");
                continue;
            }
        };
        rows.extend(record.iter().map(|(entity, marker)| OwnershipRow {
            key: key.clone(),
            entity: entity.to_string(),
            marker: marker.to_string(),
        }));
    }
    rows
}

pub fn render(status: &ReconcileStatus) -> String {
    let mut out = String::new();

    let owned = ownership_rows(status);
    if owned.is_empty() {
        out.push_str("No ownership records\n");
    } else {
        out.push_str(&Table::new(owned).to_string());
        out.push('\n');
    }

    if status.operations.is_empty() {
        out.push_str("No operations in flight\n");
    } else {
        let rows: Vec<OperationRow> = status.operations.iter().map(OperationRow::from).collect();
        out.push('\n');
        out.push_str(&Table::new(rows).to_string());
        out.push('\n');
    }

    out
}
