//! `from_cfn` references of workload manifests
//!
//! Only the fields that can point at a CloudFormation export are read, the rest of the
//! manifest is left alone:
//!
//! - `variables.<name>.from_cfn`
//! - `secrets.<name>.from_cfn`
//! - `logging.secretOptions.<name>.from_cfn`
//! - `sidecars.<sidecar>.secrets.<name>.from_cfn`
//! - `network.vpc.security_groups[].from_cfn` (also `security_groups.groups[]`)
//!
//! The same fields inside `environments.<env>` override the top-level ones for that
//! environment.
use crate::exports::{ExportName, ImportReference, ImportSource};
use crate::scope::Target;
use crate::value;
use indexmap::IndexMap;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// A manifest `from_cfn` field: dotted path and export name
#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct FromCfn {
    pub field: String,
    pub name: String,
}

/// Every `from_cfn` reference that applies to `env`
///
/// An entry under `environments.<env>` replaces the top-level entry at the same path,
/// whether or not it uses `from_cfn` itself. A security group list is replaced as a whole.
pub fn from_cfn_fields(manifest: &Value, env: &str) -> Vec<FromCfn> {
    let mut slots = collect(manifest);

    if let Some(overrides) = manifest.get("environments").and_then(|e| e.get(env)) {
        let prefix = format!("environments.{env}.");
        for (slot, fields) in collect(overrides) {
            let fields = fields
                .into_iter()
                .map(|f| FromCfn::new(format!("{prefix}{}", f.field), f.name))
                .collect();
            slots.insert(slot, fields);
        }
    }

    slots.into_values().flatten().collect()
}

/// `from_cfn` fields keyed by the manifest entry they belong to
fn collect(root: &Value) -> IndexMap<String, Vec<FromCfn>> {
    let mut slots = IndexMap::new();

    let mut named = |path: &str, section: Option<&Value>| {
        let Some(entries) = section.and_then(Value::as_object) else {
            return;
        };
        for (name, entry) in entries {
            let fields = entry
                .get("from_cfn")
                .and_then(Value::as_str)
                .map(|export| FromCfn::new(format!("{path}.{name}.from_cfn"), export.to_string()));
            slots.insert(format!("{path}.{name}"), fields.into_iter().collect());
        }
    };

    named("variables", root.get("variables"));
    named("secrets", root.get("secrets"));
    named(
        "logging.secretOptions",
        root.get("logging").and_then(|l| l.get("secretOptions")),
    );

    if let Some(sidecars) = root.get("sidecars").and_then(Value::as_object) {
        for (sidecar, definition) in sidecars {
            named(&format!("sidecars.{sidecar}.secrets"), definition.get("secrets"));
        }
    }

    let security_groups = root
        .get("network")
        .and_then(|n| n.get("vpc"))
        .and_then(|v| v.get("security_groups"));
    let (path, groups) = match security_groups {
        Some(Value::Object(object)) => ("network.vpc.security_groups.groups", object.get("groups")),
        other => ("network.vpc.security_groups", other),
    };
    if let Some(groups) = groups.and_then(Value::as_array) {
        let fields = groups
            .iter()
            .enumerate()
            .filter_map(|(index, group)| {
                let export = group.get("from_cfn").and_then(Value::as_str)?;
                Some(FromCfn::new(format!("{path}[{index}].from_cfn"), export.to_string()))
            })
            .collect();
        slots.insert("network.vpc.security_groups".to_string(), fields);
    }

    slots
}

/// Read a manifest and turn its `from_cfn` fields into import references for `target`
pub fn load_imports(path: &Path, target: &Target) -> Result<Vec<ImportReference>, ManifestError> {
    tracing::info!(path=%path.display(), "loading workload manifest");

    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest = value::parse_document(&text).map_err(|e| ManifestError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let file = path.display().to_string();
    Ok(from_cfn_fields(&manifest, &target.env)
        .into_iter()
        .map(|from_cfn| {
            ImportReference::new(
                ExportName::Literal(from_cfn.name),
                ImportSource::ManifestField {
                    file: file.clone(),
                    field: from_cfn.field,
                },
                target.stack_name(),
            )
        })
        .collect())
}

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed manifest {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}
