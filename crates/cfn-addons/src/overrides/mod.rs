//! Overrides applied to the composed template before it is written
//!
//! A scope's `overrides/` directory selects at most one mechanism:
//! - `cfn.patches.yml`: a declarative patch list ([PatchList])
//! - `override.yml`: an external program rewriting the template ([CommandOverrider])
//!
//! Both present is a configuration error, there is no precedence between them.
mod patch;
mod programmatic;

pub use patch::{PatchError, PatchList, PatchOp};
pub use programmatic::{CommandOverrider, FnOverrider};

use crate::scope::AddonScope;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const PATCHES_FILE: &str = "cfn.patches.yml";
pub const COMMAND_FILE: &str = "override.yml";

/// Something that turns a rendered template into the one that gets deployed
pub trait TemplateOverrider: std::fmt::Debug {
    /// Short description for logs and errors
    fn describe(&self) -> String;

    fn override_template(&self, template: Value) -> Result<Value, OverrideError>;
}

/// The override mechanism configured for a scope
#[derive(Debug)]
pub enum OverrideConfig {
    None,
    Patches(PatchList),
    Command(CommandOverrider),
}

impl OverrideConfig {
    pub fn detect(overrides_dir: &Path) -> Result<Self, OverrideError> {
        let patches = overrides_dir.join(PATCHES_FILE);
        let command = overrides_dir.join(COMMAND_FILE);

        match (patches.is_file(), command.is_file()) {
            (true, true) => Err(OverrideError::ConflictingOverrides {
                dir: overrides_dir.to_path_buf(),
            }),
            (true, false) => Ok(OverrideConfig::Patches(PatchList::load(&patches)?)),
            (false, true) => Ok(OverrideConfig::Command(CommandOverrider::load(&command)?)),
            (false, false) => Ok(OverrideConfig::None),
        }
    }

    pub fn overrider(&self) -> Option<&dyn TemplateOverrider> {
        match self {
            OverrideConfig::None => None,
            OverrideConfig::Patches(patches) => Some(patches),
            OverrideConfig::Command(command) => Some(command),
        }
    }
}

const PATCHES_TEMPLATE: &str = "\
# Operations applied in order to the composed addons template.
# Paths are JSON pointers, `-` appends to a list.
#
# - op: add
#   path: /Resources/MyTable/Properties/Tags/-
#   value:
#     Key: team
#     Value: storage
# - op: replace
#   path: /Resources/MyTable/Properties/BillingMode
#   value: PAY_PER_REQUEST
# - op: remove
#   path: /Outputs/MyTableName
[]
";

/// Create an empty `cfn.patches.yml`, never replacing an existing override
pub fn scaffold_patches(overrides_dir: &Path) -> Result<PathBuf, OverrideError> {
    let patches = overrides_dir.join(PATCHES_FILE);
    if patches.exists() {
        return Err(OverrideError::AlreadyExists { path: patches });
    }
    if overrides_dir.join(COMMAND_FILE).exists() {
        return Err(OverrideError::ConflictingOverrides {
            dir: overrides_dir.to_path_buf(),
        });
    }

    std::fs::create_dir_all(overrides_dir).map_err(|source| OverrideError::Io {
        path: overrides_dir.to_path_buf(),
        source,
    })?;
    std::fs::write(&patches, PATCHES_TEMPLATE).map_err(|source| OverrideError::Io {
        path: patches.clone(),
        source,
    })?;

    tracing::info!(path=%patches.display(), "created patch file");
    Ok(patches)
}

/// Run the overrider (if any) and check that its output is still a deployable template
pub fn apply_override(
    template: Value,
    overrider: Option<&dyn TemplateOverrider>,
    scope: AddonScope,
) -> Result<Value, OverrideError> {
    let Some(overrider) = overrider else {
        return Ok(template);
    };

    tracing::info!(overrider=%overrider.describe(), "applying override");
    let overridden = overrider.override_template(template)?;

    validate_output(&overridden, scope).map_err(|reason| OverrideError::InvalidOverrideOutput {
        overrider: overrider.describe(),
        reason,
    })?;

    Ok(overridden)
}

fn validate_output(template: &Value, scope: AddonScope) -> Result<(), String> {
    let Some(template) = template.as_object() else {
        return Err("template is not a mapping".into());
    };

    let parameters = template.get("Parameters").and_then(Value::as_object);
    for required in scope.required_parameters() {
        if !parameters.is_some_and(|parameters| parameters.contains_key(*required)) {
            return Err(format!("required parameter `{required}` was removed"));
        }
    }

    let has_resources = template
        .get("Resources")
        .and_then(Value::as_object)
        .is_some_and(|resources| !resources.is_empty());
    if !has_resources {
        return Err("template has no resources".into());
    }

    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum OverrideError {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("both cfn.patches.yml and override.yml exist in {}, keep only one", .dir.display())]
    ConflictingOverrides { dir: PathBuf },
    #[error("override {overrider} produced an invalid template: {reason}")]
    InvalidOverrideOutput { overrider: String, reason: String },
    #[error("{} already exists", .path.display())]
    AlreadyExists { path: PathBuf },
    #[error("failed to access {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed override configuration {file}: {reason}")]
    MalformedOverride { file: String, reason: String },
    #[error("override command `{command}` failed: {reason}")]
    Command { command: String, reason: String },
}
