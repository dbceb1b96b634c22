//! Patch-list overrides (`cfn.patches.yml`)
//!
//! ```yaml
//! - op: add
//!   path: /Resources/Table/Properties/Tags/-
//!   value: { Key: team, Value: storage }
//! - op: replace
//!   path: /Resources/Table/Properties/BillingMode
//!   value: PAY_PER_REQUEST
//! - op: remove
//!   path: /Outputs/TableName
//! ```
//!
//! Operations run in file order, each against the result of the previous one.
use super::{OverrideError, TemplateOverrider};
use crate::addon_documents::{display_source, Source};
use crate::value::{self, unescape_token};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatchList {
    pub source: Source,
    pub ops: Vec<PatchOp>,
}

impl PatchList {
    /// Parse a patch file; unknown operations are rejected here, not when applying
    pub fn parse(text: &str, source: Source) -> Result<Self, PatchError> {
        let malformed = |reason: String| PatchError::MalformedPatch {
            file: display_source(&source),
            reason,
        };

        let document = value::parse_document(text).map_err(|e| malformed(e.to_string()))?;
        let ops: Vec<PatchOp> = match document {
            Value::Null => vec![],
            document => serde_json::from_value(document).map_err(|e| malformed(e.to_string()))?,
        };

        if let Some(op) = ops.iter().find(|op| !op.path().starts_with('/')) {
            return Err(malformed(format!(
                "path `{}` must be a JSON pointer starting with `/`",
                op.path()
            )));
        }

        Ok(Self { source, ops })
    }

    pub fn load(path: &Path) -> Result<Self, PatchError> {
        tracing::info!(path=%path.display(), "loading patch overrides");
        let text = std::fs::read_to_string(path).map_err(|e| PatchError::MalformedPatch {
            file: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text, Some(path.to_path_buf()))
    }

    pub fn apply(&self, mut template: Value) -> Result<Value, PatchError> {
        for (index, op) in self.ops.iter().enumerate() {
            tracing::debug!(index, path=%op.path(), "applying patch");
            apply_op(&mut template, op).map_err(|path| PatchError::PathNotFound {
                path,
                file: display_source(&self.source),
                index,
            })?;
        }
        Ok(template)
    }
}

impl TemplateOverrider for PatchList {
    fn describe(&self) -> String {
        format!("patches from {}", display_source(&self.source))
    }

    fn override_template(&self, template: Value) -> Result<Value, OverrideError> {
        Ok(self.apply(template)?)
    }
}

impl From<&PatchOp> for json_patch::PatchOperation {
    fn from(op: &PatchOp) -> Self {
        use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
        match op.clone() {
            PatchOp::Add { path, value } => PatchOperation::Add(AddOperation { path, value }),
            PatchOp::Remove { path } => PatchOperation::Remove(RemoveOperation { path }),
            PatchOp::Replace { path, value } => {
                PatchOperation::Replace(ReplaceOperation { path, value })
            }
        }
    }
}

/// Apply one operation, returning the missing pointer on failure
///
/// `add` reports the parent pointer when the parent does not exist. Array indices must
/// be canonical (`0`, `1`, ..., no sign or leading zero) for every operation.
fn apply_op(template: &mut Value, op: &PatchOp) -> Result<(), String> {
    let path = op.path();
    let (parent_path, token) = split_pointer(path);

    match template.pointer_mut(parent_path) {
        None if matches!(op, PatchOp::Add { .. }) => return Err(parent_path.to_string()),
        None => return Err(path.to_string()),
        Some(Value::Array(_)) if token != "-" && array_index(&token).is_none() => {
            return Err(path.to_string())
        }
        // members are removed in place so the remaining keys keep their order
        Some(Value::Object(object)) if matches!(op, PatchOp::Remove { .. }) => {
            return match object.shift_remove(&token) {
                Some(_) => Ok(()),
                None => Err(path.to_string()),
            };
        }
        Some(_) => {}
    }

    let operation = json_patch::PatchOperation::from(op);
    json_patch::patch(template, std::slice::from_ref(&operation)).map_err(|e| {
        tracing::debug!(error=%e, %path, "patch operation failed");
        path.to_string()
    })
}

/// RFC 6901 array index: `0` or digits without a leading zero
fn array_index(token: &str) -> Option<usize> {
    let canonical = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    canonical.then(|| token.parse().ok()).flatten()
}

/// `/a/b~1c` → (`/a`, `b/c`)
fn split_pointer(path: &str) -> (&str, String) {
    match path.rfind('/') {
        Some(at) => (&path[..at], unescape_token(&path[at + 1..])),
        None => ("", unescape_token(path)),
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PatchError {
    #[error("malformed patch file {file}: {reason}")]
    MalformedPatch { file: String, reason: String },
    #[error("path not found: {path} (operation {index} in {file})")]
    PathNotFound {
        path: String,
        file: String,
        index: usize,
    },
}
