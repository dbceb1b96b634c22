//! Structural diff between the deployed and the newly composed template
//!
//! The comparison walks both trees (objects by key, arrays by index) and produces a
//! [Changeset] shaped like the template itself. Rendering marks each entry with
//! `+` (added), `-` (removed) or `~` (changed, or containing changes):
//!
//! ```text
//! ~ Resources:
//!   ~ Table:
//!     ~ Properties:
//!       ~ BillingMode: "PROVISIONED" -> "PAY_PER_REQUEST"
//!   + Queue: {"Type":"AWS::SQS::Queue"}
//! ```
use crate::value::{self, inline};
use indexmap::IndexMap;
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added(Value),
    Removed(Value),
    Modified { old: Value, new: Value },
    Nested(Changeset),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Changeset {
    entries: IndexMap<String, Change>,
}

impl Changeset {
    pub fn entries(&self) -> &IndexMap<String, Change> {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Change> {
        self.entries.get(key)
    }

    fn render(&self, f: &mut std::fmt::Formatter<'_>, indent: usize) -> std::fmt::Result {
        let pad = " ".repeat(indent);
        for (key, change) in &self.entries {
            match change {
                Change::Added(value) => writeln!(f, "{pad}+ {key}: {}", inline(value))?,
                Change::Removed(value) => writeln!(f, "{pad}- {key}: {}", inline(value))?,
                Change::Modified { old, new } => {
                    writeln!(f, "{pad}~ {key}: {} -> {}", inline(old), inline(new))?
                }
                Change::Nested(nested) => {
                    writeln!(f, "{pad}~ {key}:")?;
                    nested.render(f, indent + 2)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Changeset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.render(f, 0)
    }
}

/// Compare two trees, `None` when they are equal
pub fn compare(old: &Value, new: &Value) -> Option<Change> {
    match (old, new) {
        (Value::Object(old_object), Value::Object(new_object)) => {
            let mut changeset = Changeset::default();
            for (key, old_value) in old_object {
                match new_object.get(key) {
                    Some(new_value) => {
                        if let Some(change) = compare(old_value, new_value) {
                            changeset.entries.insert(key.clone(), change);
                        }
                    }
                    None => {
                        changeset
                            .entries
                            .insert(key.clone(), Change::Removed(old_value.clone()));
                    }
                }
            }
            for (key, new_value) in new_object {
                if !old_object.contains_key(key) {
                    changeset
                        .entries
                        .insert(key.clone(), Change::Added(new_value.clone()));
                }
            }
            nested(changeset)
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let mut changeset = Changeset::default();
            for index in 0..old_items.len().max(new_items.len()) {
                let change = match (old_items.get(index), new_items.get(index)) {
                    (Some(old_item), Some(new_item)) => compare(old_item, new_item),
                    (Some(old_item), None) => Some(Change::Removed(old_item.clone())),
                    (None, Some(new_item)) => Some(Change::Added(new_item.clone())),
                    (None, None) => None,
                };
                if let Some(change) = change {
                    changeset.entries.insert(format!("[{index}]"), change);
                }
            }
            nested(changeset)
        }
        _ if old == new => None,
        _ => Some(Change::Modified {
            old: old.clone(),
            new: new.clone(),
        }),
    }
}

fn nested(changeset: Changeset) -> Option<Change> {
    if changeset.is_empty() {
        None
    } else {
        Some(Change::Nested(changeset))
    }
}

/// Classification of a diff run
#[derive(Debug)]
pub enum DiffResult {
    NoDiff,
    Diff(Changeset),
    Error(DiffError),
}

impl DiffResult {
    pub fn exit_code(&self) -> i32 {
        match self {
            DiffResult::NoDiff => 0,
            DiffResult::Diff(_) => 1,
            DiffResult::Error(_) => 2,
        }
    }
}

/// Where the currently deployed template comes from
pub trait DeployedTemplateSource {
    /// `Ok(None)` when nothing has been deployed yet
    fn fetch(&self, stack: &str) -> Result<Option<String>, DiffError>;
}

/// A template previously written to disk
#[derive(Debug, Clone, derive_new::new)]
pub struct FileTemplateSource {
    path: PathBuf,
}

impl DeployedTemplateSource for FileTemplateSource {
    fn fetch(&self, stack: &str) -> Result<Option<String>, DiffError> {
        if !self.path.exists() {
            return Ok(None);
        }

        tracing::info!(path=%self.path.display(), %stack, "reading deployed template");
        std::fs::read_to_string(&self.path)
            .map(Some)
            .map_err(|e| DiffError::Fetch {
                stack: stack.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Diff `composed` against what `source` reports as deployed for `stack`
///
/// Never fails: problems obtaining or reading the deployed template are reported as
/// [DiffResult::Error].
pub fn diff_against(
    source: &dyn DeployedTemplateSource,
    stack: &str,
    composed: &Value,
) -> DiffResult {
    let deployed = match source.fetch(stack) {
        Ok(Some(text)) => text,
        Ok(None) => {
            return DiffResult::Error(DiffError::DiffUnavailable {
                stack: stack.to_string(),
            })
        }
        Err(e) => return DiffResult::Error(e),
    };

    let deployed = match value::parse_document(&deployed) {
        Ok(deployed @ Value::Object(_)) => deployed,
        Ok(_) => {
            return DiffResult::Error(DiffError::Unparsable {
                stack: stack.to_string(),
                reason: "template root is not a mapping".into(),
            })
        }
        Err(e) => {
            return DiffResult::Error(DiffError::Unparsable {
                stack: stack.to_string(),
                reason: e.to_string(),
            })
        }
    };

    match compare(&deployed, composed) {
        None => DiffResult::NoDiff,
        Some(Change::Nested(changeset)) => DiffResult::Diff(changeset),
        Some(change) => {
            let mut changeset = Changeset::default();
            changeset.entries.insert("(template)".to_string(), change);
            DiffResult::Diff(changeset)
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DiffError {
    #[error("no deployed template found for stack {stack}")]
    DiffUnavailable { stack: String },
    #[error("failed to fetch the deployed template of {stack}: {reason}")]
    Fetch { stack: String, reason: String },
    #[error("deployed template of {stack} cannot be read: {reason}")]
    Unparsable { stack: String, reason: String },
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixed(Option<&'static str>);

    impl DeployedTemplateSource for Fixed {
        fn fetch(&self, _stack: &str) -> Result<Option<String>, DiffError> {
            Ok(self.0.map(String::from))
        }
    }

    #[test]
    fn identical_templates() {
        let template = json!({ "Resources": { "Queue": { "Type": "AWS::SQS::Queue" } } });
        let source = Fixed(Some("Resources:\n  Queue:\n    Type: AWS::SQS::Queue\n"));

        let result = diff_against(&source, "app-test", &template);
        assert!(matches!(result, DiffResult::NoDiff));
        assert_eq!(result.exit_code(), 0);
    }

    #[test]
    fn short_forms_compare_equal_to_long_forms() {
        let template = json!({ "Outputs": { "Name": { "Value": { "Ref": "Queue" } } } });
        let source = Fixed(Some("Outputs:\n  Name:\n    Value: !Ref Queue\n"));
        assert!(matches!(
            diff_against(&source, "app-test", &template),
            DiffResult::NoDiff
        ));
    }

    #[test]
    fn changes_mirror_the_template_shape() {
        let old = json!({
            "Resources": {
                "Table": { "Properties": { "BillingMode": "PROVISIONED", "Tags": ["a"] } },
                "Topic": { "Type": "AWS::SNS::Topic" }
            }
        });
        let new = json!({
            "Resources": {
                "Table": { "Properties": { "BillingMode": "PAY_PER_REQUEST", "Tags": ["a", "b"] } },
                "Queue": { "Type": "AWS::SQS::Queue" }
            }
        });

        let Some(Change::Nested(changeset)) = compare(&old, &new) else {
            panic!("expected nested changes");
        };

        assert_eq!(
            changeset.to_string(),
            "~ Resources:\n\
             \x20 ~ Table:\n\
             \x20   ~ Properties:\n\
             \x20     ~ BillingMode: \"PROVISIONED\" -> \"PAY_PER_REQUEST\"\n\
             \x20     ~ Tags:\n\
             \x20       + [1]: \"b\"\n\
             \x20 - Topic: {\"Type\":\"AWS::SNS::Topic\"}\n\
             \x20 + Queue: {\"Type\":\"AWS::SQS::Queue\"}\n"
        );
    }

    #[test]
    fn diffing_is_idempotent() {
        let source = Fixed(Some("Resources: { A: { Type: X } }"));
        let template = json!({ "Resources": { "A": { "Type": "Y" } } });

        let (DiffResult::Diff(first), DiffResult::Diff(second)) = (
            diff_against(&source, "s", &template),
            diff_against(&source, "s", &template),
        ) else {
            panic!("expected a diff twice");
        };
        assert_eq!(first, second);
    }

    #[test]
    fn missing_deployed_template_is_an_error_result() {
        let result = diff_against(&Fixed(None), "app-test", &json!({}));
        assert!(matches!(
            result,
            DiffResult::Error(DiffError::DiffUnavailable { .. })
        ));
        assert_eq!(result.exit_code(), 2);
    }

    #[test]
    fn unparsable_deployed_template() {
        let result = diff_against(&Fixed(Some("- just\n- a list")), "app-test", &json!({}));
        assert!(matches!(result, DiffResult::Error(DiffError::Unparsable { .. })));
    }
}
