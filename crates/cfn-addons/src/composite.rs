//! Composition of all fragments of one scope into a single template
use crate::addon_documents::{display_source, AddonDocuments, Source};
use crate::scope::Target;
use serde_json::{Map, Value};
use std::collections::HashMap;

const DEFAULT_FORMAT_VERSION: &str = "2010-09-09";

/// Mapping sections merged by logical name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Metadata,
    Parameters,
    Conditions,
    Mappings,
    Resources,
    Outputs,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Metadata,
        Section::Parameters,
        Section::Conditions,
        Section::Mappings,
        Section::Resources,
        Section::Outputs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Metadata => "Metadata",
            Section::Parameters => "Parameters",
            Section::Conditions => "Conditions",
            Section::Mappings => "Mappings",
            Section::Resources => "Resources",
            Section::Outputs => "Outputs",
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The union of every fragment in one scope
///
/// Built fresh for every invocation; the fragments on disk stay the source of truth.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositeTemplate {
    format_version: Option<Value>,
    transforms: Vec<Value>,
    /// indexed by `Section as usize`
    sections: [Map<String, Value>; 6],
    /// which fragment contributed an entry
    origins: HashMap<(Section, String), usize>,
    sources: Vec<Source>,
}

impl CompositeTemplate {
    pub fn merge(documents: &AddonDocuments) -> Result<Self, MergeErrors> {
        let mut composite = Self::default();
        let mut e = MergeErrors::new();
        let mut format_origin: Option<usize> = None;

        for (index, fragment) in documents.fragments() {
            composite.sources.push(fragment.source.clone());

            if let Some(version) = fragment.body.get("AWSTemplateFormatVersion") {
                match format_origin {
                    None => {
                        composite.format_version = Some(version.clone());
                        format_origin = Some(index);
                    }
                    Some(origin) if composite.format_version.as_ref() != Some(version) => {
                        e.log(Issue::TemplateVersionConflict {
                            existing: composite.file(origin),
                            new: fragment.file(),
                        });
                    }
                    Some(_) => {}
                }
            }

            match fragment.body.get("Transform") {
                Some(Value::Array(transforms)) => {
                    for transform in transforms {
                        composite.add_transform(transform);
                    }
                }
                Some(transform) => composite.add_transform(transform),
                None => {}
            }

            for section in Section::ALL {
                let Some(entries) = fragment.section(section.as_str()) else {
                    continue;
                };

                for (name, value) in entries {
                    let key = (section, name.clone());
                    let Some(&existing) = composite.origins.get(&key) else {
                        composite.sections[section as usize].insert(name.clone(), value.clone());
                        composite.origins.insert(key, index);
                        continue;
                    };

                    if section == Section::Parameters {
                        let existing_type = composite.sections[section as usize]
                            .get(name)
                            .and_then(|decl| decl.get("Type"));
                        if existing_type == value.get("Type") {
                            tracing::debug!(parameter=%name, file=%fragment.file(), "identical parameter redeclared");
                            continue;
                        }

                        e.log(Issue::ParameterTypeConflict {
                            name: name.clone(),
                            existing: composite.file(existing),
                            new: fragment.file(),
                        });
                        continue;
                    }

                    tracing::debug!(%section, %name, "collision");
                    e.log(Issue::DuplicateLogicalName {
                        section,
                        name: name.clone(),
                        existing: composite.file(existing),
                        new: fragment.file(),
                    });
                }
            }
        }

        if !e.issues.is_empty() {
            return Err(e);
        }

        Ok(composite)
    }

    fn add_transform(&mut self, transform: &Value) {
        if !self.transforms.contains(transform) {
            self.transforms.push(transform.clone());
        }
    }

    fn file(&self, index: usize) -> String {
        self.sources
            .get(index)
            .map(display_source)
            .unwrap_or_else(|| display_source(&None))
    }

    pub fn section(&self, section: Section) -> &Map<String, Value> {
        &self.sections[section as usize]
    }

    pub fn count(&self, section: Section) -> usize {
        self.section(section).len()
    }

    /// The fragment that declared `name` in `section`
    pub fn origin(&self, section: Section, name: &str) -> Option<&Source> {
        self.origins
            .get(&(section, name.to_string()))
            .and_then(|index| self.sources.get(*index))
    }

    pub fn origin_file(&self, section: Section, name: &str) -> String {
        match self.origin(section, name) {
            Some(source) => display_source(source),
            None => display_source(&None),
        }
    }

    /// Render the composite as a complete template for `target`
    pub fn to_template(&self, target: &Target) -> Value {
        let mut template = Map::new();

        template.insert(
            "AWSTemplateFormatVersion".to_string(),
            self.format_version
                .clone()
                .unwrap_or_else(|| Value::String(DEFAULT_FORMAT_VERSION.to_string())),
        );
        template.insert(
            "Description".to_string(),
            Value::String(format!("Addons for {}", target.stack_name())),
        );

        match self.transforms.as_slice() {
            [] => {}
            [single] => {
                template.insert("Transform".to_string(), single.clone());
            }
            many => {
                template.insert("Transform".to_string(), Value::Array(many.to_vec()));
            }
        }

        for section in Section::ALL {
            let entries = self.section(section);
            if entries.is_empty() && section != Section::Parameters {
                continue;
            }
            template.insert(section.as_str().to_string(), Value::Object(entries.clone()));
        }

        Value::Object(template)
    }
}

#[derive(derive_new::new, Debug)]
pub struct MergeErrors {
    #[new(default)]
    issues: Vec<Issue>,
}

impl MergeErrors {
    pub fn log(&mut self, issue: Issue) {
        tracing::trace!(?issue, "issue found");
        self.issues.push(issue);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }
}

impl std::error::Error for MergeErrors {}

impl std::fmt::Display for MergeErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (n, issue) in self.issues.iter().enumerate() {
            if n > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
pub enum Issue {
    DuplicateLogicalName {
        section: Section,
        name: String,
        existing: String,
        new: String,
    },
    ParameterTypeConflict {
        name: String,
        existing: String,
        new: String,
    },
    TemplateVersionConflict {
        existing: String,
        new: String,
    },
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Issue::DuplicateLogicalName {
                section,
                name,
                existing,
                new,
            } => write!(
                f,
                "duplicate logical name `{name}` in {section}: declared in {existing} and {new}"
            ),
            Issue::ParameterTypeConflict {
                name,
                existing,
                new,
            } => write!(
                f,
                "parameter `{name}` is declared with different types in {existing} and {new}"
            ),
            Issue::TemplateVersionConflict { existing, new } => write!(
                f,
                "AWSTemplateFormatVersion of {new} does not match {existing}"
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::addon_documents;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn merge_errors_for(documents: AddonDocuments) -> MergeErrors {
        CompositeTemplate::merge(&documents).expect_err("must error")
    }

    #[test]
    fn disjoint_fragments_keep_every_entry() {
        let documents = addon_documents! {
            "table.yml" => r#"
Parameters: { App: { Type: String }, Env: { Type: String } }
Conditions: { IsProd: !Equals [!Ref Env, prod] }
Resources: { Table: { Type: AWS::DynamoDB::Table }, TableAlarm: { Type: AWS::CloudWatch::Alarm } }
Outputs: { TableName: { Value: !Ref Table } }
"#,
            "bucket.yml" => r#"
Parameters: { App: { Type: String }, Env: { Type: String } }
Mappings: { Sizes: { prod: { Gb: 10 } } }
Resources: { Bucket: { Type: AWS::S3::Bucket } }
Outputs: { BucketName: { Value: !Ref Bucket } }
"#
        };

        let composite = CompositeTemplate::merge(&documents).unwrap();
        assert_eq!(composite.count(Section::Resources), 3);
        assert_eq!(composite.count(Section::Outputs), 2);
        assert_eq!(composite.count(Section::Conditions), 1);
        assert_eq!(composite.count(Section::Mappings), 1);
        assert_eq!(composite.count(Section::Parameters), 2);
        assert_eq!(composite.origin_file(Section::Resources, "Bucket"), "bucket.yml");
    }

    #[test]
    fn duplicate_resource() {
        let errors = merge_errors_for(addon_documents! {
            "a.yml" => "Resources: { MyTable: { Type: AWS::DynamoDB::Table } }",
            "b.yml" => "Resources: { MyTable: { Type: AWS::DynamoDB::Table } }"
        });

        assert_eq!(
            errors.issues(),
            &[Issue::DuplicateLogicalName {
                section: Section::Resources,
                name: "MyTable".into(),
                existing: "a.yml".into(),
                new: "b.yml".into(),
            }]
        );
    }

    #[test]
    fn every_conflict_is_reported() {
        let errors = merge_errors_for(addon_documents! {
            "a.yml" => "Conditions: { C: true }\nResources: { R: { Type: X } }\nOutputs: { O: { Value: 1 } }",
            "b.yml" => "Conditions: { C: true }\nResources: { R2: { Type: X } }\nOutputs: { O: { Value: 1 } }"
        });

        assert_eq!(errors.issues().len(), 2);
        assert_eq!(
            errors.to_string(),
            "duplicate logical name `C` in Conditions: declared in a.yml and b.yml\n\
             duplicate logical name `O` in Outputs: declared in a.yml and b.yml"
        );
    }

    #[test]
    fn parameters_may_be_redeclared_with_the_same_type() {
        let documents = addon_documents! {
            "a.yml" => "Parameters: { App: { Type: String } }\nResources: { A: { Type: X } }",
            "b.yml" => "Parameters: { App: { Type: String, Description: app } }\nResources: { B: { Type: X } }"
        };
        let composite = CompositeTemplate::merge(&documents).unwrap();
        assert_eq!(composite.count(Section::Parameters), 1);

        let errors = merge_errors_for(addon_documents! {
            "a.yml" => "Parameters: { Size: { Type: String } }\nResources: { A: { Type: X } }",
            "b.yml" => "Parameters: { Size: { Type: Number } }\nResources: { B: { Type: X } }"
        });
        assert!(matches!(
            errors.issues(),
            [Issue::ParameterTypeConflict { name, .. }] if name == "Size"
        ));
    }

    #[test]
    fn format_version_and_transforms() {
        let errors = merge_errors_for(addon_documents! {
            "a.yml" => "AWSTemplateFormatVersion: '2010-09-09'\nResources: { A: { Type: X } }",
            "b.yml" => "AWSTemplateFormatVersion: '2099-01-01'\nResources: { B: { Type: X } }"
        });
        assert!(matches!(errors.issues(), [Issue::TemplateVersionConflict { .. }]));

        let composite = CompositeTemplate::merge(&addon_documents! {
            "a.yml" => "Transform: AWS::Serverless-2016-10-31\nResources: { A: { Type: X } }",
            "b.yml" => "Transform: [AWS::Serverless-2016-10-31]\nResources: { B: { Type: X } }"
        })
        .unwrap();
        let template = composite.to_template(&Target::environment("app", "test"));
        assert_eq!(template["Transform"], json!("AWS::Serverless-2016-10-31"));
    }

    #[test]
    fn rendered_template_shape() {
        let composite = CompositeTemplate::merge(&addon_documents!(
            "Parameters: { App: { Type: String } }\nResources: { Queue: { Type: AWS::SQS::Queue } }"
        ))
        .unwrap();

        assert_eq!(
            composite.to_template(&Target::workload("app", "test", "api")),
            json!({
                "AWSTemplateFormatVersion": "2010-09-09",
                "Description": "Addons for app-test-api",
                "Parameters": { "App": { "Type": "String" } },
                "Resources": { "Queue": { "Type": "AWS::SQS::Queue" } },
            })
        );
    }
}
