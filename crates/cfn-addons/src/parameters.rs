//! Parameter binding
//!
//! Every fragment has to declare the parameters of its scope (see
//! [AddonScope::required_parameters]). Anything else it declares must be given a value
//! in the companion `addons.parameters.yml` of the same directory:
//!
//! ```yaml
//! Parameters:
//!   DiscoveryServiceArn: !GetAtt DiscoveryService.Arn
//! ```
//!
//! The values are expressions evaluated by CloudFormation in the parent stack, so they
//! are passed through untouched. Binding only checks that they are present.
use crate::addon_documents::{display_source, AddonDocuments, Source, PARAMETER_FILES};
use crate::scope::{AddonScope, Target};
use crate::value;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct ParameterDecl {
    pub name: String,
    /// The declared `Type`
    pub kind: String,
    pub default: Option<Value>,
}

/// Parameters declared by a fragment, in document order
pub fn declarations(
    parameters: Option<&Map<String, Value>>,
    file: &str,
) -> Result<Vec<ParameterDecl>, BindError> {
    let Some(parameters) = parameters else {
        return Ok(vec![]);
    };

    parameters
        .iter()
        .map(|(name, declaration)| {
            let kind = declaration
                .get("Type")
                .and_then(Value::as_str)
                .ok_or_else(|| BindError::MalformedDeclaration {
                    file: file.to_string(),
                    name: name.clone(),
                })?;

            Ok(ParameterDecl::new(
                name.clone(),
                kind.to_string(),
                declaration.get("Default").cloned(),
            ))
        })
        .collect()
}

/// Contents of `addons.parameters.yml`
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CompanionParameters {
    pub source: Source,
    pub values: IndexMap<String, Value>,
}

impl CompanionParameters {
    pub fn parse(text: &str, source: Source) -> Result<Self, BindError> {
        let malformed = |reason: String| BindError::MalformedCompanion {
            file: display_source(&source),
            reason,
        };

        let document = value::parse_document(text).map_err(|e| malformed(e.to_string()))?;
        let values = match document {
            Value::Null => IndexMap::new(),
            Value::Object(mut root) => {
                if let Some(unknown) = root.keys().find(|key| key.as_str() != "Parameters") {
                    return Err(malformed(format!("unexpected key `{unknown}`")));
                }

                match root.shift_remove("Parameters") {
                    None | Some(Value::Null) => IndexMap::new(),
                    Some(Value::Object(values)) => values.into_iter().collect(),
                    Some(_) => return Err(malformed("`Parameters` must be a mapping".into())),
                }
            }
            _ => return Err(malformed("document root must be a mapping".into())),
        };

        Ok(Self { source, values })
    }

    /// Load the companion file of an addons directory, if there is one
    pub fn load(addons_dir: &Path) -> Result<Self, BindError> {
        for file_name in PARAMETER_FILES {
            let path = addons_dir.join(file_name);
            if !path.is_file() {
                continue;
            }

            tracing::info!(path=%path.display(), "loading addon parameters");
            let text = std::fs::read_to_string(&path).map_err(|source| BindError::Io {
                path: path.clone(),
                source,
            })?;
            return Self::parse(&text, Some(path));
        }

        Ok(Self::default())
    }

    fn file(&self) -> String {
        match &self.source {
            Some(_) => display_source(&self.source),
            None => PARAMETER_FILES[0].to_string(),
        }
    }
}

/// Parameter values handed to the addons stack
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundParameters {
    values: IndexMap<String, Value>,
}

impl BoundParameters {
    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// `{ "Parameters": { ... } }` as written next to the composed template
    pub fn to_parameter_file(&self) -> Value {
        let parameters: Map<String, Value> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let mut file = Map::new();
        file.insert("Parameters".to_string(), Value::Object(parameters));
        Value::Object(file)
    }
}

/// Check every fragment's parameters against the scope and the companion file
pub fn bind(
    documents: &AddonDocuments,
    companion: &CompanionParameters,
    target: &Target,
) -> Result<BoundParameters, BindError> {
    let scope = target.scope();

    if let Some(reserved) = companion.values.keys().find(|name| scope.is_required(name)) {
        return Err(BindError::ReservedParameter {
            file: companion.file(),
            name: reserved.clone(),
        });
    }

    let mut declared = std::collections::HashSet::new();
    for (_, fragment) in documents.fragments() {
        let file = fragment.file();
        let decls = declarations(fragment.section("Parameters"), &file)?;

        for required in scope.required_parameters() {
            let Some(decl) = decls.iter().find(|decl| decl.name == *required) else {
                return Err(BindError::MissingRequiredParameter {
                    scope,
                    file,
                    name: required.to_string(),
                });
            };

            if decl.kind != "String" {
                return Err(BindError::RequiredParameterType {
                    file,
                    name: decl.name.clone(),
                    found: decl.kind.clone(),
                });
            }
        }

        for decl in decls.iter().filter(|decl| !scope.is_required(&decl.name)) {
            if !companion.values.contains_key(&decl.name) {
                return Err(BindError::UnboundParameter {
                    file,
                    name: decl.name.clone(),
                    companion: companion.file(),
                });
            }
        }

        declared.extend(decls.into_iter().map(|decl| decl.name));
    }

    if let Some(undeclared) = companion.values.keys().find(|name| !declared.contains(*name)) {
        return Err(BindError::UndeclaredParameter {
            file: companion.file(),
            name: undeclared.clone(),
        });
    }

    let mut values = IndexMap::new();
    for required in scope.required_parameters() {
        if let Some(value) = target.parameter_value(required) {
            values.insert(required.to_string(), Value::String(value.to_string()));
        }
    }
    for (name, expression) in &companion.values {
        values.insert(name.clone(), expression.clone());
    }

    tracing::debug!(parameters=?values.keys().collect::<Vec<_>>(), "parameters bound");
    Ok(BoundParameters { values })
}

#[derive(thiserror::Error, Debug)]
pub enum BindError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed parameter file {file}: {reason}")]
    MalformedCompanion { file: String, reason: String },
    #[error("parameter `{name}` in {file} has no `Type`")]
    MalformedDeclaration { file: String, name: String },
    #[error("{file} must declare the {scope} parameter `{name}`")]
    MissingRequiredParameter {
        scope: AddonScope,
        file: String,
        name: String,
    },
    #[error("parameter `{name}` in {file} must be of type String, found {found}")]
    RequiredParameterType {
        file: String,
        name: String,
        found: String,
    },
    #[error("parameter `{name}` declared in {file} has no value in {companion}")]
    UnboundParameter {
        file: String,
        name: String,
        companion: String,
    },
    #[error("parameter `{name}` in {file} is supplied by the tool and cannot be set")]
    ReservedParameter { file: String, name: String },
    #[error("parameter `{name}` in {file} is not declared by any addon template")]
    UndeclaredParameter { file: String, name: String },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::addon_documents;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const WORKLOAD_PARAMETERS: &str = r#"
Parameters:
  App: { Type: String }
  Env: { Type: String }
  Name: { Type: String }
"#;

    fn fragment(extra_parameters: &str) -> String {
        format!(
            "{WORKLOAD_PARAMETERS}{extra_parameters}\nResources:\n  Queue:\n    Type: AWS::SQS::Queue\n"
        )
    }

    fn companion(text: &str) -> CompanionParameters {
        CompanionParameters::parse(text, Some("addons.parameters.yml".into())).unwrap()
    }

    #[test]
    fn required_parameters_are_bound_from_target() {
        let documents = addon_documents!(&fragment(""));
        let bound = bind(
            &documents,
            &CompanionParameters::default(),
            &Target::workload("app", "test", "api"),
        )
        .unwrap();

        assert_eq!(
            bound.to_parameter_file(),
            json!({ "Parameters": { "App": "app", "Env": "test", "Name": "api" } })
        );
    }

    #[test]
    fn extra_parameters_need_companion_values() {
        let documents = addon_documents!(&fragment("  ServiceArn: { Type: String }"));
        let target = Target::workload("app", "test", "api");

        let err = bind(&documents, &CompanionParameters::default(), &target).unwrap_err();
        assert!(matches!(err, BindError::UnboundParameter { name, .. } if name == "ServiceArn"));

        let bound = bind(
            &documents,
            &companion("Parameters:\n  ServiceArn: !GetAtt Service.Arn"),
            &target,
        )
        .unwrap();
        assert_eq!(
            bound.get("ServiceArn"),
            Some(&json!({ "Fn::GetAtt": ["Service", "Arn"] }))
        );
    }

    #[test]
    fn missing_required_parameter() {
        let documents = addon_documents! {
            "table.yml" => "Parameters: { App: { Type: String }, Env: { Type: String } }\nResources: { T: { Type: AWS::DynamoDB::Table } }"
        };

        let err = bind(
            &documents,
            &CompanionParameters::default(),
            &Target::workload("app", "test", "api"),
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "table.yml must declare the workload parameter `Name`"
        );

        // the same fragment is complete for an environment
        assert!(bind(
            &documents,
            &CompanionParameters::default(),
            &Target::environment("app", "test"),
        )
        .is_ok());
    }

    #[test]
    fn required_parameter_must_be_string() {
        let documents = addon_documents!(
            "Parameters: { App: { Type: String }, Env: { Type: Number } }\nResources: { T: { Type: AWS::SNS::Topic } }"
        );

        let err = bind(
            &documents,
            &CompanionParameters::default(),
            &Target::environment("app", "test"),
        )
        .unwrap_err();
        assert!(matches!(err, BindError::RequiredParameterType { found, .. } if found == "Number"));
    }

    #[test]
    fn reserved_and_undeclared_companion_entries() {
        let documents = addon_documents!(&fragment(""));
        let target = Target::workload("app", "test", "api");

        let err = bind(&documents, &companion("Parameters:\n  Env: prod"), &target).unwrap_err();
        assert!(matches!(err, BindError::ReservedParameter { name, .. } if name == "Env"));

        let err = bind(&documents, &companion("Parameters:\n  Stray: 1"), &target).unwrap_err();
        assert!(matches!(err, BindError::UndeclaredParameter { name, .. } if name == "Stray"));
    }

    #[test]
    fn companion_file_shape() {
        assert!(CompanionParameters::parse("", None).unwrap().values.is_empty());

        let err = CompanionParameters::parse("Params: {}", None).unwrap_err();
        assert!(matches!(err, BindError::MalformedCompanion { .. }));
    }
}
