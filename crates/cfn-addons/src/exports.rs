//! Cross-stack exports and imports
//!
//! Outputs with an `Export.Name` are collected into an [ExportCatalog]. The catalog is
//! built once per invocation and passed explicitly to [resolve_imports], which matches
//! every [ImportReference] (manifest `from_cfn` fields and addon `Fn::ImportValue`
//! calls) against it before any template is handed to CloudFormation.
//!
//! Names are resolved statically where possible (see [crate::util::StaticNames]).
//! A name that depends on a value only known at deploy time is kept as a deferred
//! expression together with its static shape. Imports of such names cannot be verified,
//! and neither can imports that only a deferred export could satisfy.
use crate::composite::{CompositeTemplate, Section};
use crate::config::ExportPolicy;
use crate::scope::{AddonScope, Target};
use crate::util::{ImportCollector, StaticNames};
use crate::value::{escape_token, inline};
use crate::visit::VisitIntrinsics;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExportName {
    /// Fully known before deployment
    Literal(String),
    /// Depends on a runtime value
    Deferred {
        /// Rendered expression
        expression: String,
        pattern: Option<NamePattern>,
    },
}

impl ExportName {
    pub(crate) fn resolve(expression: &Value, target: &Target) -> Self {
        let names = StaticNames::new(target);
        match names.resolve(expression) {
            Some(name) => ExportName::Literal(name),
            None => ExportName::Deferred {
                expression: inline(expression),
                pattern: names.pattern(expression),
            },
        }
    }

    pub fn literal(&self) -> Option<&str> {
        match self {
            ExportName::Literal(name) => Some(name),
            ExportName::Deferred { .. } => None,
        }
    }

    /// Whether a deferred name could turn out to be `name` at deploy time
    pub fn may_be(&self, name: &str) -> bool {
        match self {
            ExportName::Literal(_) => false,
            ExportName::Deferred { pattern, .. } => {
                pattern.as_ref().is_some_and(|pattern| pattern.matches(name))
            }
        }
    }
}

impl std::fmt::Display for ExportName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportName::Literal(name) => f.write_str(name),
            ExportName::Deferred { expression, .. } => write!(f, "<deferred {expression}>"),
        }
    }
}

/// Literal text and wildcards, each wildcard standing for at least one character
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NamePattern {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Wildcard,
}

impl NamePattern {
    pub(crate) fn push_literal(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.segments.last_mut() {
            Some(Segment::Literal(last)) => last.push_str(text),
            _ => self.segments.push(Segment::Literal(text.to_string())),
        }
    }

    pub(crate) fn push_wildcard(&mut self) {
        if self.segments.last() != Some(&Segment::Wildcard) {
            self.segments.push(Segment::Wildcard);
        }
    }

    pub(crate) fn has_literal(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Literal(_)))
    }

    pub fn matches(&self, name: &str) -> bool {
        fn matches_from(segments: &[Segment], name: &str) -> bool {
            match segments.split_first() {
                None => name.is_empty(),
                Some((Segment::Literal(text), rest)) => name
                    .strip_prefix(text.as_str())
                    .is_some_and(|name| matches_from(rest, name)),
                Some((Segment::Wildcard, rest)) => (1..=name.len())
                    .filter(|at| name.is_char_boundary(*at))
                    .any(|at| matches_from(rest, &name[at..])),
            }
        }
        matches_from(&self.segments, name)
    }
}

impl std::fmt::Display for NamePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::Wildcard => f.write_str("*")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct ExportRecord {
    pub name: ExportName,
    pub scope: AddonScope,
    /// Stack that owns the export
    pub stack: String,
    /// Logical name of the output
    pub output: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportSource {
    /// A `from_cfn` field of a workload manifest, as a dotted path
    ManifestField { file: String, field: String },
    /// An `Fn::ImportValue` inside an addon template
    AddonTemplate { file: String, pointer: String },
}

impl std::fmt::Display for ImportSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportSource::ManifestField { file, field } => write!(f, "{file} ({field})"),
            ImportSource::AddonTemplate { file, pointer } => write!(f, "{file} ({pointer})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, derive_new::new)]
pub struct ImportReference {
    pub name: ExportName,
    pub source: ImportSource,
    /// Stack the import is deployed in
    pub stack: String,
}

/// Every export known during one invocation
#[derive(Debug, Default)]
pub struct ExportCatalog {
    records: Vec<ExportRecord>,
    by_name: HashMap<String, usize>,
}

impl ExportCatalog {
    /// Exports the generated environment stack always provides
    pub fn with_environment_exports(environment: &Target, suffixes: &[String]) -> Self {
        let mut catalog = Self::default();
        for suffix in suffixes {
            let name = format!("{}{}", environment.export_prefix(), suffix);
            // repeated suffixes are ignored
            let _ = catalog.register(ExportRecord::new(
                ExportName::Literal(name),
                AddonScope::Environment,
                environment.stack_name(),
                suffix.clone(),
                Value::Null,
            ));
        }
        catalog
    }

    pub fn register(&mut self, record: ExportRecord) -> Result<(), ResolveError> {
        if let ExportName::Literal(name) = &record.name {
            if let Some(existing) = self.by_name.get(name) {
                return Err(ResolveError::DuplicateExport {
                    name: name.clone(),
                    first: self.records[*existing].stack.clone(),
                    second: record.stack,
                });
            }
            self.by_name.insert(name.clone(), self.records.len());
        }

        tracing::debug!(name=%record.name, stack=%record.stack, "export registered");
        self.records.push(record);
        Ok(())
    }

    pub fn register_all(&mut self, records: Vec<ExportRecord>) -> Result<(), ResolveError> {
        for record in records {
            self.register(record)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ExportRecord> {
        self.by_name.get(name).map(|index| &self.records[*index])
    }

    pub fn records(&self) -> impl Iterator<Item = &ExportRecord> {
        self.records.iter()
    }

    pub fn deferred(&self) -> impl Iterator<Item = &ExportRecord> {
        self.records
            .iter()
            .filter(|record| matches!(record.name, ExportName::Deferred { .. }))
    }

    /// Deferred exports whose name could be `name` once deployed
    pub fn deferred_candidates<'c>(
        &'c self,
        name: &'c str,
    ) -> impl Iterator<Item = &'c ExportRecord> + 'c {
        self.deferred().filter(move |record| record.name.may_be(name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Export declarations of a composite's `Outputs`
pub fn exports_of(
    composite: &CompositeTemplate,
    target: &Target,
    policy: &ExportPolicy,
) -> Result<Vec<ExportRecord>, ResolveError> {
    let mut records = vec![];
    let prefix = target.export_prefix();

    for (output, declaration) in composite.section(Section::Outputs) {
        let Some(export) = declaration.get("Export") else {
            continue;
        };

        let Some(name) = export.get("Name") else {
            return Err(ResolveError::MalformedExport {
                file: composite.origin_file(Section::Outputs, output),
                output: output.clone(),
            });
        };

        let name = ExportName::resolve(name, target);
        if let ExportName::Literal(literal) = &name {
            if policy.require_namespace && !literal.starts_with(&prefix) {
                return Err(ResolveError::UnnamespacedExport {
                    name: literal.clone(),
                    file: composite.origin_file(Section::Outputs, output),
                    output: output.clone(),
                    prefix,
                });
            }
        } else {
            tracing::debug!(%output, %name, "export name deferred to deploy time");
        }

        records.push(ExportRecord::new(
            name,
            target.scope(),
            target.stack_name(),
            output.clone(),
            declaration.get("Value").cloned().unwrap_or(Value::Null),
        ));
    }

    Ok(records)
}

/// `Fn::ImportValue` calls inside a composite
pub fn imports_of(composite: &CompositeTemplate, target: &Target) -> Vec<ImportReference> {
    let mut references = vec![];

    for section in [Section::Conditions, Section::Resources, Section::Outputs] {
        for (logical_name, entry) in composite.section(section) {
            let mut collector = ImportCollector::new();
            let pointer = format!("/{}/{}", section, escape_token(logical_name));
            entry.visit_intrinsics(&pointer, &mut collector);

            for (pointer, argument) in collector.found {
                references.push(ImportReference::new(
                    ExportName::resolve(&argument, target),
                    ImportSource::AddonTemplate {
                        file: composite.origin_file(section, logical_name),
                        pointer,
                    },
                    target.stack_name(),
                ));
            }
        }
    }

    references
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Unmatched imports fail unless allow-listed
    #[default]
    Strict,
    /// Unmatched imports outside the environment's namespace are assumed external
    Lenient,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportPolicy {
    pub mode: ImportMode,
    /// Exports owned by stacks outside the workspace, a trailing `*` matches a prefix
    pub allow: Vec<String>,
}

impl ImportPolicy {
    pub fn allows(&self, name: &str) -> bool {
        self.allow.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == pattern,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImport {
    pub reference: ImportReference,
    pub exporting_stack: String,
}

/// Outcome of a successful [resolve_imports]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub matched: Vec<ResolvedImport>,
    /// Assumed to be exported by a stack this tool does not manage
    pub external: Vec<ImportReference>,
    /// Names that are only known at deploy time
    pub unverifiable: Vec<ImportReference>,
}

/// Match imports against the catalog
///
/// Environment addons deploy before any workload, so they may only import exports of the
/// environment itself or of stacks outside the workspace. An import that no static export
/// matches but a deferred one might is reported as unverifiable.
///
/// Pure: resolving the same imports against the same catalog twice gives the same result.
pub fn resolve_imports(
    catalog: &ExportCatalog,
    imports: &[ImportReference],
    policy: &ImportPolicy,
    target: &Target,
) -> Result<Resolution, ResolveError> {
    let mut resolution = Resolution::default();
    let namespace = target.export_prefix();

    for import in imports {
        let ExportName::Literal(name) = &import.name else {
            tracing::warn!(name=%import.name, source=%import.source, "import cannot be verified before deployment");
            resolution.unverifiable.push(import.clone());
            continue;
        };

        if let Some(record) = catalog.get(name) {
            if record.stack == import.stack {
                return Err(ResolveError::SelfImport {
                    name: name.clone(),
                    consumer: import.source.clone(),
                    stack: record.stack.clone(),
                });
            }
            if !importable(record, target) {
                return Err(ResolveError::ReverseScopeImport {
                    name: name.clone(),
                    consumer: import.source.clone(),
                    stack: record.stack.clone(),
                });
            }

            resolution.matched.push(ResolvedImport {
                reference: import.clone(),
                exporting_stack: record.stack.clone(),
            });
            continue;
        }

        let candidates: Vec<_> = catalog
            .deferred_candidates(name)
            .filter(|record| record.stack != import.stack && importable(record, target))
            .map(|record| format!("{} ({})", record.output, record.stack))
            .collect();
        if !candidates.is_empty() {
            tracing::warn!(
                %name,
                source=%import.source,
                candidates=%candidates.join(", "),
                "import may match an export named at deploy time, cannot be verified"
            );
            resolution.unverifiable.push(import.clone());
            continue;
        }

        let external = policy.allows(name)
            || (policy.mode == ImportMode::Lenient && !name.starts_with(&namespace));
        if !external {
            return Err(ResolveError::UnresolvedImport {
                name: name.clone(),
                consumer: import.source.clone(),
            });
        }

        tracing::warn!(%name, source=%import.source, "import not exported by any known stack, assuming external");
        resolution.external.push(import.clone());
    }

    Ok(resolution)
}

/// Workload exports are never importable by the environment
fn importable(record: &ExportRecord, target: &Target) -> bool {
    !(target.scope() == AddonScope::Environment && record.scope == AddonScope::Workload)
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("output `{output}` in {file} has an `Export` without `Name`")]
    MalformedExport { file: String, output: String },
    #[error("export `{name}` is declared by both {first} and {second}")]
    DuplicateExport {
        name: String,
        first: String,
        second: String,
    },
    #[error("export `{name}` of output `{output}` in {file} must start with `{prefix}`")]
    UnnamespacedExport {
        name: String,
        file: String,
        output: String,
        prefix: String,
    },
    #[error("no stack exports `{name}`, imported by {consumer}")]
    UnresolvedImport { name: String, consumer: ImportSource },
    #[error("`{name}` imported by {consumer} is exported by the same stack {stack}")]
    SelfImport {
        name: String,
        consumer: ImportSource,
        stack: String,
    },
    #[error("`{name}` imported by environment addon {consumer} is exported by workload stack {stack}, which deploys after the environment")]
    ReverseScopeImport {
        name: String,
        consumer: ImportSource,
        stack: String,
    },
}
