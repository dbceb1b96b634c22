//! The composition pipeline
//!
//! [Composer::compose] runs every step for one [Target] and returns a [Package]:
//!
//! 1. load the fragments of the scope's `addons/` directory
//! 2. bind their parameters against `addons.parameters.yml`
//! 3. merge them into a [CompositeTemplate]
//! 4. build the [ExportCatalog] of the environment and check every import against it
//! 5. render the template and run the scope's override, if any
//!
//! Nothing is written until [Package::write_to] is called.
use crate::addon_documents::{AddonDocuments, LoadError};
use crate::composite::{CompositeTemplate, MergeErrors};
use crate::config::ComposeConfig;
use crate::exports::{
    exports_of, imports_of, resolve_imports, ExportCatalog, Resolution, ResolveError,
};
use crate::manifest::{self, ManifestError};
use crate::overrides::{apply_override, OverrideConfig, OverrideError, TemplateOverrider};
use crate::parameters::{bind, BindError, BoundParameters, CompanionParameters};
use crate::scope::{Target, ENVIRONMENTS_DIR};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const BUILD_DIR: &str = ".build";

#[derive(Debug, Clone, derive_new::new)]
pub struct Composer {
    workspace: PathBuf,
    config: ComposeConfig,
}

impl Composer {
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    /// Compose with the override configured in the scope's `overrides/` directory
    pub fn compose(&self, target: &Target) -> Result<Package, ComposeError> {
        let overrides = OverrideConfig::detect(&target.overrides_dir(&self.workspace))
            .map_err(|e| ComposeError::new(target, e))?;
        self.compose_with(target, overrides.overrider())
    }

    /// Compose with an explicit overrider, `None` skips overriding
    pub fn compose_with(
        &self,
        target: &Target,
        overrider: Option<&dyn TemplateOverrider>,
    ) -> Result<Package, ComposeError> {
        let error = |kind: ComposeErrorKind| ComposeError::new(target, kind);
        tracing::info!(%target, "composing addons");

        let addons_dir = target.addons_dir(&self.workspace);
        let documents =
            AddonDocuments::from_directory(&addons_dir).map_err(|e| error(e.into()))?;
        let companion = CompanionParameters::load(&addons_dir).map_err(|e| error(e.into()))?;
        let parameters = bind(&documents, &companion, target).map_err(|e| error(e.into()))?;

        let composite = CompositeTemplate::merge(&documents).map_err(|e| error(e.into()))?;
        let catalog = self.export_catalog(target, &composite)?;

        let mut imports = imports_of(&composite, target);
        if let Some(manifest_path) = target.manifest_path(&self.workspace) {
            if manifest_path.is_file() {
                imports.extend(
                    manifest::load_imports(&manifest_path, target).map_err(|e| error(e.into()))?,
                );
            }
        }
        let resolution = resolve_imports(&catalog, &imports, &self.config.imports, target)
            .map_err(|e| error(e.into()))?;
        tracing::debug!(
            matched = resolution.matched.len(),
            external = resolution.external.len(),
            unverifiable = resolution.unverifiable.len(),
            "imports resolved"
        );

        let template = apply_override(composite.to_template(target), overrider, target.scope())
            .map_err(|e| error(e.into()))?;

        Ok(Package {
            target: target.clone(),
            template,
            parameters,
            resolution,
        })
    }

    /// Every export of the environment: the built-in outputs, the environment addons,
    /// every workload's addons and `composite` itself
    ///
    /// Workload exports are registered for an environment target as well so duplicates
    /// are caught, [resolve_imports] refuses to match them.
    pub fn export_catalog(
        &self,
        target: &Target,
        composite: &CompositeTemplate,
    ) -> Result<ExportCatalog, ComposeError> {
        let error = |kind: ComposeErrorKind| ComposeError::new(target, kind);
        let policy = &self.config.exports;
        let environment = target.environment_target();

        let mut catalog =
            ExportCatalog::with_environment_exports(&environment, &policy.environment);

        if target.workload.is_some() {
            match self.composite_of(&environment) {
                Ok(Some(environment_composite)) => {
                    let records = exports_of(&environment_composite, &environment, policy)
                        .map_err(|e| error(e.into()))?;
                    catalog.register_all(records).map_err(|e| error(e.into()))?;
                }
                Ok(None) => tracing::debug!("environment has no addons"),
                Err(kind) => return Err(error(kind)),
            }
        }

        for name in self.workload_names().map_err(error)? {
            if target.workload.as_deref() == Some(name.as_str()) {
                continue;
            }

            let sibling = Target::workload(&target.app, &target.env, &name);
            let records = match self.composite_of(&sibling) {
                Ok(Some(composite)) => {
                    exports_of(&composite, &sibling, policy).map_err(ComposeErrorKind::from)
                }
                Ok(None) => Ok(vec![]),
                Err(e) => Err(e),
            };
            let records = match records {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(workload=%name, error=%e, "skipping workload whose addons do not compose");
                    continue;
                }
            };
            catalog.register_all(records).map_err(|e| error(e.into()))?;
        }

        let own = exports_of(composite, target, policy).map_err(|e| error(e.into()))?;
        catalog.register_all(own).map_err(|e| error(e.into()))?;

        Ok(catalog)
    }

    /// Merge the addons of another scope, `None` when it has no addons
    fn composite_of(&self, target: &Target) -> Result<Option<CompositeTemplate>, ComposeErrorKind> {
        let documents = match AddonDocuments::from_directory(&target.addons_dir(&self.workspace)) {
            Ok(documents) => documents,
            Err(LoadError::NoFragmentsFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(CompositeTemplate::merge(&documents)?))
    }

    /// Directories of the workspace that carry workload addons, sorted
    fn workload_names(&self) -> Result<Vec<String>, ComposeErrorKind> {
        let io_error = |source| ComposeErrorKind::Io {
            path: self.workspace.clone(),
            source,
        };

        let mut names = vec![];
        for entry in std::fs::read_dir(&self.workspace).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            if !entry.file_type().map_err(io_error)?.is_dir() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if name == ENVIRONMENTS_DIR || name.starts_with('.') {
                continue;
            }

            if entry.path().join(crate::scope::ADDONS_DIR).is_dir() {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemplateFormat {
    #[default]
    Yaml,
    Json,
}

impl TemplateFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TemplateFormat::Yaml => "yml",
            TemplateFormat::Json => "json",
        }
    }

    pub fn render(&self, value: &Value) -> Result<String, String> {
        match self {
            TemplateFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            TemplateFormat::Json => serde_json::to_string_pretty(value)
                .map(|json| json + "\n")
                .map_err(|e| e.to_string()),
        }
    }
}

/// A composed, override-applied template and its parameter values
#[derive(Debug, Clone)]
pub struct Package {
    pub target: Target,
    pub template: Value,
    pub parameters: BoundParameters,
    pub resolution: Resolution,
}

/// Paths written by [Package::write_to]
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    pub template: PathBuf,
    pub parameters: PathBuf,
}

impl Package {
    pub fn template_file_name(target: &Target, format: TemplateFormat) -> String {
        format!("{}.addons.stack.{}", target.stack_name(), format.extension())
    }

    pub fn parameters_file_name(target: &Target) -> String {
        format!("{}.addons.params.json", target.stack_name())
    }

    pub fn write_to(&self, build_dir: &Path, format: TemplateFormat) -> Result<Artifacts, ComposeError> {
        let error = |kind: ComposeErrorKind| ComposeError::new(&self.target, kind);

        std::fs::create_dir_all(build_dir).map_err(|source| {
            error(ComposeErrorKind::Io {
                path: build_dir.to_path_buf(),
                source,
            })
        })?;

        let artifacts = Artifacts {
            template: build_dir.join(Self::template_file_name(&self.target, format)),
            parameters: build_dir.join(Self::parameters_file_name(&self.target)),
        };

        for (path, value, format) in [
            (&artifacts.template, &self.template, format),
            (
                &artifacts.parameters,
                &self.parameters.to_parameter_file(),
                TemplateFormat::Json,
            ),
        ] {
            let text = format.render(value).map_err(|reason| {
                error(ComposeErrorKind::Render {
                    path: path.clone(),
                    reason,
                })
            })?;

            tracing::info!(path=%path.display(), "writing");
            std::fs::write(path, text).map_err(|source| {
                error(ComposeErrorKind::Io {
                    path: path.clone(),
                    source,
                })
            })?;
        }

        Ok(artifacts)
    }
}

#[derive(thiserror::Error, Debug)]
#[error("failed to compose addons for {target}")]
pub struct ComposeError {
    pub target: Target,
    #[source]
    pub kind: ComposeErrorKind,
}

impl ComposeError {
    pub fn new(target: &Target, kind: impl Into<ComposeErrorKind>) -> Self {
        Self {
            target: target.clone(),
            kind: kind.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ComposeErrorKind {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error(transparent)]
    Merge(#[from] MergeErrors),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Override(#[from] OverrideError),
    #[error("failed to access {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render {}: {reason}", .path.display())]
    Render { path: PathBuf, reason: String },
}
