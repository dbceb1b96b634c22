//! collection of addon template fragments (parsed tree and path to source file)
//!
//! [AddonDocuments] tracks
//! - the source path of every fragment
//! - the normalized template tree
//!
//! in load order and assigns each fragment an index. Once added those indices are stable
//! (removal is not possible). Directory loads sort by file name so the order does not
//! depend on the file system.
use crate::value;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Top-level keys a fragment may contain
pub const SECTIONS: [&str; 9] = [
    "AWSTemplateFormatVersion",
    "Description",
    "Metadata",
    "Transform",
    "Parameters",
    "Conditions",
    "Mappings",
    "Resources",
    "Outputs",
];

/// Sections that must be mappings when present
const MAP_SECTIONS: [&str; 6] = [
    "Metadata",
    "Parameters",
    "Conditions",
    "Mappings",
    "Resources",
    "Outputs",
];

const FRAGMENT_EXTENSIONS: [&str; 3] = ["yml", "yaml", "json"];

/// Companion parameter file names, never loaded as fragments
pub const PARAMETER_FILES: [&str; 2] = ["addons.parameters.yml", "addons.parameters.yaml"];

pub type Source = Option<PathBuf>;

/// Human readable name of a source
pub fn display_source(source: &Source) -> String {
    match source {
        Some(path) => path.display().to_string(),
        None => "<inline>".to_string(),
    }
}

/// A single addon template file
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateFragment {
    pub source: Source,
    pub body: Map<String, Value>,
}

impl TemplateFragment {
    pub fn parse(text: &str, source: Source) -> Result<Self, LoadError> {
        let document = value::parse_document(text).map_err(|e| LoadError::MalformedFragment {
            file: display_source(&source),
            reason: e.to_string(),
        })?;

        Self::from_value(document, source)
    }

    pub fn from_value(document: Value, source: Source) -> Result<Self, LoadError> {
        let malformed = |reason: String| LoadError::MalformedFragment {
            file: display_source(&source),
            reason,
        };

        let Value::Object(mut body) = document else {
            return Err(malformed("document root must be a mapping".into()));
        };

        if let Some(unknown) = body.keys().find(|key| !SECTIONS.contains(&key.as_str())) {
            return Err(malformed(format!("unknown top-level section `{unknown}`")));
        }

        for section in MAP_SECTIONS {
            match body.get(section) {
                None | Some(Value::Object(_)) => {}
                // `Outputs:` with nothing below it
                Some(Value::Null) => {
                    body.shift_remove(section);
                }
                Some(_) => return Err(malformed(format!("`{section}` must be a mapping"))),
            }
        }

        let has_resources = body
            .get("Resources")
            .and_then(Value::as_object)
            .is_some_and(|resources| !resources.is_empty());
        if !has_resources {
            return Err(LoadError::MissingResources {
                file: display_source(&source),
            });
        }

        Ok(Self { source, body })
    }

    /// A mapping section such as `Resources` or `Outputs`
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.body.get(name).and_then(Value::as_object)
    }

    pub fn file(&self) -> String {
        display_source(&self.source)
    }
}

#[derive(Default, Debug)]
pub struct AddonDocuments {
    fragments: Vec<TemplateFragment>,
}

impl AddonDocuments {
    /// Inserts and indexes a fragment
    pub fn insert(&mut self, fragment: TemplateFragment) -> usize {
        self.fragments.push(fragment);
        self.fragments.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&TemplateFragment> {
        self.fragments.get(index)
    }

    pub fn fragments(&self) -> impl Iterator<Item = (usize, &TemplateFragment)> {
        self.fragments.iter().enumerate()
    }

    pub fn source_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

impl AddonDocuments {
    pub fn load_file(&mut self, file_path: &Path) -> Result<usize, LoadError> {
        tracing::info!(path=%file_path.display(), "loading addon template");

        let contents = std::fs::read_to_string(file_path).map_err(|source| LoadError::Io {
            path: file_path.to_path_buf(),
            source,
        })?;
        let fragment = TemplateFragment::parse(&contents, Some(file_path.to_path_buf()))?;

        Ok(self.insert(fragment))
    }

    /// Load every fragment of an addons directory, sorted by file name
    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let io_error = |source| LoadError::Io {
            path: dir_path.to_path_buf(),
            source,
        };

        if !dir_path.is_dir() {
            return Err(LoadError::NoFragmentsFound(dir_path.to_path_buf()));
        }

        let mut files = vec![];
        for dir_entry in std::fs::read_dir(dir_path).map_err(io_error)? {
            let dir_entry = dir_entry.map_err(io_error)?;
            if !dir_entry.file_type().map_err(io_error)?.is_file() {
                continue;
            }

            let path = dir_entry.path();
            if is_fragment_file(&path) {
                files.push(path);
            } else {
                tracing::debug!(path=%path.display(), "skipping non-template file");
            }
        }

        if files.is_empty() {
            return Err(LoadError::NoFragmentsFound(dir_path.to_path_buf()));
        }

        files.sort();
        for path in files {
            self.load_file(&path)?;
        }

        Ok(())
    }

    pub fn from_directory(dir_path: &Path) -> Result<Self, LoadError> {
        let mut documents = Self::default();
        documents.load_directory(dir_path)?;
        Ok(documents)
    }
}

fn is_fragment_file(path: &Path) -> bool {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };

    if PARAMETER_FILES.contains(&file_name) || file_name.starts_with('.') {
        return false;
    }

    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| FRAGMENT_EXTENSIONS.contains(&extension))
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("no addon templates found in {}", .0.display())]
    NoFragmentsFound(PathBuf),
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed addon template {file}: {reason}")]
    MalformedFragment { file: String, reason: String },
    #[error("addon template {file} must declare at least one entry under `Resources`")]
    MissingResources { file: String },
}

impl From<TemplateFragment> for AddonDocuments {
    fn from(value: TemplateFragment) -> Self {
        let mut documents = AddonDocuments::default();
        documents.insert(value);
        documents
    }
}

/// Utility macro to create [AddonDocuments]
///
/// Create from a single document
/// ```
/// # use cfn_addons::addon_documents;
/// addon_documents!("Resources: { Queue: { Type: AWS::SQS::Queue } }");
/// ```
///
/// Create from multiple documents (path required)
/// ```
/// # use cfn_addons::addon_documents;
/// let documents = addon_documents! {
///   "queue.yml" => "Resources: { Queue: { Type: AWS::SQS::Queue } }",
///   "topic.yml" => "Resources: { Topic: { Type: AWS::SNS::Topic } }"
/// };
/// assert_eq!(documents.source_count(), 2);
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use cfn_addons::addon_documents;
/// addon_documents!("Parameters: {}");
/// ```
#[macro_export]
macro_rules! addon_documents {
    // single document without source
    { $expr:expr } => {
        $crate::addon_documents::AddonDocuments::from(
            $crate::addon_documents::TemplateFragment::parse($expr, None).expect("fragment must parse")
        )
    };
    // multi document with sources
    { $($source:expr => $expr:expr),+ } => {{
        let mut docs = $crate::addon_documents::AddonDocuments::default();
        $(
            docs.insert(
                $crate::addon_documents::TemplateFragment::parse($expr, Some($source.into()))
                    .expect("fragment must parse"),
            );
        )+

        docs
    }};
}
