//! # cfn-addons - CloudFormation addon composition
//!
//! Compose, validate and override the addon templates of an environment or workload
//! before they are handed to CloudFormation.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `cfn-addons` works internally.
//!
//! ### Workspace layout
//!
//! ```text
//! <workspace>/
//!   addons.config.yml            optional, see [config]
//!   environments/
//!     addons/*.yml               environment scope fragments
//!     addons/addons.parameters.yml
//!     overrides/cfn.patches.yml  or overrides/override.yml
//!   <workload>/
//!     manifest.yml               `from_cfn` references
//!     addons/*.yml               workload scope fragments
//!     overrides/...
//! ```
//!
//! A [scope::Target] names the stack we compose for (`<app>-<env>` or
//! `<app>-<env>-<workload>`) and knows where its directories are.
//!
//! ### Loading files
//!
//! Every `.yml`, `.yaml` or `.json` file of an addons directory is parsed as a
//! [addon_documents::TemplateFragment]. YAML short forms like `!Ref` or `!GetAtt` are
//! normalised to their long form (see [value::parse_document]) so everything after this
//! point works on one [serde_json::Value] tree.
//!
//! [addon_documents::AddonDocuments] keeps the fragments in file name order and
//! remembers where each came from so errors can point at the file.
//!
//! ### Binding parameters
//!
//! see [parameters::bind]
//!
//! - each fragment declares `App`, `Env` (and `Name` for workloads) as `String`
//! - every other parameter needs a value in `addons.parameters.yml`
//! - the companion file may not set the reserved names or anything nobody declares
//!
//! ### Merging
//!
//! see [composite::CompositeTemplate::merge]
//!
//! Sections are unioned by logical name. A name declared twice is never resolved by
//! picking one; the merger logs every conflict it finds and reports them together.
//! Only parameters may be redeclared, and only with the same `Type`.
//!
//! ### Exports and imports
//!
//! see [exports]
//!
//! | **source**                          | **becomes**                          |
//! |-------------------------------------|--------------------------------------|
//! | `Outputs.<name>.Export.Name`        | [exports::ExportRecord]              |
//! | `Fn::ImportValue` inside addons     | [exports::ImportReference]           |
//! | manifest `from_cfn` fields          | [exports::ImportReference]           |
//!
//! Names are resolved statically where they only depend on `App`, `Env` and `Name`:
//!
//! ```yaml
//! Export:
//!   Name: !Sub ${App}-${Env}-MyTableARN   # app-test-MyTableARN
//! ```
//!
//! The [exports::ExportCatalog] is built once per invocation from the environment's
//! built-in outputs and the addons of every scope in the workspace. It is passed to
//! [exports::resolve_imports] explicitly, there is no global registry.
//!
//! ### Overrides
//!
//! see [overrides]
//!
//! The rendered template goes through at most one [overrides::TemplateOverrider]: a
//! patch list or an external command. Either way the result has to keep the required
//! parameters and at least one resource.
//!
//! ### Output
//!
//! [composer::Composer] runs all of the above and returns a [composer::Package], which
//! writes the template and its parameter file into the build directory. With `--diff`
//! the package is compared to the previously deployed template first ([diff]).
//!
//! ```
//! use cfn_addons::{addon_documents, composite::CompositeTemplate, scope::Target};
//!
//! let documents = addon_documents! {
//!     "queue.yml" => "
//! Parameters: { App: { Type: String }, Env: { Type: String } }
//! Resources: { Queue: { Type: AWS::SQS::Queue } }
//! "
//! };
//!
//! let composite = CompositeTemplate::merge(&documents).unwrap();
//! let template = composite.to_template(&Target::environment("app", "test"));
//! assert_eq!(template["Description"], "Addons for app-test");
//! ```
pub mod addon_documents;
pub mod composer;
pub mod composite;
pub mod config;
pub mod diff;
pub mod exports;
pub mod manifest;
pub mod overrides;
pub mod parameters;
pub mod scope;
mod util;
pub mod value;
mod visit;
