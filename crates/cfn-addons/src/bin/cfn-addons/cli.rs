//! cfn-addons cli interface

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; cfn-addons ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Addons of an environment (environments/addons)
    Env(ScopeCommand),

    /// Addons of a workload (<name>/addons)
    #[command(alias = "svc")]
    Workload(ScopeCommand),

    /// Print debug information for development
    Dev(DevCommand),
}

#[derive(Parser, Debug)]
pub struct ScopeCommand {
    #[command(subcommand)]
    pub action: ScopeAction,
}

#[derive(Subcommand, Debug)]
pub enum ScopeAction {
    /// Compose, validate and write the addons template
    Package(PackageCommand),

    /// Create an empty patch file in the scope's overrides directory
    Override(OverrideCommand),
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Application name
    #[clap(long)]
    pub app: String,

    /// Environment name
    #[clap(long)]
    pub env: String,

    /// Workload name (workload scope only)
    #[clap(short = 'n', long)]
    pub name: Option<String>,
}

#[derive(Parser, Debug)]
pub struct PackageCommand {
    #[clap(flatten)]
    pub target: TargetArgs,

    #[clap(flatten)]
    pub imports: ImportArgs,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Compare with the deployed template before writing
    ///
    /// Exits with 0 when nothing changed, 1 when there are changes and 2 when the
    /// comparison could not be made.
    #[clap(long)]
    pub diff: bool,

    /// Deployed template to compare with
    ///
    /// Defaults to the template of the previous package in the build directory.
    #[clap(long, requires("diff"))]
    pub deployed_template: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Fail on every import no known stack exports
    #[clap(long, conflicts_with("lenient_imports"))]
    pub strict_imports: bool,

    /// Only fail on unknown imports inside the environment's namespace
    #[clap(long)]
    pub lenient_imports: bool,

    /// Export name owned by a stack outside the workspace (`*` suffix matches a prefix)
    #[clap(long = "allow-import")]
    pub allow: Vec<String>,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,

    /// Where to write the template and parameter file [default: .build]
    #[clap(long)]
    pub build_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

impl From<OutputFormat> for cfn_addons::composer::TemplateFormat {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::Json => cfn_addons::composer::TemplateFormat::Json,
            OutputFormat::Yaml => cfn_addons::composer::TemplateFormat::Yaml,
        }
    }
}

#[derive(Parser, Debug)]
pub struct OverrideCommand {
    /// Workload name (workload scope only)
    #[clap(short = 'n', long)]
    pub name: Option<String>,
}

#[derive(Parser, Debug)]
pub struct DevCommand {
    #[command(subcommand)]
    pub command: DevSubCommand,
}

#[derive(Subcommand, Debug)]
pub enum DevSubCommand {
    /// Loaded fragments of a scope
    Documents(TargetArgs),
    /// Export catalog as seen from a scope
    Exports(TargetArgs),
}
