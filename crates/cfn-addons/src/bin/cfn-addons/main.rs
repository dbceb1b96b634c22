mod cli;

use anyhow::Context;
use cfn_addons::composer::{Composer, Package, TemplateFormat, BUILD_DIR};
use cfn_addons::config::ComposeConfig;
use cfn_addons::diff::{diff_against, DiffResult, FileTemplateSource};
use cfn_addons::exports::ImportMode;
use cfn_addons::scope::{AddonScope, Target, ENVIRONMENTS_DIR, OVERRIDES_DIR};
use std::path::PathBuf;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("CFN_ADDONS_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Env(scope_cli) => scope(AddonScope::Environment, scope_cli),
        cli::Command::Workload(scope_cli) => scope(AddonScope::Workload, scope_cli),
        cli::Command::Dev(dev_cli) => dev(dev_cli).map(|()| 0),
    };

    match command_result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            for error in e.chain() {
                eprintln!("{error}")
            }
            std::process::exit(1);
        }
    }
}

fn scope(scope: AddonScope, cli: cli::ScopeCommand) -> anyhow::Result<i32> {
    match cli.action {
        cli::ScopeAction::Package(package_cli) => package(scope, package_cli),
        cli::ScopeAction::Override(override_cli) => {
            scaffold_override(scope, override_cli).map(|()| 0)
        }
    }
}

fn target(scope: AddonScope, args: &cli::TargetArgs) -> anyhow::Result<Target> {
    match (scope, &args.name) {
        (AddonScope::Environment, None) => Ok(Target::environment(&args.app, &args.env)),
        (AddonScope::Workload, Some(name)) => Ok(Target::workload(&args.app, &args.env, name)),
        (AddonScope::Environment, Some(_)) => {
            anyhow::bail!("--name is only valid for workload addons")
        }
        (AddonScope::Workload, None) => anyhow::bail!("workload addons require --name"),
    }
}

fn composer(imports: Option<&cli::ImportArgs>) -> anyhow::Result<Composer> {
    let workspace = std::env::current_dir()?;
    let mut config = ComposeConfig::load(&workspace)?;

    if let Some(imports) = imports {
        if imports.strict_imports {
            config.imports.mode = ImportMode::Strict;
        }
        if imports.lenient_imports {
            config.imports.mode = ImportMode::Lenient;
        }
        config.imports.allow.extend(imports.allow.iter().cloned());
    }

    Ok(Composer::new(workspace, config))
}

/// Compose and write the addons template of one stack
///
/// Returns the process exit code: always 0 without `--diff`, otherwise the code of the
/// diff classification.
pub fn package(scope: AddonScope, cli: cli::PackageCommand) -> anyhow::Result<i32> {
    let target = target(scope, &cli.target)?;
    let composer = composer(Some(&cli.imports))?;
    let format = TemplateFormat::from(cli.output.format);
    let build_dir = cli
        .output
        .build_dir
        .unwrap_or_else(|| composer.workspace().join(BUILD_DIR));

    let package = composer.compose(&target)?;

    let mut exit_code = 0;
    if cli.diff {
        let deployed = cli
            .deployed_template
            .unwrap_or_else(|| build_dir.join(Package::template_file_name(&target, format)));
        let result = diff_against(
            &FileTemplateSource::new(deployed),
            &target.stack_name(),
            &package.template,
        );

        match &result {
            DiffResult::NoDiff => eprintln!("No changes for {}", target.stack_name()),
            DiffResult::Diff(changeset) => print!("{changeset}"),
            DiffResult::Error(e) => eprintln!("{e}"),
        }
        exit_code = result.exit_code();
    }

    let artifacts = package
        .write_to(&build_dir, format)
        .with_context(|| format!("writing package to {}", build_dir.display()))?;
    eprintln!("Wrote {}", artifacts.template.display());
    eprintln!("Wrote {}", artifacts.parameters.display());

    Ok(exit_code)
}

fn scaffold_override(scope: AddonScope, cli: cli::OverrideCommand) -> anyhow::Result<()> {
    let scope_dir = match (scope, cli.name) {
        (AddonScope::Environment, None) => PathBuf::from(ENVIRONMENTS_DIR),
        (AddonScope::Workload, Some(name)) => PathBuf::from(name),
        (AddonScope::Environment, Some(_)) => {
            anyhow::bail!("--name is only valid for workload addons")
        }
        (AddonScope::Workload, None) => anyhow::bail!("workload addons require --name"),
    };

    let path = cfn_addons::overrides::scaffold_patches(&scope_dir.join(OVERRIDES_DIR))?;
    eprintln!("Created {}", path.display());
    Ok(())
}

/// (cfn-addons-)developer utilities
///
/// A quick way to expose internal structures for debugging purposes
pub fn dev(cli: cli::DevCommand) -> anyhow::Result<()> {
    use cfn_addons::addon_documents::AddonDocuments;
    use cfn_addons::composite::CompositeTemplate;
    use cli::DevSubCommand::*;

    let composer = composer(None)?;

    match cli.command {
        Documents(args) => {
            let target = target_from_args(&args);
            let documents =
                AddonDocuments::from_directory(&target.addons_dir(composer.workspace()))?;
            println!("{documents:#?}");
        }
        Exports(args) => {
            let target = target_from_args(&args);
            let documents =
                AddonDocuments::from_directory(&target.addons_dir(composer.workspace()))?;
            let composite = CompositeTemplate::merge(&documents)?;
            let catalog = composer.export_catalog(&target, &composite)?;

            for record in catalog.records() {
                println!("{}\t{}\t{}", record.name, record.stack, record.output);
            }
        }
    }

    Ok(())
}

fn target_from_args(args: &cli::TargetArgs) -> Target {
    match &args.name {
        Some(name) => Target::workload(&args.app, &args.env, name),
        None => Target::environment(&args.app, &args.env),
    }
}
