//! keel — a package manager and build driver for C++.

mod commands;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use keel_manifest::Manifest;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "keel", version, about = "A package manager and build driver for C++")]
struct Cli {
    /// Enable verbose diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new keel project
    Init {
        /// Project name
        name: String,
    },
    /// Resolve dependencies, plan the build, and run ninja
    Build {
        /// Build with the release profile
        #[arg(long)]
        release: bool,
        /// Include dev-dependencies (test builds)
        #[arg(long)]
        dev: bool,
    },
    /// Search the registry
    Search {
        /// Search terms
        query: String,
        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show the resolved dependency tree
    Tree {
        /// Include dev-dependencies
        #[arg(long)]
        dev: bool,
    },
    /// Remove build artifacts
    Clean,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            // A failed tool propagates its own exit code.
            let code = match err.downcast_ref::<keel_build::BuildError>() {
                Some(keel_build::BuildError::SubprocessFailed { code, .. }) => *code,
                _ => 1,
            };
            process::exit(code)
        }
    }
}

/// Initialized once at entry and never touched again; `RUST_LOG` wins over
/// the `-v` default.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Init { name } => {
            commands::init::run(&cwd, &name)?;
            Ok(0)
        }
        Commands::Build { release, dev } => {
            let (manifest, project_dir) = require_manifest(&cwd)?;
            commands::build::run(&project_dir, &manifest, release, dev)
        }
        Commands::Search { query, limit } => {
            commands::search::run(&query, limit)?;
            Ok(0)
        }
        Commands::Tree { dev } => {
            let (manifest, project_dir) = require_manifest(&cwd)?;
            commands::tree::run(&project_dir, &manifest, dev)?;
            Ok(0)
        }
        Commands::Clean => {
            let (_, project_dir) = require_manifest(&cwd)?;
            commands::clean::run(&project_dir)?;
            Ok(0)
        }
    }
}

/// Find `keel.toml` upward from the working directory.
fn require_manifest(cwd: &Path) -> anyhow::Result<(Manifest, PathBuf)> {
    match Manifest::find_and_load(cwd)? {
        Some((manifest, dir)) => Ok((manifest, dir)),
        None => anyhow::bail!("no keel.toml found (run `keel init` first)"),
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use keel_build::Toolchain;

    /// Full offline workflow: init → prepare a debug plan → clean.
    #[test]
    fn init_prepare_clean_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("workflow");
        commands::init::create_project(&project, "workflow").unwrap();

        let (manifest, found) = Manifest::find_and_load(&project).unwrap().unwrap();
        assert_eq!(found, project);

        let toolchain = Toolchain::with_tools("g++", "ar");
        let build_dir =
            commands::build::prepare(&project, &manifest, false, false, &toolchain).unwrap();
        assert!(build_dir.join("build.ninja").is_file());

        commands::clean::run(&project).unwrap();
        assert!(!project.join("keel-out").exists());
    }

    #[test]
    fn manifest_lookup_walks_up_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("walkup");
        commands::init::create_project(&project, "walkup").unwrap();
        let nested = project.join("src");

        let (manifest, found) = require_manifest(&nested).unwrap();
        assert_eq!(manifest.package.name, "walkup");
        assert_eq!(found, project);
    }

    #[test]
    fn missing_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = require_manifest(dir.path()).unwrap_err();
        assert!(err.to_string().contains("keel init"));
    }
}
