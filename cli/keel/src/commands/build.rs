//! `keel build` — the end-to-end driver.
//!
//! Orchestrates parse → resolve → ensure sources → plan → emit ninja, then
//! hands control to the external `ninja` and propagates its exit code.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use keel_build::planner::DEFAULT_OUT_DIR;
use keel_build::{host_triple, plan, write_atomic, BuildError, PlanOptions, Profile, Toolchain};
use keel_manifest::Manifest;
use keel_registry::{resolve, CancelToken, ResolveOptions, SourceStore};
use tracing::{debug, info};

/// Run the full build. Returns the process exit code to propagate.
pub fn run(project_dir: &Path, manifest: &Manifest, release: bool, dev: bool) -> Result<i32> {
    let toolchain = Toolchain::from_env()?;
    keel_build::toolchain::locate("ninja")?;

    let build_dir = prepare(project_dir, manifest, release, dev, &toolchain)?;

    let status = Command::new("ninja")
        .arg("-C")
        .arg(&build_dir)
        .status()
        .context("running ninja")?;
    match status.code() {
        Some(0) => Ok(0),
        Some(code) => Err(BuildError::SubprocessFailed {
            tool: "ninja".to_string(),
            code,
        }
        .into()),
        None => bail!("ninja was terminated by a signal"),
    }
}

/// Everything up to (and including) writing `build.ninja`. Returns the
/// profile directory the build file was written into.
pub fn prepare(
    project_dir: &Path,
    manifest: &Manifest,
    release: bool,
    dev: bool,
    toolchain: &Toolchain,
) -> Result<PathBuf> {
    let profile = Profile::from_release_flag(release);
    let cancel = CancelToken::new();
    let out_root = project_dir.join(DEFAULT_OUT_DIR);
    let store = SourceStore::new(out_root.clone());

    let swept = store.gc()?;
    if swept > 0 {
        debug!(swept, "removed stale temp directories");
    }

    let registry = super::open_registry(cancel.clone())?;
    let opts = ResolveOptions {
        host_triple: host_triple(),
        include_dev: dev,
        base_dir: project_dir.to_path_buf(),
        cancel: cancel.clone(),
    };
    let mut set =
        resolve(manifest, registry.as_ref(), &store, &opts).context("resolving dependencies")?;
    info!(
        packages = set.len() - 1,
        profile = %profile,
        "dependencies resolved"
    );

    store
        .ensure_set(
            &mut set,
            registry.as_ref(),
            SourceStore::default_parallelism(),
            &cancel,
        )
        .context("fetching package sources")?;

    let plan = plan(
        &set,
        toolchain,
        &PlanOptions {
            profile,
            out_dir_name: DEFAULT_OUT_DIR.to_string(),
            max_depth: 64,
        },
    )?;

    let build_dir = out_root.join(profile.dir_name());
    let ninja_path = build_dir.join("build.ninja");
    write_atomic(&plan.ninja, &ninja_path)?;
    println!(
        "Planned {} ({} packages) -> {}",
        plan.default_target,
        set.len(),
        ninja_path.display()
    );
    Ok(build_dir)
}
