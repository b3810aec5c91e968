//! `keel tree` — display the resolved dependency tree.

use std::path::Path;

use anyhow::{Context, Result};
use keel_build::host_triple;
use keel_build::planner::DEFAULT_OUT_DIR;
use keel_manifest::Manifest;
use keel_registry::{format_tree, resolve, CancelToken, ResolveOptions, SourceStore};

pub fn run(project_dir: &Path, manifest: &Manifest, dev: bool) -> Result<()> {
    let cancel = CancelToken::new();
    let registry = super::open_registry(cancel.clone())?;
    let store = SourceStore::new(project_dir.join(DEFAULT_OUT_DIR));
    let set = resolve(
        manifest,
        registry.as_ref(),
        &store,
        &ResolveOptions {
            host_triple: host_triple(),
            include_dev: dev,
            base_dir: project_dir.to_path_buf(),
            cancel,
        },
    )
    .context("resolving dependencies")?;
    print!("{}", format_tree(&set));
    Ok(())
}
