//! `keel clean` — remove build artifacts.

use std::path::Path;

use anyhow::{Context, Result};
use keel_build::planner::DEFAULT_OUT_DIR;

pub fn run(project_dir: &Path) -> Result<()> {
    let out = project_dir.join(DEFAULT_OUT_DIR);
    if out.is_dir() {
        std::fs::remove_dir_all(&out).with_context(|| format!("removing {}", out.display()))?;
        println!("Removed {}", out.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_out_dir_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join(DEFAULT_OUT_DIR).join("debug");
        std::fs::create_dir_all(&out).unwrap();

        run(dir.path()).unwrap();
        assert!(!dir.path().join(DEFAULT_OUT_DIR).exists());
        run(dir.path()).unwrap();
    }
}
