//! Source enumeration for a package tree.
//!
//! Walks a package root collecting files with C/C++ extensions, skipping
//! the output directory, `build`, `cmake-build-debug`, and any dot-prefixed
//! directory. Symlinks are followed; `walkdir` tracks visited ancestors, so
//! a symlink loop terminates instead of recursing forever, and the walk is
//! bounded by a configurable depth.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{BuildError, Result};

/// Every extension enumerated as part of a package's source tree.
pub const SOURCE_EXTS: &[&str] = &[
    "c", "c++", "cc", "cpp", "cu", "cuh", "cxx", "h", "h++", "hh", "hpp", "hxx", "ixx", "cppm",
];

/// Header extensions: enumerated, but never compiled on their own.
const HEADER_EXTS: &[&str] = &["cuh", "h", "h++", "hh", "hpp", "hxx"];

/// Directory names never descended into (beyond dot-prefixed ones).
pub const EXCLUDED_DIRS: &[&str] = &["build", "cmake-build-debug"];

/// Options for the source walk.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// The project's output directory name, excluded from the walk.
    pub out_dir_name: String,
    pub max_depth: usize,
    pub follow_links: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            out_dir_name: crate::planner::DEFAULT_OUT_DIR.to_string(),
            max_depth: 64,
            follow_links: true,
        }
    }
}

fn has_ext_in(path: &Path, set: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| set.contains(&e))
        .unwrap_or(false)
}

/// Whether a file belongs to the enumerated source set.
pub fn is_source(path: &Path) -> bool {
    has_ext_in(path, SOURCE_EXTS)
}

/// Whether a file produces an object of its own.
pub fn is_compile_unit(path: &Path) -> bool {
    is_source(path) && !has_ext_in(path, HEADER_EXTS)
}

/// Enumerate source files under `root`, as sorted root-relative paths.
pub fn source_files(root: &Path, opts: &WalkOptions) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(opts.follow_links)
        .max_depth(opts.max_depth)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !(name.starts_with('.')
                || name == opts.out_dir_name
                || EXCLUDED_DIRS.contains(&name.as_ref()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // A symlink loop is guarded, not fatal.
            Err(err) if err.loop_ancestor().is_some() => continue,
            Err(err) => {
                return Err(BuildError::Walk {
                    path: err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf()),
                    detail: err.to_string(),
                })
            }
        };
        if !entry.file_type().is_file() || !is_source(entry.path()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();
        files.push(relative);
    }
    files.sort();
    Ok(files)
}
