//! Host toolchain discovery and build profiles.
//!
//! The compiler and archiver default from `CXX`/`AR`, extra flags from
//! `CXXFLAGS`/`LDFLAGS`. Every tool is located on `PATH` up front so a
//! missing compiler fails with a structured error instead of a mid-build
//! ninja failure.

use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};

/// Build profile selecting optimization defaults and the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Debug,
    Release,
}

impl Profile {
    pub fn from_release_flag(release: bool) -> Self {
        if release {
            Profile::Release
        } else {
            Profile::Debug
        }
    }

    /// Directory name under the output root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Profile::Debug => "debug",
            Profile::Release => "release",
        }
    }

    /// Base compiler flags for the profile.
    pub fn cxxflags(&self) -> &'static [&'static str] {
        match self {
            Profile::Debug => &["-O0", "-g"],
            Profile::Release => &["-O3"],
        }
    }

    /// Base preprocessor defines for the profile.
    pub fn defines(&self) -> &'static [&'static str] {
        match self {
            Profile::Debug => &[],
            Profile::Release => &["NDEBUG"],
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// The host toolchain: compiler, archiver, and baseline flags.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub cxx: String,
    pub ar: String,
    pub cxxflags: Vec<String>,
    pub ldflags: Vec<String>,
}

impl Toolchain {
    /// Resolve the toolchain from the environment (`CXX`, `AR`,
    /// `CXXFLAGS`, `LDFLAGS`), verifying each tool exists.
    pub fn from_env() -> Result<Self> {
        let cxx = std::env::var("CXX").unwrap_or_else(|_| "c++".to_string());
        let ar = std::env::var("AR").unwrap_or_else(|_| "ar".to_string());
        locate(&cxx)?;
        locate(&ar)?;
        Ok(Toolchain {
            cxx,
            ar,
            cxxflags: split_flags(std::env::var("CXXFLAGS").ok().as_deref()),
            ldflags: split_flags(std::env::var("LDFLAGS").ok().as_deref()),
        })
    }

    /// Construct without locating the tools. For tests and dry runs.
    pub fn with_tools(cxx: impl Into<String>, ar: impl Into<String>) -> Self {
        Toolchain {
            cxx: cxx.into(),
            ar: ar.into(),
            cxxflags: Vec::new(),
            ldflags: Vec::new(),
        }
    }
}

fn split_flags(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Find a tool: a name with a path separator must exist as given, a bare
/// name is searched on `PATH`.
pub fn locate(tool: &str) -> Result<PathBuf> {
    let missing = || BuildError::ToolchainNotFound {
        tool: tool.to_string(),
    };
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        return if candidate.is_file() {
            Ok(candidate.to_path_buf())
        } else {
            Err(missing())
        };
    }
    let path = std::env::var_os("PATH").ok_or_else(missing)?;
    for dir in std::env::split_paths(&path) {
        let full = dir.join(tool);
        if full.is_file() {
            return Ok(full);
        }
    }
    Err(missing())
}

/// The host target triple, used to activate `[target.<triple>]` tables.
pub fn host_triple() -> String {
    let arch = std::env::consts::ARCH;
    match std::env::consts::OS {
        "linux" => format!("{arch}-unknown-linux-gnu"),
        "macos" => format!("{arch}-apple-darwin"),
        "windows" => format!("{arch}-pc-windows-msvc"),
        os => format!("{arch}-unknown-{os}"),
    }
}
