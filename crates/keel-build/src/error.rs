//! Build-planning error types.

use std::path::PathBuf;

/// Errors raised while locating the toolchain or planning the build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// A required external tool is absent from `PATH`.
    #[error("toolchain tool not found: {tool}")]
    ToolchainNotFound { tool: String },

    /// A resolved package has no source directory on disk.
    #[error("missing source directory for '{package}': {path}")]
    MissingSources { package: String, path: PathBuf },

    /// Source enumeration failed.
    #[error("walking {path}: {detail}")]
    Walk { path: PathBuf, detail: String },

    /// An external tool exited non-zero.
    #[error("{tool} exited with code {code}")]
    SubprocessFailed { tool: String, code: i32 },

    /// Ninja emission failed.
    #[error(transparent)]
    Ninja(#[from] keel_ninja::NinjaError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for build planning.
pub type Result<T> = std::result::Result<T, BuildError>;
