//! Manifest error types.

use std::path::PathBuf;

/// Errors raised while reading or validating a `keel.toml`.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Malformed TOML or an unknown/missing key. The message from the TOML
    /// layer names the offending key chain.
    #[error("invalid manifest{}: {message}", path_suffix(.path))]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },

    /// Package name does not satisfy the registry naming rules.
    #[error("invalid package name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// A dependency entry is malformed (bad range, conflicting sources).
    #[error("invalid dependency '{name}': {reason}")]
    InvalidDependency { name: String, reason: String },

    /// I/O error while reading the manifest file.
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" at {}", p.display()),
        None => String::new(),
    }
}

/// Result type alias for manifest operations.
pub type Result<T> = std::result::Result<T, ManifestError>;
