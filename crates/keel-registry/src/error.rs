//! Registry, resolution, and store error types.

use std::path::PathBuf;

/// Errors that can occur during registry operations, dependency
/// resolution, or source-store maintenance.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A manifest (remote or pinned) failed to parse or validate.
    #[error(transparent)]
    Manifest(#[from] keel_manifest::ManifestError),

    /// Package name unknown to the registry.
    #[error("package not found: {name}")]
    PackageNotFound { name: String },

    /// Transport or decode failure after the retry budget was exhausted.
    #[error("registry {op} request to {endpoint} failed: {detail}")]
    Request {
        op: &'static str,
        endpoint: String,
        detail: String,
    },

    /// Non-retryable HTTP status, carrying the server's diagnostic.
    #[error("registry {op} request to {endpoint} returned {status}: {message}")]
    Status {
        op: &'static str,
        endpoint: String,
        status: u16,
        message: String,
    },

    /// The intersection of requirements on a package is empty. Each chain
    /// traces one requirement from the root.
    #[error("no version of '{name}' satisfies the requirements: {}", .chains.join("; "))]
    NoVersionSatisfies { name: String, chains: Vec<String> },

    /// A back-edge was found during resolution.
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// Archive corrupt, path traversal, or filesystem failure while
    /// unpacking.
    #[error("unpacking archive into {path}: {detail}")]
    Unpack { path: PathBuf, detail: String },

    /// A path or git dependency could not be materialized.
    #[error("pinned dependency '{name}': {detail}")]
    PinnedSource { name: String, detail: String },

    /// `git` invocation failed.
    #[error("git fetch of {url} failed: {detail}")]
    Git { url: String, detail: String },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON decode error from a registry payload.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
