//! Subcommand implementations.

pub mod build;
pub mod clean;
pub mod init;
pub mod search;
pub mod tree;

use std::path::PathBuf;

use anyhow::Result;
use keel_registry::{CancelToken, HttpConfig, HttpRegistry, LocalRegistry, Registry};

/// Open the configured registry: `KEEL_REGISTRY_DIR` selects a local
/// directory index, `KEEL_REGISTRY` overrides the HTTP base URL.
pub(crate) fn open_registry(cancel: CancelToken) -> Result<Box<dyn Registry>> {
    if let Some(dir) = std::env::var_os("KEEL_REGISTRY_DIR") {
        return Ok(Box::new(LocalRegistry::new(PathBuf::from(dir))));
    }
    let url = std::env::var("KEEL_REGISTRY")
        .unwrap_or_else(|_| keel_registry::http::DEFAULT_URL.to_string());
    Ok(Box::new(HttpRegistry::new(
        HttpConfig::with_base_url(url),
        cancel,
    )?))
}
