//! Registry backend trait and the local filesystem implementation.
//!
//! `Registry` abstracts the logical index operations without prescribing a
//! wire encoding. `LocalRegistry` is a directory-backed implementation used
//! by tests and local development.

use std::path::{Path, PathBuf};

use keel_manifest::Manifest;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::version::Version;

/// One entry of a search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Logical registry operations.
///
/// `manifest` exists so the resolver can inspect a candidate's declared
/// dependencies before committing to it; `fetch` yields the gzip source
/// tarball for the source store to unpack.
pub trait Registry: Send + Sync {
    /// Search the index, newest version per package, at most `limit` hits.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// All published versions of a package.
    fn versions(&self, name: &str) -> Result<Vec<Version>>;

    /// The manifest a package declared at a specific version.
    fn manifest(&self, name: &str, version: &Version) -> Result<Manifest>;

    /// The gzip source archive for a package version.
    fn fetch(&self, name: &str, version: &Version) -> Result<Vec<u8>>;
}

/// A local filesystem registry.
///
/// Layout:
/// ```text
/// <root>/
///   <name>/
///     <version>/
///       keel.toml
///       source.tar.gz
/// ```
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    pub fn new(root: PathBuf) -> Self {
        LocalRegistry { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, name: &str, version: &Version) -> PathBuf {
        self.root.join(name).join(version.to_string())
    }

    /// Seed the registry with a package version. Used by tests and local
    /// development; not part of the logical `Registry` surface.
    pub fn publish(&self, manifest_text: &str, tarball: &[u8]) -> Result<PathBuf> {
        let manifest = Manifest::parse(manifest_text)?;
        let dir = self.package_dir(&manifest.package.name, &manifest.package.version);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(keel_manifest::MANIFEST_FILE), manifest_text)?;
        std::fs::write(dir.join("source.tar.gz"), tarball)?;
        Ok(dir)
    }
}

impl Registry for LocalRegistry {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let query_lower = query.to_lowercase();
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.to_lowercase().contains(&query_lower) {
                names.push(name);
            }
        }
        names.sort();

        let mut hits = Vec::new();
        for name in names.into_iter().take(limit) {
            let versions = self.versions(&name)?;
            let Some(latest) = versions.last() else {
                continue;
            };
            let manifest = self.manifest(&name, latest)?;
            hits.push(SearchHit {
                name,
                version: latest.to_string(),
                description: manifest.package.description.clone(),
            });
        }
        Ok(hits)
    }

    fn versions(&self, name: &str) -> Result<Vec<Version>> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(RegistryError::PackageNotFound {
                name: name.to_string(),
            });
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(s) = entry.file_name().to_str() {
                    if let Ok(v) = Version::parse(s) {
                        versions.push(v);
                    }
                }
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn manifest(&self, name: &str, version: &Version) -> Result<Manifest> {
        let path = self
            .package_dir(name, version)
            .join(keel_manifest::MANIFEST_FILE);
        if !path.is_file() {
            return Err(RegistryError::PackageNotFound {
                name: format!("{name}@{version}"),
            });
        }
        Ok(Manifest::from_path(&path)?)
    }

    fn fetch(&self, name: &str, version: &Version) -> Result<Vec<u8>> {
        let path = self.package_dir(name, version).join("source.tar.gz");
        if !path.is_file() {
            return Err(RegistryError::PackageNotFound {
                name: format!("{name}@{version}"),
            });
        }
        Ok(std::fs::read(&path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_text(name: &str, version: &str, description: &str) -> String {
        format!(
            "[package]\nname = \"{name}\"\nversion = \"{version}\"\ndescription = \"{description}\"\n"
        )
    }

    #[test]
    fn publish_and_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().to_path_buf());

        registry
            .publish(&manifest_text("alpha", "1.0.0", "first"), b"tarball")
            .unwrap();

        let versions = registry.versions("alpha").unwrap();
        assert_eq!(versions, vec![Version::new(1, 0, 0)]);

        let manifest = registry.manifest("alpha", &Version::new(1, 0, 0)).unwrap();
        assert_eq!(manifest.package.name, "alpha");

        let bytes = registry.fetch("alpha", &Version::new(1, 0, 0)).unwrap();
        assert_eq!(bytes, b"tarball");
    }

    #[test]
    fn versions_sorted_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().to_path_buf());

        for v in ["2.0.0", "1.0.0", "1.1.0"] {
            registry.publish(&manifest_text("pkg", v, "x"), b"t").unwrap();
        }

        let versions = registry.versions("pkg").unwrap();
        assert_eq!(
            versions,
            vec![
                Version::new(1, 0, 0),
                Version::new(1, 1, 0),
                Version::new(2, 0, 0)
            ]
        );
    }

    #[test]
    fn unknown_package_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().to_path_buf());
        assert!(matches!(
            registry.versions("ghost"),
            Err(RegistryError::PackageNotFound { .. })
        ));
        assert!(matches!(
            registry.fetch("ghost", &Version::new(1, 0, 0)),
            Err(RegistryError::PackageNotFound { .. })
        ));
    }

    #[test]
    fn search_matches_substring_and_reports_latest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().to_path_buf());

        registry
            .publish(&manifest_text("net-core", "1.0.0", "older"), b"t")
            .unwrap();
        registry
            .publish(&manifest_text("net-core", "1.2.0", "newer"), b"t")
            .unwrap();
        registry
            .publish(&manifest_text("other", "1.0.0", "x"), b"t")
            .unwrap();

        let hits = registry.search("net", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "net-core");
        assert_eq!(hits[0].version, "1.2.0");
        assert_eq!(hits[0].description.as_deref(), Some("newer"));
    }

    #[test]
    fn search_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().to_path_buf());
        for name in ["lib-a", "lib-b", "lib-c"] {
            registry
                .publish(&manifest_text(name, "1.0.0", "x"), b"t")
                .unwrap();
        }
        assert_eq!(registry.search("lib", 2).unwrap().len(), 2);
    }
}
