//! The local source store.
//!
//! A directory under the project's output folder holding unpacked package
//! sources keyed by `(name, version)`:
//!
//! ```text
//! <root>/src/
//!   <name>-<version>/           — unpacked tree
//!   <name>-<version>.sha256     — archive checksum record
//!   <name>-git-<ref>/           — pinned git checkouts
//! ```
//!
//! Mutation discipline is rename-as-commit: archives unpack into a
//! `.tmp-…` sibling that is renamed into place, so concurrent invocations
//! for the same key serialize on the rename and a cancelled run never
//! leaves a partial tree in a final location. Stale temp directories from
//! crashed or cancelled runs are swept by [`SourceStore::gc`].

use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use flate2::read::GzDecoder;
use keel_manifest::{DependencySource, GitReference};
use sha2::{Digest, Sha256};
use tar::Archive;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::client::Registry;
use crate::error::{RegistryError, Result};
use crate::resolve::ResolutionSet;
use crate::version::Version;

/// Content-addressed store of unpacked package sources.
#[derive(Debug, Clone)]
pub struct SourceStore {
    root: PathBuf,
}

impl SourceStore {
    /// Create a store rooted at the project's output directory.
    pub fn new(root: PathBuf) -> Self {
        SourceStore { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn src_root(&self) -> PathBuf {
        self.root.join("src")
    }

    /// Final location of a registry package's tree.
    pub fn tree_path(&self, name: &str, version: &Version) -> PathBuf {
        self.src_root().join(format!("{name}-{version}"))
    }

    /// Whether a package's sources are already unpacked.
    pub fn present(&self, name: &str, version: &Version) -> bool {
        self.tree_path(name, version).is_dir()
    }

    /// Fetch and unpack a package if absent. Idempotent and atomic: the
    /// archive unpacks into a temp sibling renamed into place; losing the
    /// rename race to a concurrent invocation is success.
    pub fn ensure(
        &self,
        name: &str,
        version: &Version,
        registry: &dyn Registry,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let dest = self.tree_path(name, version);
        if dest.is_dir() {
            return Ok(dest);
        }
        cancel.check()?;

        let bytes = registry.fetch(name, version)?;
        let digest = sha256_hex(&bytes);
        debug!(name, %version, bytes = bytes.len(), "unpacking archive");
        cancel.check()?;

        let src_root = self.src_root();
        std::fs::create_dir_all(&src_root)?;
        let tmp = src_root.join(format!(".tmp-{name}-{version}-{}", std::process::id()));
        if tmp.exists() {
            std::fs::remove_dir_all(&tmp)?;
        }

        if let Err(err) = unpack_archive(&bytes, &tmp) {
            let _ = std::fs::remove_dir_all(&tmp);
            return Err(err);
        }
        if cancel.is_cancelled() {
            let _ = std::fs::remove_dir_all(&tmp);
            return Err(RegistryError::Cancelled);
        }
        flatten_single_root(&tmp)?;

        match std::fs::rename(&tmp, &dest) {
            Ok(()) => {
                std::fs::write(
                    self.src_root().join(format!("{name}-{version}.sha256")),
                    &digest,
                )?;
                Ok(dest)
            }
            Err(_) if dest.is_dir() => {
                // A concurrent invocation won the rename.
                let _ = std::fs::remove_dir_all(&tmp);
                Ok(dest)
            }
            Err(err) => {
                let _ = std::fs::remove_dir_all(&tmp);
                Err(err.into())
            }
        }
    }

    /// Ensure sources for every pending registry package in the set, using
    /// a bounded worker pool. The registry and the store are the only state
    /// shared across workers; results are applied deterministically by
    /// arena index and the first failure (by index) is returned.
    pub fn ensure_set(
        &self,
        set: &mut ResolutionSet,
        registry: &dyn Registry,
        parallelism: usize,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut pending: Vec<(usize, String, Version)> = set
            .pending_sources()
            .into_iter()
            .map(|i| {
                let p = &set.packages()[i];
                (i, p.name.clone(), p.version.clone())
            })
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        // Workers pop from the back; reverse so fetches start in order.
        pending.reverse();

        let workers = parallelism.clamp(1, pending.len());
        let queue = Mutex::new(pending);
        let results: Mutex<Vec<(usize, Result<PathBuf>)>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let item = queue.lock().unwrap().pop();
                    let Some((index, name, version)) = item else {
                        break;
                    };
                    let outcome = self.ensure(&name, &version, registry, cancel);
                    results.lock().unwrap().push((index, outcome));
                });
            }
        });

        let mut results = results.into_inner().unwrap();
        results.sort_by_key(|(index, _)| *index);
        let mut first_error = None;
        for (index, outcome) in results {
            match outcome {
                Ok(dir) => set.set_source_dir(index, dir),
                Err(err) if first_error.is_none() => first_error = Some(err),
                Err(_) => {}
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        cancel.check()
    }

    /// Materialize a pinned dependency: a path dependency resolves (and
    /// canonicalizes) relative to the project directory; a git dependency
    /// is cloned into the store at its pinned reference.
    pub fn materialize_pinned(
        &self,
        name: &str,
        source: &DependencySource,
        base_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        match source {
            DependencySource::Path(path) => {
                let dir = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                let dir = dir.canonicalize().map_err(|err| {
                    RegistryError::PinnedSource {
                        name: name.to_string(),
                        detail: format!("{}: {err}", dir.display()),
                    }
                })?;
                if !dir.join(keel_manifest::MANIFEST_FILE).is_file() {
                    return Err(RegistryError::PinnedSource {
                        name: name.to_string(),
                        detail: format!("no {} in {}", keel_manifest::MANIFEST_FILE, dir.display()),
                    });
                }
                Ok(dir)
            }
            DependencySource::Git { url, reference } => {
                self.checkout_git(name, url, reference, cancel)
            }
            DependencySource::Registry(_) => Err(RegistryError::PinnedSource {
                name: name.to_string(),
                detail: "registry requirements are not pinned sources".to_string(),
            }),
        }
    }

    /// Clone a git dependency at its pinned reference. An existing
    /// checkout is reused as-is.
    pub fn checkout_git(
        &self,
        name: &str,
        url: &str,
        reference: &GitReference,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let slug = match reference {
            GitReference::Rev(r) | GitReference::Tag(r) | GitReference::Branch(r) => sanitize(r),
            GitReference::DefaultBranch => "head".to_string(),
        };
        let dest = self.src_root().join(format!("{name}-git-{slug}"));
        if dest.is_dir() {
            return Ok(dest);
        }
        cancel.check()?;

        let src_root = self.src_root();
        std::fs::create_dir_all(&src_root)?;
        let tmp = src_root.join(format!(".tmp-git-{name}-{slug}-{}", std::process::id()));
        if tmp.exists() {
            std::fs::remove_dir_all(&tmp)?;
        }

        debug!(name, url, "cloning git dependency");
        run_git(url, Command::new("git").args(["clone", "--quiet", url]).arg(&tmp))?;
        let checkout = match reference {
            GitReference::Rev(r) | GitReference::Tag(r) | GitReference::Branch(r) => Some(r),
            GitReference::DefaultBranch => None,
        };
        if let Some(reference) = checkout {
            let outcome = run_git(
                url,
                Command::new("git")
                    .arg("-C")
                    .arg(&tmp)
                    .args(["checkout", "--quiet", reference]),
            );
            if let Err(err) = outcome {
                let _ = std::fs::remove_dir_all(&tmp);
                return Err(err);
            }
        }

        match std::fs::rename(&tmp, &dest) {
            Ok(()) => Ok(dest),
            Err(_) if dest.is_dir() => {
                let _ = std::fs::remove_dir_all(&tmp);
                Ok(dest)
            }
            Err(err) => {
                let _ = std::fs::remove_dir_all(&tmp);
                Err(err.into())
            }
        }
    }

    /// Sweep temp directories left behind by cancelled or crashed runs.
    /// Returns how many entries were removed.
    pub fn gc(&self) -> Result<usize> {
        let src_root = self.src_root();
        if !src_root.is_dir() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&src_root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if !name.starts_with(".tmp-") {
                continue;
            }
            if entry.path().is_dir() {
                std::fs::remove_dir_all(entry.path())?;
            } else {
                std::fs::remove_file(entry.path())?;
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Worker-pool width: host CPU count, floor 4.
    pub fn default_parallelism() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .max(4)
    }
}

fn sanitize(reference: &str) -> String {
    reference
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn run_git(url: &str, command: &mut Command) -> Result<()> {
    let output = command.output().map_err(|err| RegistryError::Git {
        url: url.to_string(),
        detail: format!("running git: {err}"),
    })?;
    if !output.status.success() {
        return Err(RegistryError::Git {
            url: url.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn unpack_err(path: &Path, detail: String) -> RegistryError {
    RegistryError::Unpack {
        path: path.to_path_buf(),
        detail,
    }
}

/// Unpack a gzip tarball into `dest`, rejecting entries that would escape
/// it (absolute paths or `..` components).
fn unpack_archive(bytes: &[u8], dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let decoder = GzDecoder::new(bytes);
    let mut archive = Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|err| unpack_err(dest, format!("invalid archive: {err}")))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|err| unpack_err(dest, format!("invalid archive entry: {err}")))?;
        let path = entry
            .path()
            .map_err(|err| unpack_err(dest, format!("invalid entry path: {err}")))?
            .into_owned();
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(unpack_err(
                dest,
                format!("entry '{}' escapes the destination", path.display()),
            ));
        }
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|err| unpack_err(dest, format!("writing '{}': {err}", path.display())))?;
        if !unpacked {
            return Err(unpack_err(
                dest,
                format!("entry '{}' was rejected", path.display()),
            ));
        }
    }
    Ok(())
}

/// Registry tarballs commonly wrap everything in one `<name>-<version>/`
/// directory; strip exactly one such level.
fn flatten_single_root(dir: &Path) -> Result<()> {
    let entries: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    if entries.len() != 1 || !entries[0].file_type()?.is_dir() {
        return Ok(());
    }
    let inner = entries[0].path();
    let staged = dir.with_file_name(format!(
        "{}.flat",
        dir.file_name().unwrap_or_default().to_string_lossy()
    ));
    if staged.exists() {
        std::fs::remove_dir_all(&staged)?;
    }
    std::fs::rename(&inner, &staged)?;
    std::fs::remove_dir(dir)?;
    std::fs::rename(&staged, dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LocalRegistry;
    use crate::resolve::{resolve, ResolveOptions};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            let name = path.as_bytes();
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, contents.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn manifest_text(name: &str, version: &str) -> String {
        format!("[package]\nname = \"{name}\"\nversion = \"{version}\"\n")
    }

    struct CountingRegistry {
        inner: LocalRegistry,
        fetches: AtomicUsize,
    }

    impl Registry for CountingRegistry {
        fn search(&self, query: &str, limit: usize) -> Result<Vec<crate::client::SearchHit>> {
            self.inner.search(query, limit)
        }
        fn versions(&self, name: &str) -> Result<Vec<Version>> {
            self.inner.versions(name)
        }
        fn manifest(&self, name: &str, version: &Version) -> Result<keel_manifest::Manifest> {
            self.inner.manifest(name, version)
        }
        fn fetch(&self, name: &str, version: &Version) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(name, version)
        }
    }

    #[test]
    fn ensure_unpacks_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CountingRegistry {
            inner: LocalRegistry::new(dir.path().join("registry")),
            fetches: AtomicUsize::new(0),
        };
        registry
            .inner
            .publish(
                &manifest_text("pkg", "1.0.0"),
                &tarball(&[("keel.toml", "x"), ("src/lib.cc", "int f();")]),
            )
            .unwrap();

        let store = SourceStore::new(dir.path().join("out"));
        let cancel = CancelToken::new();
        let version = Version::new(1, 0, 0);

        let tree = store.ensure("pkg", &version, &registry, &cancel).unwrap();
        assert!(tree.join("src/lib.cc").is_file());
        assert!(store.present("pkg", &version));
        // Checksum record sits next to the tree.
        assert!(store.root().join("src/pkg-1.0.0.sha256").is_file());

        let again = store.ensure("pkg", &version, &registry, &cancel).unwrap();
        assert_eq!(tree, again);
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn single_archive_root_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().join("registry"));
        registry
            .publish(
                &manifest_text("pkg", "1.0.0"),
                &tarball(&[
                    ("pkg-1.0.0/keel.toml", "x"),
                    ("pkg-1.0.0/src/a.cc", "int a();"),
                ]),
            )
            .unwrap();

        let store = SourceStore::new(dir.path().join("out"));
        let tree = store
            .ensure("pkg", &Version::new(1, 0, 0), &registry, &CancelToken::new())
            .unwrap();
        assert!(tree.join("keel.toml").is_file());
        assert!(tree.join("src/a.cc").is_file());
        assert!(!tree.join("pkg-1.0.0").exists());
    }

    #[test]
    fn traversal_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().join("registry"));
        registry
            .publish(
                &manifest_text("evil", "1.0.0"),
                &tarball(&[("../escape.txt", "boo")]),
            )
            .unwrap();

        let store = SourceStore::new(dir.path().join("out"));
        let err = store
            .ensure("evil", &Version::new(1, 0, 0), &registry, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unpack { .. }));
        assert!(!store.present("evil", &Version::new(1, 0, 0)));
        assert!(!dir.path().join("escape.txt").exists());
        // The failed unpack leaves no temp residue.
        assert_eq!(store.gc().unwrap(), 0);
    }

    #[test]
    fn cancelled_ensure_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().join("registry"));
        registry
            .publish(&manifest_text("pkg", "1.0.0"), &tarball(&[("keel.toml", "x")]))
            .unwrap();

        let store = SourceStore::new(dir.path().join("out"));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = store
            .ensure("pkg", &Version::new(1, 0, 0), &registry, &cancel)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Cancelled));
        assert!(!store.present("pkg", &Version::new(1, 0, 0)));
    }

    #[test]
    fn gc_sweeps_temp_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = SourceStore::new(dir.path().join("out"));
        let src = dir.path().join("out/src");
        std::fs::create_dir_all(src.join(".tmp-pkg-1.0.0-999")).unwrap();
        std::fs::create_dir_all(src.join("pkg-1.0.0")).unwrap();

        assert_eq!(store.gc().unwrap(), 1);
        assert!(src.join("pkg-1.0.0").is_dir());
        assert!(!src.join(".tmp-pkg-1.0.0-999").exists());
    }

    #[test]
    fn ensure_set_fills_all_source_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().join("registry"));
        for name in ["alpha", "beta", "gamma"] {
            registry
                .publish(
                    &manifest_text(name, "1.0.0"),
                    &tarball(&[("keel.toml", "x"), ("src/a.cc", "int a();")]),
                )
                .unwrap();
        }
        let project = dir.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        let root = keel_manifest::Manifest::parse(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\nalpha = \"^1\"\nbeta = \"^1\"\ngamma = \"^1\"\n",
        )
        .unwrap();

        let store = SourceStore::new(dir.path().join("out"));
        let cancel = CancelToken::new();
        let opts = ResolveOptions {
            host_triple: "x86_64-unknown-linux-gnu".to_string(),
            include_dev: false,
            base_dir: project,
            cancel: cancel.clone(),
        };
        let mut set = resolve(&root, &registry, &store, &opts).unwrap();
        assert_eq!(set.pending_sources().len(), 3);

        store.ensure_set(&mut set, &registry, 4, &cancel).unwrap();
        assert!(set.pending_sources().is_empty());
        for package in set.packages().iter().skip(1) {
            let tree = package.source_dir.as_ref().unwrap();
            assert!(tree.join("src/a.cc").is_file(), "{}", tree.display());
        }
    }

    #[test]
    fn checkout_git_clones_at_reference() {
        if Command::new("git").arg("--version").output().is_err() {
            return; // No git on this machine.
        }
        let dir = tempfile::tempdir().unwrap();
        let upstream = dir.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        let git = |args: &[&str]| {
            let status = Command::new("git")
                .arg("-C")
                .arg(&upstream)
                .args([
                    "-c",
                    "user.email=test@example.com",
                    "-c",
                    "user.name=test",
                ])
                .args(args)
                .output()
                .unwrap();
            assert!(status.status.success(), "git {args:?}");
        };
        git(&["init", "--quiet"]);
        std::fs::write(upstream.join("keel.toml"), manifest_text("net", "0.2.0")).unwrap();
        git(&["add", "."]);
        git(&["commit", "--quiet", "-m", "init"]);
        git(&["tag", "v0.2.0"]);

        let store = SourceStore::new(dir.path().join("out"));
        let tree = store
            .checkout_git(
                "net",
                upstream.to_str().unwrap(),
                &GitReference::Tag("v0.2.0".to_string()),
                &CancelToken::new(),
            )
            .unwrap();
        assert!(tree.join("keel.toml").is_file());
        // Reused, not recloned.
        let again = store
            .checkout_git(
                "net",
                upstream.to_str().unwrap(),
                &GitReference::Tag("v0.2.0".to_string()),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(tree, again);
    }
}
