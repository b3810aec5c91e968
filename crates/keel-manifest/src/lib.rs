//! `keel.toml` manifest parsing and project configuration.
//!
//! The manifest declares a package's identity, its C++ standard, compile
//! flags, dependencies (registry ranges, local paths, git references),
//! dev-only dependencies, per-profile overrides, and host-triple-gated
//! dependency tables. Manifests are read-only once parsed; profile
//! specialization produces a fresh snapshot.

pub mod error;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use semver::VersionReq;
use serde::{Deserialize, Serialize};

pub use error::{ManifestError, Result};

/// The manifest file name looked up in a project directory.
pub const MANIFEST_FILE: &str = "keel.toml";

/// The top-level manifest. Unknown top-level keys are rejected so a typo
/// like `[dependancies]` fails loudly instead of being ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Manifest {
    /// Package identity (required).
    pub package: Package,
    /// Compile configuration.
    #[serde(default)]
    pub build: BuildConfig,
    /// Dependency requirements, name → spec.
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
    /// Test-only dependencies, excluded from the default link graph.
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, DependencySpec>,
    /// Per-profile overrides.
    #[serde(default)]
    pub profile: Profiles,
    /// Host-triple-gated configuration, keyed by target triple.
    #[serde(default)]
    pub target: BTreeMap<String, TargetBlock>,
}

/// `[package]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    /// Package name (required, registry naming rules).
    pub name: String,
    /// Full three-part semantic version (required).
    pub version: semver::Version,
    /// C++ standard as a bare number ("11", "17", "20", ...).
    #[serde(default)]
    pub edition: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub license: Option<String>,
}

/// `[build]` section: flags contributed to every compile of this package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildConfig {
    /// Include directories, relative to the package root.
    #[serde(default)]
    pub include_dirs: Vec<String>,
    /// Preprocessor defines (`NAME` or `NAME=VALUE`).
    #[serde(default)]
    pub defines: Vec<String>,
    /// Extra compiler flags.
    #[serde(default)]
    pub cxxflags: Vec<String>,
    /// System libraries linked into the final executable (`-l` names).
    #[serde(default)]
    pub system_libs: Vec<String>,
}

/// `[profile.debug]` / `[profile.release]` overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profiles {
    #[serde(default)]
    pub debug: Option<ProfileConfig>,
    #[serde(default)]
    pub release: Option<ProfileConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub cxxflags: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub ldflags: Vec<String>,
}

/// `[target.<triple>]` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetBlock {
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,
    #[serde(default)]
    pub build: Option<BuildConfig>,
}

/// A dependency requirement: a bare range string or a detailed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// `fmt = "^10.1"`
    Range(String),
    /// `util = { path = "../util" }`, `net = { git = "...", tag = "v1" }`
    Detailed(DetailedDependency),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailedDependency {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub git: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
}

/// The resolved meaning of a [`DependencySpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySource {
    /// Selected from the registry against a version range.
    Registry(VersionReq),
    /// Pinned to a local directory.
    Path(PathBuf),
    /// Pinned to a git reference.
    Git { url: String, reference: GitReference },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitReference {
    Rev(String),
    Tag(String),
    Branch(String),
    DefaultBranch,
}

impl DependencySpec {
    /// Interpret the spec, validating range syntax and source exclusivity.
    pub fn source(&self, name: &str) -> Result<DependencySource> {
        match self {
            DependencySpec::Range(range) => parse_range(name, range),
            DependencySpec::Detailed(d) => {
                if d.path.is_some() && d.git.is_some() {
                    return Err(ManifestError::InvalidDependency {
                        name: name.to_string(),
                        reason: "'path' and 'git' are mutually exclusive".to_string(),
                    });
                }
                if let Some(path) = &d.path {
                    return Ok(DependencySource::Path(path.clone()));
                }
                if let Some(url) = &d.git {
                    let refs = [&d.rev, &d.tag, &d.branch];
                    if refs.iter().filter(|r| r.is_some()).count() > 1 {
                        return Err(ManifestError::InvalidDependency {
                            name: name.to_string(),
                            reason: "at most one of 'rev', 'tag', 'branch' may be set"
                                .to_string(),
                        });
                    }
                    let reference = if let Some(rev) = &d.rev {
                        GitReference::Rev(rev.clone())
                    } else if let Some(tag) = &d.tag {
                        GitReference::Tag(tag.clone())
                    } else if let Some(branch) = &d.branch {
                        GitReference::Branch(branch.clone())
                    } else {
                        GitReference::DefaultBranch
                    };
                    return Ok(DependencySource::Git {
                        url: url.clone(),
                        reference,
                    });
                }
                match &d.version {
                    Some(range) => parse_range(name, range),
                    None => Err(ManifestError::InvalidDependency {
                        name: name.to_string(),
                        reason: "one of 'version', 'path', 'git' is required".to_string(),
                    }),
                }
            }
        }
    }
}

fn parse_range(name: &str, range: &str) -> Result<DependencySource> {
    VersionReq::parse(range)
        .map(DependencySource::Registry)
        .map_err(|err| ManifestError::InvalidDependency {
            name: name.to_string(),
            reason: format!("invalid version range '{range}': {err}"),
        })
}

impl Manifest {
    /// Parse a manifest from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let manifest: Manifest =
            toml::from_str(text).map_err(|err| ManifestError::Parse {
                path: None,
                message: err.message().to_string(),
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read and parse a manifest file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|err| match err {
            ManifestError::Parse { message, .. } => ManifestError::Parse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        })
    }

    /// Search upward from `start_dir` for a `keel.toml`, returning the
    /// manifest and the directory it was found in.
    pub fn find_and_load(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(MANIFEST_FILE);
            if candidate.is_file() {
                let manifest = Self::from_path(&candidate)?;
                return Ok(Some((manifest, dir)));
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    /// Produce a profile-specialized snapshot: the named profile's flags
    /// are folded into `[build]`. Unknown profile names change nothing.
    pub fn merge_profile(&self, profile: &str) -> Manifest {
        let mut merged = self.clone();
        let overrides = match profile {
            "debug" => self.profile.debug.as_ref(),
            "release" => self.profile.release.as_ref(),
            _ => None,
        };
        if let Some(overrides) = overrides {
            merged
                .build
                .cxxflags
                .extend(overrides.cxxflags.iter().cloned());
            merged
                .build
                .defines
                .extend(overrides.defines.iter().cloned());
        }
        merged
    }

    /// Flags contributed to the link line by the named profile.
    pub fn profile_ldflags(&self, profile: &str) -> &[String] {
        let overrides = match profile {
            "debug" => self.profile.debug.as_ref(),
            "release" => self.profile.release.as_ref(),
            _ => None,
        };
        overrides.map(|o| o.ldflags.as_slice()).unwrap_or(&[])
    }

    /// The active dependency set: `[dependencies]`, plus the matching
    /// `[target.<triple>.dependencies]` (which override by name), plus the
    /// root's dev-dependencies when `include_dev` is set. Order is
    /// deterministic (sorted by name).
    pub fn requirements(
        &self,
        host_triple: &str,
        include_dev: bool,
    ) -> BTreeMap<String, DependencySpec> {
        let mut out = self.dependencies.clone();
        if let Some(block) = self.target.get(host_triple) {
            for (name, spec) in &block.dependencies {
                out.insert(name.clone(), spec.clone());
            }
        }
        if include_dev {
            for (name, spec) in &self.dev_dependencies {
                out.entry(name.clone()).or_insert_with(|| spec.clone());
            }
        }
        out
    }

    /// The C++ standard to compile with; defaults to 17.
    pub fn edition(&self) -> &str {
        self.package.edition.as_deref().unwrap_or("17")
    }

    fn validate(&self) -> Result<()> {
        validate_name(&self.package.name)?;
        let all = self
            .dependencies
            .iter()
            .chain(&self.dev_dependencies)
            .chain(self.target.values().flat_map(|t| &t.dependencies));
        for (name, spec) in all {
            validate_name(name)?;
            spec.source(name)?;
        }
        Ok(())
    }
}

/// Registry naming rules: non-empty ASCII, lowercase alphanumeric plus
/// `-`/`_`, leading character a letter.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| ManifestError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if !name.is_ascii() {
        return Err(invalid("name must be ASCII"));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_lowercase() {
        return Err(invalid("name must start with a lowercase letter"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(invalid(
            "name may contain only lowercase letters, digits, '-' and '_'",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_manifest() {
        let text = r#"
[package]
name = "app"
version = "0.3.1"
edition = "20"
description = "demo"
authors = ["A", "B"]

[build]
include-dirs = ["include"]
defines = ["APP_FOO=1"]
cxxflags = ["-Wall"]
system-libs = ["pthread"]

[dependencies]
fmt = "^10.1"
util = { path = "../util" }
net = { git = "https://example.com/net.git", tag = "v1.2.0" }

[dev-dependencies]
testkit = "~0.4"

[profile.release]
defines = ["NDEBUG"]

[target.x86_64-unknown-linux-gnu.dependencies]
epoll-shim = "^0.2"
"#;
        let m = Manifest::parse(text).unwrap();
        assert_eq!(m.package.name, "app");
        assert_eq!(m.package.version, semver::Version::new(0, 3, 1));
        assert_eq!(m.edition(), "20");
        assert_eq!(m.build.include_dirs, vec!["include"]);
        assert_eq!(m.dependencies.len(), 3);
        assert_eq!(m.dev_dependencies.len(), 1);
        assert!(m.profile.release.is_some());
        assert!(m.target.contains_key("x86_64-unknown-linux-gnu"));
    }

    #[test]
    fn parse_minimal_manifest() {
        let m = Manifest::parse("[package]\nname = \"tiny\"\nversion = \"1.0.0\"\n").unwrap();
        assert_eq!(m.package.name, "tiny");
        assert_eq!(m.edition(), "17");
        assert!(m.dependencies.is_empty());
    }

    #[test]
    fn missing_required_key_is_rejected() {
        assert!(Manifest::parse("[package]\nname = \"x\"\n").is_err());
        assert!(Manifest::parse("[package]\nversion = \"1.0.0\"\n").is_err());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = Manifest::parse(
            "[package]\nname = \"x\"\nversion = \"1.0.0\"\n\n[dependancies]\nfmt = \"^10\"\n",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("dependancies"), "got: {message}");
    }

    #[test]
    fn partial_version_is_rejected() {
        assert!(Manifest::parse("[package]\nname = \"x\"\nversion = \"1.0\"\n").is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(validate_name("ok-name_2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("2fast").is_err());
        assert!(validate_name("Upper").is_err());
        assert!(validate_name("sp ace").is_err());
        assert!(validate_name("naïve").is_err());
    }

    #[test]
    fn dependency_source_forms() {
        let range = DependencySpec::Range("^1.2".to_string());
        assert!(matches!(
            range.source("a").unwrap(),
            DependencySource::Registry(_)
        ));

        let path = DependencySpec::Detailed(DetailedDependency {
            path: Some(PathBuf::from("../util")),
            ..Default::default()
        });
        assert_eq!(
            path.source("util").unwrap(),
            DependencySource::Path(PathBuf::from("../util"))
        );

        let git = DependencySpec::Detailed(DetailedDependency {
            git: Some("https://example.com/net.git".to_string()),
            tag: Some("v1.2.0".to_string()),
            ..Default::default()
        });
        assert_eq!(
            git.source("net").unwrap(),
            DependencySource::Git {
                url: "https://example.com/net.git".to_string(),
                reference: GitReference::Tag("v1.2.0".to_string()),
            }
        );
    }

    #[test]
    fn conflicting_dependency_sources_are_rejected() {
        let both = DependencySpec::Detailed(DetailedDependency {
            path: Some(PathBuf::from("../x")),
            git: Some("https://example.com/x.git".to_string()),
            ..Default::default()
        });
        assert!(both.source("x").is_err());

        let two_refs = DependencySpec::Detailed(DetailedDependency {
            git: Some("https://example.com/x.git".to_string()),
            tag: Some("v1".to_string()),
            branch: Some("main".to_string()),
            ..Default::default()
        });
        assert!(two_refs.source("x").is_err());

        let empty = DependencySpec::Detailed(DetailedDependency::default());
        assert!(empty.source("x").is_err());
    }

    #[test]
    fn bad_range_is_rejected_at_parse() {
        let err = Manifest::parse(
            "[package]\nname = \"x\"\nversion = \"1.0.0\"\n\n[dependencies]\nfmt = \"not a range\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidDependency { .. }));
    }

    #[test]
    fn merge_profile_folds_flags_into_build() {
        let text = r#"
[package]
name = "app"
version = "1.0.0"

[build]
cxxflags = ["-Wall"]

[profile.release]
cxxflags = ["-flto"]
defines = ["NDEBUG"]
"#;
        let m = Manifest::parse(text).unwrap();
        let release = m.merge_profile("release");
        assert_eq!(release.build.cxxflags, vec!["-Wall", "-flto"]);
        assert_eq!(release.build.defines, vec!["NDEBUG"]);
        // The original is untouched and debug changes nothing here.
        assert_eq!(m.build.cxxflags, vec!["-Wall"]);
        assert_eq!(m.merge_profile("debug").build.cxxflags, vec!["-Wall"]);
    }

    #[test]
    fn requirements_merge_target_and_dev() {
        let text = r#"
[package]
name = "app"
version = "1.0.0"

[dependencies]
fmt = "^10"
net = "^1"

[dev-dependencies]
testkit = "^0.4"

[target.x86_64-unknown-linux-gnu.dependencies]
net = "^2"
"#;
        let m = Manifest::parse(text).unwrap();

        let plain = m.requirements("aarch64-apple-darwin", false);
        assert_eq!(plain.len(), 2);

        let gated = m.requirements("x86_64-unknown-linux-gnu", false);
        match gated.get("net").unwrap().source("net").unwrap() {
            DependencySource::Registry(req) => {
                assert!(req.matches(&semver::Version::new(2, 0, 0)))
            }
            other => panic!("unexpected source {other:?}"),
        }

        let dev = m.requirements("aarch64-apple-darwin", true);
        assert!(dev.contains_key("testkit"));
    }

    #[test]
    fn find_and_load_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "[package]\nname = \"parent\"\nversion = \"1.0.0\"\n",
        )
        .unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let (manifest, found) = Manifest::find_and_load(&nested).unwrap().unwrap();
        assert_eq!(manifest.package.name, "parent");
        assert_eq!(found, dir.path());
    }
}
