//! Ninja graph generation for a resolved dependency set.
//!
//! Emits file-scope toolchain variables, the three rules (`compile_cxx`,
//! `archive`, `link_exe`), then per-package builds in topological order
//! (ties lexicographic, sources sorted by relative path) so two runs over
//! the same resolution produce byte-identical output. Object files land at
//! `<name>-<version>/<relpath>.o` relative to the profile directory the
//! ninja file lives in; sources are referenced by absolute path.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use keel_ninja::{BuildOptions, RuleOptions, Writer};
use keel_registry::ResolutionSet;
use tracing::debug;

use crate::error::{BuildError, Result};
use crate::sources::{is_compile_unit, source_files, WalkOptions};
use crate::toolchain::{Profile, Toolchain};

/// Default name of the project output directory.
pub const DEFAULT_OUT_DIR: &str = "keel-out";

/// Planner inputs beyond the resolution set and toolchain.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub profile: Profile,
    /// Output directory name, excluded from source walks.
    pub out_dir_name: String,
    /// Maximum source-walk depth.
    pub max_depth: usize,
}

impl Default for PlanOptions {
    fn default() -> Self {
        PlanOptions {
            profile: Profile::Debug,
            out_dir_name: DEFAULT_OUT_DIR.to_string(),
            max_depth: 64,
        }
    }
}

/// A finished build description.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The `build.ninja` document.
    pub ninja: String,
    /// The target named by the `default` statement.
    pub default_target: String,
}

/// Plan the build for a resolution set whose sources are all on disk.
pub fn plan(set: &ResolutionSet, toolchain: &Toolchain, opts: &PlanOptions) -> Result<Plan> {
    let profile_name = opts.profile.dir_name();
    let topo = set.topo_order();

    // Profile-specialized manifests, once per package.
    let merged: BTreeMap<usize, keel_manifest::Manifest> = topo
        .iter()
        .map(|&i| (i, set.packages()[i].manifest.merge_profile(profile_name)))
        .collect();

    let mut writer = Writer::new();
    writer.comment("Generated by keel. Do not edit by hand.");
    writer.newline();

    writer.variable("cxx", &toolchain.cxx, 0)?;
    writer.variable("ar", &toolchain.ar, 0)?;
    writer.variable_list("cxxflags", &toolchain.cxxflags, 0)?;
    let mut ldflags = toolchain.ldflags.clone();
    ldflags.extend(
        set.root()
            .manifest
            .profile_ldflags(profile_name)
            .iter()
            .cloned(),
    );
    writer.variable_list("ldflags", &ldflags, 0)?;
    writer.newline();

    writer.rule(
        "compile_cxx",
        "$cxx -MD -MF $out.d $cxxflags -c $in -o $out",
        &RuleOptions {
            description: Some("Compiling $in".to_string()),
            depfile: Some("$out.d".to_string()),
            deps: Some("gcc".to_string()),
            ..Default::default()
        },
    )?;
    writer.newline();
    writer.rule(
        "archive",
        "$ar rcs $out $in",
        &RuleOptions {
            description: Some("Archiving $out".to_string()),
            ..Default::default()
        },
    )?;
    writer.newline();
    writer.rule(
        "link_exe",
        "$cxx $ldflags -o $out $in $libs",
        &RuleOptions {
            description: Some("Linking $out".to_string()),
            ..Default::default()
        },
    )?;

    let include_dirs = transitive_includes(set, &topo, &merged);
    let walk = WalkOptions {
        out_dir_name: opts.out_dir_name.clone(),
        max_depth: opts.max_depth,
        follow_links: true,
    };

    let mut objects: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut root_has_main = false;

    for &index in &topo {
        let package = &set.packages()[index];
        let source_dir = package
            .source_dir
            .as_deref()
            .filter(|d| d.is_dir())
            .ok_or_else(|| BuildError::MissingSources {
                package: package.name.clone(),
                path: package
                    .source_dir
                    .clone()
                    .unwrap_or_default(),
            })?;

        let sources = source_files(source_dir, &walk)?;
        let units: Vec<&PathBuf> = sources.iter().filter(|p| is_compile_unit(p)).collect();
        debug!(
            package = %package.name,
            sources = sources.len(),
            units = units.len(),
            "planned package"
        );
        if index == 0 {
            root_has_main = units.iter().any(|u| {
                u.parent() == Some(Path::new("src"))
                    && u.file_stem() == Some(OsStr::new("main"))
            });
        }

        let manifest = &merged[&index];
        let cxxflags = compose_cxxflags(
            opts.profile,
            manifest,
            &include_dirs[&index],
        );

        writer.newline();
        writer.comment(&format!("{} v{}", package.name, package.version));
        let object_dir = format!("{}-{}", package.name, package.version);
        let mut package_objects = Vec::with_capacity(units.len());
        for unit in units {
            let object = format!("{object_dir}/{}.o", unit.display());
            let source = source_dir.join(unit).display().to_string();
            writer.build(
                &[object.clone()],
                "compile_cxx",
                &BuildOptions {
                    inputs: vec![source],
                    variables: vec![("cxxflags".to_string(), cxxflags.clone())],
                    ..Default::default()
                },
            )?;
            package_objects.push(object);
        }

        if index != 0 && !package_objects.is_empty() {
            writer.build(
                &[format!("lib{}.a", package.name)],
                "archive",
                &BuildOptions {
                    inputs: package_objects.clone(),
                    ..Default::default()
                },
            )?;
        }
        objects.insert(index, package_objects);
    }

    // Root aggregation: executable when src/main.* exists, library
    // otherwise. Dependency archives link dependers-first.
    let root = set.root();
    let root_objects = objects[&0].clone();
    writer.newline();
    let default_target = if root_has_main {
        let mut inputs = root_objects;
        for index in set.link_order() {
            if !objects[&index].is_empty() {
                inputs.push(format!("lib{}.a", set.packages()[index].name));
            }
        }
        let libs = system_libs(set, &merged);
        let variables = if libs.is_empty() {
            Vec::new()
        } else {
            vec![("libs".to_string(), libs.join(" "))]
        };
        let target = root.name.clone();
        writer.build(
            &[target.clone()],
            "link_exe",
            &BuildOptions {
                inputs,
                variables,
                ..Default::default()
            },
        )?;
        target
    } else {
        let target = format!("lib{}.a", root.name);
        writer.build(
            &[target.clone()],
            "archive",
            &BuildOptions {
                inputs: root_objects,
                ..Default::default()
            },
        )?;
        target
    };
    writer.newline();
    writer.defaults(&[default_target.clone()])?;

    Ok(Plan {
        ninja: writer.finish(),
        default_target,
    })
}

/// Write the finished document atomically (temp sibling + rename): the
/// build file is either fully present or absent, never truncated.
pub fn write_atomic(ninja: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "build.ninja".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, ninja.as_bytes())?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Per-source `$cxxflags`: the file-scope value, profile flags, the C++
/// standard, defines, package flags, then include paths (own first, then
/// transitive).
fn compose_cxxflags(
    profile: Profile,
    manifest: &keel_manifest::Manifest,
    includes: &[PathBuf],
) -> String {
    let mut flags: Vec<String> = vec!["$cxxflags".to_string()];
    flags.extend(profile.cxxflags().iter().map(|f| f.to_string()));
    flags.push(format!("-std=c++{}", manifest.edition()));
    for define in profile.defines() {
        flags.push(format!("-D{define}"));
    }
    for define in &manifest.build.defines {
        flags.push(format!("-D{define}"));
    }
    flags.extend(manifest.build.cxxflags.iter().cloned());
    for dir in includes {
        flags.push(format!("-I{}", dir.display()));
    }
    flags.join(" ")
}

/// Include directories visible to each package: its own declared dirs
/// (defaulting to `include/` when present and nothing is declared), plus
/// everything its dependencies export, dependency order, deduplicated.
fn transitive_includes(
    set: &ResolutionSet,
    topo: &[usize],
    merged: &BTreeMap<usize, keel_manifest::Manifest>,
) -> BTreeMap<usize, Vec<PathBuf>> {
    let mut result: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
    for &index in topo {
        let package = &set.packages()[index];
        let mut dirs = own_includes(package, &merged[&index]);
        for dep in set.deps_of(index) {
            for dir in &result[&dep] {
                if !dirs.contains(dir) {
                    dirs.push(dir.clone());
                }
            }
        }
        result.insert(index, dirs);
    }
    result
}

fn own_includes(
    package: &keel_registry::ResolvedPackage,
    manifest: &keel_manifest::Manifest,
) -> Vec<PathBuf> {
    let Some(source_dir) = package.source_dir.as_deref() else {
        return Vec::new();
    };
    if manifest.build.include_dirs.is_empty() {
        let conventional = source_dir.join("include");
        if conventional.is_dir() {
            return vec![conventional];
        }
        return Vec::new();
    }
    manifest
        .build
        .include_dirs
        .iter()
        .map(|d| source_dir.join(d))
        .collect()
}

/// `-l` flags for the link line: the root's system libraries first, then
/// each dependency's, dependers before dependencies, deduplicated.
fn system_libs(
    set: &ResolutionSet,
    merged: &BTreeMap<usize, keel_manifest::Manifest>,
) -> Vec<String> {
    let mut seen = Vec::new();
    let mut order = vec![0usize];
    order.extend(set.link_order());
    for index in order {
        for lib in &merged[&index].build.system_libs {
            if !seen.contains(lib) {
                seen.push(lib.clone());
            }
        }
    }
    seen.into_iter().map(|lib| format!("-l{lib}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_registry::{resolve, CancelToken, LocalRegistry, ResolveOptions, SourceStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        set: ResolutionSet,
    }

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// A project with a path dependency, resolved for planning. Sources:
    /// `app` has `src/main.cc` (+ header), `util` has `src/util.cc`.
    fn fixture(with_main: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("project");
        write(
            &project.join("keel.toml"),
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[build]\nsystem-libs = [\"pthread\"]\n\n[dependencies]\nutil = { path = \"../util\" }\n",
        );
        if with_main {
            write(&project.join("src/main.cc"), "int main() {}\n");
        } else {
            write(&project.join("src/app.cc"), "int app() { return 0; }\n");
        }
        write(&project.join("include/app.hpp"), "#pragma once\n");

        let util = dir.path().join("util");
        write(
            &util.join("keel.toml"),
            "[package]\nname = \"util\"\nversion = \"0.5.0\"\n",
        );
        write(&util.join("src/util.cc"), "int util() { return 1; }\n");
        write(&util.join("include/util.hpp"), "#pragma once\n");

        let registry = LocalRegistry::new(dir.path().join("registry"));
        let store = SourceStore::new(project.join(DEFAULT_OUT_DIR));
        let root = keel_manifest::Manifest::from_path(&project.join("keel.toml")).unwrap();
        let set = resolve(
            &root,
            &registry,
            &store,
            &ResolveOptions {
                host_triple: "x86_64-unknown-linux-gnu".to_string(),
                include_dev: false,
                base_dir: project,
                cancel: CancelToken::new(),
            },
        )
        .unwrap();
        Fixture { _dir: dir, set }
    }

    fn plan_fixture(fixture: &Fixture) -> Plan {
        plan(
            &fixture.set,
            &Toolchain::with_tools("g++", "ar"),
            &PlanOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn rules_match_the_toolchain_contract() {
        let f = fixture(true);
        let plan = plan_fixture(&f);
        assert!(plan.ninja.contains(
            "rule compile_cxx\n  command = $cxx -MD -MF $out.d $cxxflags -c $in -o $out\n  description = Compiling $in\n  depfile = $out.d\n  deps = gcc\n"
        ));
        assert!(plan
            .ninja
            .contains("rule archive\n  command = $ar rcs $out $in\n  description = Archiving $out\n"));
        assert!(plan
            .ninja
            .contains("rule link_exe\n  command = $cxx $ldflags -o $out $in $libs\n  description = Linking $out\n"));
    }

    #[test]
    fn objects_land_under_name_version_dirs() {
        let f = fixture(true);
        let plan = plan_fixture(&f);
        assert!(plan
            .ninja
            .contains("build app-0.1.0/src/main.cc.o: compile_cxx"));
        assert!(plan
            .ninja
            .contains("build util-0.5.0/src/util.cc.o: compile_cxx"));
    }

    #[test]
    fn headers_are_never_compiled() {
        let f = fixture(true);
        let plan = plan_fixture(&f);
        assert!(!plan.ninja.contains("app.hpp.o"));
        assert!(!plan.ninja.contains("util.hpp.o"));
    }

    #[test]
    fn dependency_archives_and_link_line() {
        let f = fixture(true);
        let plan = plan_fixture(&f);
        assert!(plan
            .ninja
            .contains("build libutil.a: archive util-0.5.0/src/util.cc.o"));
        assert!(plan
            .ninja
            .contains("build app: link_exe app-0.1.0/src/main.cc.o libutil.a"));
        assert!(plan.ninja.contains("libs = -lpthread"));
        assert!(plan.ninja.ends_with("default app\n"));
        assert_eq!(plan.default_target, "app");
    }

    #[test]
    fn per_source_flags_compose() {
        let f = fixture(true);
        let plan = plan_fixture(&f);
        // Profile flags, standard, and transitive includes reach the
        // compile line's local cxxflags.
        assert!(plan.ninja.contains("cxxflags = $cxxflags -O0 -g -std=c++17"));
        assert!(plan.ninja.contains("util/include"));
    }

    #[test]
    fn release_profile_changes_flags() {
        let f = fixture(true);
        let plan = plan(
            &f.set,
            &Toolchain::with_tools("g++", "ar"),
            &PlanOptions {
                profile: Profile::Release,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(plan.ninja.contains("-O3"));
        assert!(plan.ninja.contains("-DNDEBUG"));
        assert!(!plan.ninja.contains("-O0"));
    }

    #[test]
    fn root_without_main_becomes_a_library() {
        let f = fixture(false);
        let plan = plan_fixture(&f);
        assert!(plan
            .ninja
            .contains("build libapp.a: archive app-0.1.0/src/app.cc.o"));
        assert!(plan.ninja.ends_with("default libapp.a\n"));
        assert_eq!(plan.default_target, "libapp.a");
    }

    #[test]
    fn output_is_deterministic() {
        let f = fixture(true);
        assert_eq!(plan_fixture(&f).ninja, plan_fixture(&f).ninja);
    }

    #[test]
    fn missing_sources_are_fatal() {
        // A registry dependency that was never ensured has no source dir.
        let dir = tempfile::tempdir().unwrap();
        let registry = LocalRegistry::new(dir.path().join("registry"));
        registry
            .publish(
                "[package]\nname = \"ghostlib\"\nversion = \"1.0.0\"\n",
                b"",
            )
            .unwrap();
        let project = dir.path().join("project");
        write(
            &project.join("keel.toml"),
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n\n[dependencies]\nghostlib = \"^1\"\n",
        );
        write(&project.join("src/main.cc"), "int main() {}\n");

        let store = SourceStore::new(project.join(DEFAULT_OUT_DIR));
        let root = keel_manifest::Manifest::from_path(&project.join("keel.toml")).unwrap();
        let set = resolve(
            &root,
            &registry,
            &store,
            &ResolveOptions {
                host_triple: "x86_64-unknown-linux-gnu".to_string(),
                include_dev: false,
                base_dir: project,
                cancel: CancelToken::new(),
            },
        )
        .unwrap();

        let err = plan(
            &set,
            &Toolchain::with_tools("g++", "ar"),
            &PlanOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::MissingSources { .. }));
    }

    #[test]
    fn write_atomic_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("debug/build.ninja");
        write_atomic("default app\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "default app\n");
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
