//! Dependency resolution.
//!
//! Backtracking selection over registry candidates: requirements carry a
//! provenance chain from the root; all active constraints on a name are
//! intersected; candidates are tried highest-first, recursing into each
//! candidate's declared dependencies. A conflict unwinds to the most recent
//! decision that still has an older candidate; exhausting the root's choice
//! set yields a structured report of every constraint chain. Path and git
//! dependencies are pinned: materialized up front, never subject to
//! selection, participating in intersection only as the version their
//! manifest declares.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;

use keel_manifest::{DependencySource, GitReference, Manifest};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::client::Registry;
use crate::error::{RegistryError, Result};
use crate::store::SourceStore;
use crate::version::{candidates_desc, matches_all, Version};

/// Where a resolved package's sources come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// The project being built.
    Root,
    /// Selected from the registry; sources arrive via the store.
    Registry,
    /// Pinned local directory.
    Path(PathBuf),
    /// Pinned git checkout.
    Git { url: String, reference: GitReference },
}

/// A manifest pinned to an exact version, plus the location of its
/// unpacked sources once known.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub name: String,
    pub version: Version,
    pub manifest: Manifest,
    pub origin: Origin,
    /// Unpacked source tree. Present immediately for the root and pinned
    /// dependencies; filled in by [`SourceStore::ensure_set`] for registry
    /// packages.
    pub source_dir: Option<PathBuf>,
}

/// The frozen result of resolution: an arena of packages (root at index 0)
/// with dependency edges as index pairs. Exactly one version per name.
#[derive(Debug, Clone)]
pub struct ResolutionSet {
    packages: Vec<ResolvedPackage>,
    edges: Vec<(usize, usize)>,
}

impl ResolutionSet {
    pub fn root(&self) -> &ResolvedPackage {
        &self.packages[0]
    }

    pub fn packages(&self) -> &[ResolvedPackage] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<(usize, &ResolvedPackage)> {
        self.packages
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
    }

    /// Direct dependencies of a package, sorted by name.
    pub fn deps_of(&self, index: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .edges
            .iter()
            .filter(|(from, _)| *from == index)
            .map(|(_, to)| *to)
            .collect();
        deps.sort_by(|a, b| self.packages[*a].name.cmp(&self.packages[*b].name));
        deps.dedup();
        deps
    }

    /// How many packages depend on this one.
    pub fn dependers_count(&self, index: usize) -> usize {
        let mut froms: Vec<usize> = self
            .edges
            .iter()
            .filter(|(_, to)| *to == index)
            .map(|(from, _)| *from)
            .collect();
        froms.dedup();
        froms.len()
    }

    /// Indices of registry packages still waiting for sources.
    pub fn pending_sources(&self) -> Vec<usize> {
        self.packages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.origin == Origin::Registry && p.source_dir.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn set_source_dir(&mut self, index: usize, dir: PathBuf) {
        self.packages[index].source_dir = Some(dir);
    }

    /// Dependency-first topological order, ties broken by package name.
    pub fn topo_order(&self) -> Vec<usize> {
        let n = self.packages.len();
        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut dependers: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(from, to) in &self.edges {
            if deps[from].insert(to) {
                dependers[to].push(from);
            }
        }
        let mut remaining: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<(&str, usize)> = (0..n)
            .filter(|&i| remaining[i] == 0)
            .map(|i| (self.packages[i].name.as_str(), i))
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some(&(name, i)) = ready.iter().next() {
            ready.remove(&(name, i));
            order.push(i);
            for &d in &dependers[i] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert((self.packages[d].name.as_str(), d));
                }
            }
        }
        debug_assert_eq!(order.len(), n);
        order
    }

    /// Non-root packages, dependers before their dependencies: the order
    /// archives appear on the link line.
    pub fn link_order(&self) -> Vec<usize> {
        let mut order = self.topo_order();
        order.reverse();
        order.retain(|&i| i != 0);
        order
    }
}

/// Inputs to [`resolve`] beyond the manifest and registry.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Host triple used to activate `[target.<triple>]` tables.
    pub host_triple: String,
    /// Include the root's dev-dependencies (test builds).
    pub include_dev: bool,
    /// Project directory; path dependencies resolve relative to it.
    pub base_dir: PathBuf,
    pub cancel: CancelToken,
}

#[derive(Clone)]
struct Pending {
    name: String,
    source: DependencySource,
    from: usize,
    /// Package names from the root down to the depender, for cycle checks.
    path_names: Vec<String>,
    /// Human-readable provenance, e.g. `root -> b ^1 -> a ^2`.
    chain: String,
}

#[derive(Clone)]
struct State {
    agenda: VecDeque<Pending>,
    packages: Vec<ResolvedPackage>,
    chosen: BTreeMap<String, usize>,
    constraints: BTreeMap<String, Vec<Pending>>,
    edges: Vec<(usize, usize)>,
}

/// Conflicts are backtrack triggers; everything else aborts resolution.
enum SolveError {
    Conflict(RegistryError),
    Fatal(RegistryError),
}

impl SolveError {
    fn into_inner(self) -> RegistryError {
        match self {
            SolveError::Conflict(e) | SolveError::Fatal(e) => e,
        }
    }
}

struct Ctx<'a> {
    registry: &'a dyn Registry,
    store: &'a SourceStore,
    opts: &'a ResolveOptions,
}

/// Resolve a root manifest against a registry into a pinned, deduplicated,
/// acyclic set. Deterministic for identical registry state and manifest.
pub fn resolve(
    root: &Manifest,
    registry: &dyn Registry,
    store: &SourceStore,
    opts: &ResolveOptions,
) -> Result<ResolutionSet> {
    let root_name = root.package.name.clone();
    let mut state = State {
        agenda: VecDeque::new(),
        packages: vec![ResolvedPackage {
            name: root_name.clone(),
            version: root.package.version.clone(),
            manifest: root.clone(),
            origin: Origin::Root,
            source_dir: Some(opts.base_dir.clone()),
        }],
        chosen: BTreeMap::from([(root_name.clone(), 0)]),
        constraints: BTreeMap::new(),
        edges: Vec::new(),
    };

    enqueue_requirements(
        &mut state.agenda,
        root.requirements(&opts.host_triple, opts.include_dev),
        0,
        &[root_name.clone()],
        "root",
    )?;

    let ctx = Ctx {
        registry,
        store,
        opts,
    };
    let mut done = solve(state, &ctx).map_err(SolveError::into_inner)?;

    done.edges.sort_unstable();
    done.edges.dedup();
    Ok(ResolutionSet {
        packages: done.packages,
        edges: done.edges,
    })
}

fn solve(mut state: State, ctx: &Ctx<'_>) -> std::result::Result<State, SolveError> {
    let Some(req) = state.agenda.pop_front() else {
        return Ok(state);
    };
    ctx.opts.cancel.check().map_err(SolveError::Fatal)?;

    // A requirement on a name already on its own provenance path is a
    // back-edge.
    if let Some(start) = req.path_names.iter().position(|n| *n == req.name) {
        let mut cycle: Vec<String> = req.path_names[start..].to_vec();
        cycle.push(req.name.clone());
        return Err(SolveError::Fatal(RegistryError::DependencyCycle { cycle }));
    }

    state
        .constraints
        .entry(req.name.clone())
        .or_default()
        .push(req.clone());

    if let Some(&index) = state.chosen.get(&req.name) {
        let satisfied = match &req.source {
            DependencySource::Registry(range) => range.matches(&state.packages[index].version),
            pinned => {
                let dir = ctx
                    .store
                    .materialize_pinned(&req.name, pinned, &ctx.opts.base_dir, &ctx.opts.cancel)
                    .map_err(SolveError::Fatal)?;
                state.packages[index].source_dir.as_deref() == Some(dir.as_path())
            }
        };
        if !satisfied {
            return Err(SolveError::Conflict(no_version_error(&state, &req.name)));
        }
        state.edges.push((req.from, index));
        return solve(state, ctx);
    }

    match req.source.clone() {
        DependencySource::Registry(_) => choose_from_registry(state, req, ctx),
        pinned => add_pinned(state, req, pinned, ctx),
    }
}

fn choose_from_registry(
    state: State,
    req: Pending,
    ctx: &Ctx<'_>,
) -> std::result::Result<State, SolveError> {
    let active: Vec<semver::VersionReq> = state.constraints[&req.name]
        .iter()
        .filter_map(|p| match &p.source {
            DependencySource::Registry(range) => Some(range.clone()),
            _ => None,
        })
        .collect();

    let available = ctx
        .registry
        .versions(&req.name)
        .map_err(SolveError::Fatal)?;
    let candidates: Vec<Version> = candidates_desc(&available)
        .into_iter()
        .filter(|v| matches_all(v, active.iter()))
        .collect();
    if candidates.is_empty() {
        return Err(SolveError::Conflict(no_version_error(&state, &req.name)));
    }

    let mut last_conflict = None;
    for version in candidates {
        let manifest = ctx
            .registry
            .manifest(&req.name, &version)
            .map_err(SolveError::Fatal)?;
        debug!(name = %req.name, %version, "trying candidate");

        let mut next = state.clone();
        let index = next.packages.len();
        next.packages.push(ResolvedPackage {
            name: req.name.clone(),
            version,
            manifest: manifest.clone(),
            origin: Origin::Registry,
            source_dir: None,
        });
        next.chosen.insert(req.name.clone(), index);
        next.edges.push((req.from, index));
        push_dependencies(&mut next, index, &manifest, &req, ctx)?;

        match solve(next, ctx) {
            Ok(done) => return Ok(done),
            Err(SolveError::Conflict(err)) => {
                debug!(name = %req.name, %err, "candidate conflicts, backtracking");
                last_conflict = Some(err);
            }
            Err(fatal) => return Err(fatal),
        }
    }
    Err(SolveError::Conflict(
        last_conflict.unwrap_or_else(|| no_version_error(&state, &req.name)),
    ))
}

fn add_pinned(
    mut state: State,
    req: Pending,
    pinned: DependencySource,
    ctx: &Ctx<'_>,
) -> std::result::Result<State, SolveError> {
    let dir = ctx
        .store
        .materialize_pinned(&req.name, &pinned, &ctx.opts.base_dir, &ctx.opts.cancel)
        .map_err(SolveError::Fatal)?;
    let manifest =
        Manifest::from_path(&dir.join(keel_manifest::MANIFEST_FILE)).map_err(|err| {
            SolveError::Fatal(RegistryError::PinnedSource {
                name: req.name.clone(),
                detail: err.to_string(),
            })
        })?;
    if manifest.package.name != req.name {
        return Err(SolveError::Fatal(RegistryError::PinnedSource {
            name: req.name.clone(),
            detail: format!(
                "manifest at {} declares package '{}'",
                dir.display(),
                manifest.package.name
            ),
        }));
    }

    // The declared version participates in intersection only.
    let declared = manifest.package.version.clone();
    let violates = state.constraints[&req.name].iter().any(|p| match &p.source {
        DependencySource::Registry(range) => !range.matches(&declared),
        _ => false,
    });
    if violates {
        return Err(SolveError::Conflict(no_version_error(&state, &req.name)));
    }

    let origin = match pinned {
        DependencySource::Path(path) => Origin::Path(path),
        DependencySource::Git { url, reference } => Origin::Git { url, reference },
        DependencySource::Registry(_) => unreachable!("pinned source"),
    };
    let index = state.packages.len();
    state.packages.push(ResolvedPackage {
        name: req.name.clone(),
        version: declared,
        manifest: manifest.clone(),
        origin,
        source_dir: Some(dir),
    });
    state.chosen.insert(req.name.clone(), index);
    state.edges.push((req.from, index));
    push_dependencies(&mut state, index, &manifest, &req, ctx)?;
    solve(state, ctx)
}

fn push_dependencies(
    state: &mut State,
    from: usize,
    manifest: &Manifest,
    via: &Pending,
    ctx: &Ctx<'_>,
) -> std::result::Result<(), SolveError> {
    let mut path_names = via.path_names.clone();
    path_names.push(via.name.clone());
    // Dev-dependencies of non-root packages never participate.
    enqueue_requirements(
        &mut state.agenda,
        manifest.requirements(&ctx.opts.host_triple, false),
        from,
        &path_names,
        &via.chain,
    )
    .map_err(SolveError::Fatal)
}

/// Queue requirements, pinned sources ahead of ranged ones so a pin is in
/// place before any registry range on the same name is examined.
fn enqueue_requirements(
    agenda: &mut VecDeque<Pending>,
    requirements: BTreeMap<String, keel_manifest::DependencySpec>,
    from: usize,
    path_names: &[String],
    chain_base: &str,
) -> Result<()> {
    let mut pinned = Vec::new();
    let mut ranged = Vec::new();
    for (name, spec) in requirements {
        let source = spec.source(&name)?;
        let pending = Pending {
            chain: format!("{chain_base} -> {}", describe(&name, &source)),
            name,
            source,
            from,
            path_names: path_names.to_vec(),
        };
        match &pending.source {
            DependencySource::Registry(_) => ranged.push(pending),
            _ => pinned.push(pending),
        }
    }
    for pending in pinned.into_iter().rev() {
        agenda.push_front(pending);
    }
    for pending in ranged {
        agenda.push_back(pending);
    }
    Ok(())
}

fn describe(name: &str, source: &DependencySource) -> String {
    match source {
        DependencySource::Registry(range) => format!("{name} {range}"),
        DependencySource::Path(_) => format!("{name} (path)"),
        DependencySource::Git { .. } => format!("{name} (git)"),
    }
}

fn no_version_error(state: &State, name: &str) -> RegistryError {
    let chains = state
        .constraints
        .get(name)
        .map(|reqs| reqs.iter().map(|r| r.chain.clone()).collect())
        .unwrap_or_default();
    RegistryError::NoVersionSatisfies {
        name: name.to_string(),
        chains,
    }
}
