//! Semantic version selection helpers.
//!
//! Thin wrappers over the `semver` crate. Range syntax (exact, caret,
//! tilde, comparisons, wildcard, comma conjunction) and pre-release
//! precedence follow semver 2.0 as implemented by `semver`; in particular
//! a pre-release only matches a requirement that explicitly allows it.

pub type Version = semver::Version;
pub type VersionReq = semver::VersionReq;

/// Parse a version string like `1.2.3-alpha.1`.
pub fn parse_version(s: &str) -> Result<Version, semver::Error> {
    Version::parse(s)
}

/// Parse a requirement string like `^1.2`, `~0.4`, `>=1, <2`.
pub fn parse_requirement(s: &str) -> Result<VersionReq, semver::Error> {
    VersionReq::parse(s)
}

/// Candidate versions sorted descending by semver precedence, deduplicated.
/// Registry responses are sorted locally so resolution stays deterministic
/// regardless of server ordering.
pub fn candidates_desc(available: &[Version]) -> Vec<Version> {
    let mut sorted = available.to_vec();
    sorted.sort();
    sorted.dedup();
    sorted.reverse();
    sorted
}

/// True when `version` satisfies every requirement in the intersection.
pub fn matches_all<'a, I>(version: &Version, requirements: I) -> bool
where
    I: IntoIterator<Item = &'a VersionReq>,
{
    requirements.into_iter().all(|req| req.matches(version))
}

/// The highest version satisfying all requirements, if any.
pub fn best_match<'a>(
    available: &[Version],
    requirements: &[&'a VersionReq],
) -> Option<Version> {
    candidates_desc(available)
        .into_iter()
        .find(|v| matches_all(v, requirements.iter().copied()))
}
