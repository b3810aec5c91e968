//! Dependency tree display.
//!
//! Renders a resolution set as a human-readable ASCII tree:
//! ```text
//! app v0.3.1
//! ├── fmt v10.1.2
//! └── net v1.2.0
//!     └── fmt v10.1.2 (shared)
//! ```

use crate::resolve::{Origin, ResolutionSet};

/// Format the resolution as a tree rooted at the project.
pub fn format_tree(set: &ResolutionSet) -> String {
    let root = set.root();
    let mut out = format!("{} v{}\n", root.name, root.version);

    let deps = set.deps_of(0);
    let count = deps.len();
    for (i, dep) in deps.iter().enumerate() {
        format_node(set, *dep, "", i == count - 1, &mut out);
    }

    out.push_str(&format!(
        "\n{} dependencies ({} unique)\n",
        count_nodes(set, 0),
        set.len() - 1
    ));
    out
}

fn format_node(set: &ResolutionSet, index: usize, prefix: &str, is_last: bool, out: &mut String) {
    let package = &set.packages()[index];
    let connector = if is_last { "└── " } else { "├── " };
    let marker = match &package.origin {
        _ if set.dependers_count(index) > 1 => " (shared)",
        Origin::Path(_) => " (path)",
        Origin::Git { .. } => " (git)",
        _ => "",
    };
    out.push_str(&format!(
        "{prefix}{connector}{} v{}{marker}\n",
        package.name, package.version
    ));

    let child_prefix = if is_last {
        format!("{prefix}    ")
    } else {
        format!("{prefix}│   ")
    };
    let children = set.deps_of(index);
    let count = children.len();
    for (i, child) in children.iter().enumerate() {
        format_node(set, *child, &child_prefix, i == count - 1, out);
    }
}

fn count_nodes(set: &ResolutionSet, index: usize) -> usize {
    let children = set.deps_of(index);
    children.len()
        + children
            .iter()
            .map(|&c| count_nodes(set, c))
            .sum::<usize>()
}

/// Flat listing of the resolved dependencies, one line per package.
pub fn format_flat(set: &ResolutionSet) -> String {
    let mut lines: Vec<String> = set
        .packages()
        .iter()
        .skip(1)
        .map(|p| {
            let marker = match &p.origin {
                Origin::Path(_) => " (path)",
                Origin::Git { .. } => " (git)",
                _ => "",
            };
            format!("{} v{}{marker}\n", p.name, p.version)
        })
        .collect();
    lines.sort();
    lines.concat()
}
