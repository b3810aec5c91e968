//! `$`-escaping for Ninja values.
//!
//! Ninja has two escaping contexts. Paths on `build` lines must escape
//! spaces and colons (both are separators there); everywhere else only `$`
//! itself needs protection. Newlines cannot be escaped at all and are
//! rejected by the writer before any of these run.

/// Escape a plain (non-path) string: `$` becomes `$$`.
pub fn escape(s: &str) -> String {
    s.replace('$', "$$")
}

/// Escape a path for use on a `build` line.
///
/// Applies, in order: `"$ "` → `"$$ "`, `" "` → `"$ "`, `":"` → `"$:"`.
/// The sequencing matters: a pre-existing `$`-before-space gains its own
/// escape before the space itself is escaped.
pub fn escape_path(p: &str) -> String {
    p.replace("$ ", "$$ ").replace(' ', "$ ").replace(':', "$:")
}
