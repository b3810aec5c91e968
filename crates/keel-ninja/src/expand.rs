//! Variable expansion and path unescaping.
//!
//! Implements the reader's side of the `$` conventions: `$$` is a literal
//! `$`, `$ ` and `$:` are literal space and colon, `$name` and `${name}`
//! are variable references resolved against a local scope that shadows the
//! file scope. Unknown variables expand to the empty string, as Ninja does.

use std::collections::BTreeMap;

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn lookup<'a>(
    name: &str,
    file_scope: &'a BTreeMap<String, String>,
    local_scope: &'a BTreeMap<String, String>,
) -> &'a str {
    local_scope
        .get(name)
        .or_else(|| file_scope.get(name))
        .map(String::as_str)
        .unwrap_or("")
}

/// Expand `$`-references in `text` against the given scopes.
pub fn expand(
    text: &str,
    file_scope: &BTreeMap<String, String>,
    local_scope: &BTreeMap<String, String>,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some(' ') => {
                chars.next();
                out.push(' ');
            }
            Some(':') => {
                chars.next();
                out.push(':');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == '}' {
                        break;
                    }
                    name.push(c);
                }
                out.push_str(lookup(&name, file_scope, local_scope));
            }
            Some(&c) if is_var_char(c) => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if !is_var_char(c) {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                out.push_str(lookup(&name, file_scope, local_scope));
            }
            _ => out.push('$'),
        }
    }
    out
}

/// Undo [`crate::escape_path`]: `$$` → `$`, `$ ` → space, `$:` → colon.
///
/// A `$` that does not begin one of those sequences is kept literally, so
/// the unescape of an escaped path always returns the original.
pub fn unescape_path(p: &str) -> String {
    let mut out = String::with_capacity(p.len());
    let mut chars = p.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some(' ') => {
                chars.next();
                out.push(' ');
            }
            Some(':') => {
                chars.next();
                out.push(':');
            }
            _ => out.push('$'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::escape_path;

    fn scope(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expands_bare_and_braced_references() {
        let file = scope(&[("cxx", "g++"), ("out", "a.o")]);
        let local = BTreeMap::new();
        assert_eq!(expand("$cxx -o $out", &file, &local), "g++ -o a.o");
        assert_eq!(expand("${cxx}-12", &file, &local), "g++-12");
    }

    #[test]
    fn local_scope_shadows_file_scope() {
        let file = scope(&[("cxxflags", "-O0")]);
        let local = scope(&[("cxxflags", "-O3")]);
        assert_eq!(expand("$cxxflags", &file, &local), "-O3");
    }

    #[test]
    fn unknown_variable_is_empty() {
        let empty = BTreeMap::new();
        assert_eq!(expand("x$missing/y", &empty, &empty), "x/y");
    }

    #[test]
    fn dollar_dollar_is_literal() {
        let empty = BTreeMap::new();
        assert_eq!(expand("cost: $$5", &empty, &empty), "cost: $5");
    }

    #[test]
    fn escaped_separators_are_literal() {
        let empty = BTreeMap::new();
        assert_eq!(expand("a$ b$:c", &empty, &empty), "a b:c");
    }

    #[test]
    fn path_escape_round_trips() {
        for p in [
            "plain/path.o",
            "weird file:name.o",
            "src/weird space.c",
            "a$ b",
            "many   spaces",
            "col:on:s",
            "trailing ",
            "lone$dollar",
        ] {
            assert_eq!(unescape_path(&escape_path(p)), p, "path {p:?}");
        }
    }
}
