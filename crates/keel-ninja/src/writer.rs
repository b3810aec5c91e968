//! The `build.ninja` document writer.
//!
//! Follows the reference `ninja_syntax` emitter: every line funnels through
//! one wrap routine that breaks long lines at unescaped spaces (even count
//! of `$` immediately before the space), continues with two extra indent
//! levels, and marks each broken line with a trailing ` $`.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{NinjaError, Result};
use crate::escape::escape_path;

const DEFAULT_WIDTH: usize = 78;

/// Optional attributes of a `rule` declaration.
///
/// Absent fields are not emitted at all; Ninja treats `key =` as unsetting
/// a value, so the empty string is never used as a stand-in for "absent".
#[derive(Debug, Clone, Default)]
pub struct RuleOptions {
    pub description: Option<String>,
    pub depfile: Option<String>,
    pub generator: bool,
    pub pool: Option<String>,
    pub restat: bool,
    pub rspfile: Option<String>,
    pub rspfile_content: Option<String>,
    pub deps: Option<String>,
}

/// Inputs and attributes of a `build` statement.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub inputs: Vec<String>,
    pub implicit: Vec<String>,
    pub order_only: Vec<String>,
    pub implicit_outputs: Vec<String>,
    pub pool: Option<String>,
    pub dyndep: Option<String>,
    /// Local variable assignments, emitted in the given order.
    pub variables: Vec<(String, String)>,
}

/// A streaming writer for a Ninja build description.
///
/// Pure sink: output accumulates in memory and reaches the filesystem only
/// through [`Writer::save`], which writes a temp sibling and renames it into
/// place. Output is byte-deterministic for a given call sequence.
#[derive(Debug)]
pub struct Writer {
    buf: String,
    width: usize,
    rules: BTreeSet<String>,
    saw_include: bool,
}

impl Writer {
    pub fn new() -> Self {
        Self::with_width(DEFAULT_WIDTH)
    }

    pub fn with_width(width: usize) -> Self {
        Writer {
            buf: String::new(),
            width,
            rules: BTreeSet::new(),
            saw_include: false,
        }
    }

    /// Emit a blank line.
    pub fn newline(&mut self) {
        self.buf.push('\n');
    }

    /// Emit a `#` comment, word-wrapped to the writer's width.
    pub fn comment(&mut self, text: &str) {
        let limit = self.width.saturating_sub(2).max(1);
        let mut line = String::new();
        for word in text.split_whitespace() {
            if !line.is_empty() && line.len() + 1 + word.len() > limit {
                self.buf.push_str("# ");
                self.buf.push_str(&line);
                self.buf.push('\n');
                line.clear();
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(word);
        }
        self.buf.push_str("# ");
        self.buf.push_str(&line);
        self.buf.push('\n');
    }

    /// Emit `key = value` at the given indent level.
    ///
    /// An empty value is omitted entirely.
    pub fn variable(&mut self, key: &str, value: &str, indent: usize) -> Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        check_no_newline(key)?;
        check_no_newline(value)?;
        self.emit_line(&format!("{key} = {value}"), indent);
        Ok(())
    }

    /// Emit `key = v1 v2 …`; an empty list is omitted entirely.
    pub fn variable_list(&mut self, key: &str, values: &[String], indent: usize) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.variable(key, &values.join(" "), indent)
    }

    /// Declare a pool with the given depth.
    pub fn pool(&mut self, name: &str, depth: u32) -> Result<()> {
        check_no_newline(name)?;
        self.emit_line(&format!("pool {name}"), 0);
        self.variable("depth", &depth.to_string(), 1)
    }

    /// Declare a rule. Optional attributes follow `command` in the fixed
    /// order description, depfile, generator, pool, restat, rspfile,
    /// rspfile_content, deps; `generator` and `restat` emit `= 1` when set.
    pub fn rule(&mut self, name: &str, command: &str, opts: &RuleOptions) -> Result<()> {
        check_no_newline(name)?;
        self.emit_line(&format!("rule {name}"), 0);
        self.variable("command", command, 1)?;
        if let Some(description) = &opts.description {
            self.variable("description", description, 1)?;
        }
        if let Some(depfile) = &opts.depfile {
            self.variable("depfile", depfile, 1)?;
        }
        if opts.generator {
            self.variable("generator", "1", 1)?;
        }
        if let Some(pool) = &opts.pool {
            self.variable("pool", pool, 1)?;
        }
        if opts.restat {
            self.variable("restat", "1", 1)?;
        }
        if let Some(rspfile) = &opts.rspfile {
            self.variable("rspfile", rspfile, 1)?;
        }
        if let Some(content) = &opts.rspfile_content {
            self.variable("rspfile_content", content, 1)?;
        }
        if let Some(deps) = &opts.deps {
            self.variable("deps", deps, 1)?;
        }
        self.rules.insert(name.to_string());
        Ok(())
    }

    /// Emit a `build` statement and return the (unescaped) outputs.
    ///
    /// Inputs compose as explicit, `|` implicit, `||` order-only; outputs as
    /// explicit, `|` implicit. Empty groups and their separators are elided.
    /// All paths are path-escaped. The rule must have been declared earlier
    /// in this file (or be `phony`), unless an `include` has been emitted.
    pub fn build(
        &mut self,
        outputs: &[String],
        rule: &str,
        opts: &BuildOptions,
    ) -> Result<Vec<String>> {
        if rule != "phony" && !self.rules.contains(rule) && !self.saw_include {
            return Err(NinjaError::UndeclaredRule {
                rule: rule.to_string(),
            });
        }

        let mut out = join_paths(outputs)?;
        if !opts.implicit_outputs.is_empty() {
            out.push_str(" | ");
            out.push_str(&join_paths(&opts.implicit_outputs)?);
        }

        let mut parts = vec![rule.to_string()];
        for input in &opts.inputs {
            parts.push(path(input)?);
        }
        if !opts.implicit.is_empty() {
            parts.push("|".to_string());
            for input in &opts.implicit {
                parts.push(path(input)?);
            }
        }
        if !opts.order_only.is_empty() {
            parts.push("||".to_string());
            for input in &opts.order_only {
                parts.push(path(input)?);
            }
        }

        self.emit_line(&format!("build {out}: {}", parts.join(" ")), 0);

        if let Some(pool) = &opts.pool {
            self.variable("pool", pool, 1)?;
        }
        if let Some(dyndep) = &opts.dyndep {
            self.variable("dyndep", dyndep, 1)?;
        }
        for (key, value) in &opts.variables {
            self.variable(key, value, 1)?;
        }
        Ok(outputs.to_vec())
    }

    /// Emit an `include` statement. Rules declared by the included file are
    /// visible here, so later `build` statements skip the local rule check.
    pub fn include(&mut self, path: &str) -> Result<()> {
        check_no_newline(path)?;
        self.emit_line(&format!("include {path}"), 0);
        self.saw_include = true;
        Ok(())
    }

    /// Emit a `subninja` statement (the child has its own scope).
    pub fn subninja(&mut self, path: &str) -> Result<()> {
        check_no_newline(path)?;
        self.emit_line(&format!("subninja {path}"), 0);
        Ok(())
    }

    /// Emit a `default` statement naming the given targets.
    pub fn defaults(&mut self, paths: &[String]) -> Result<()> {
        self.emit_line(&format!("default {}", join_paths(paths)?), 0);
        Ok(())
    }

    /// Consume the writer, yielding the finished document.
    pub fn finish(self) -> String {
        self.buf
    }

    /// Current document contents.
    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Write the document to `path` atomically (temp sibling + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "build.ninja".to_string());
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));
        std::fs::write(&tmp, self.buf.as_bytes())?;
        if let Err(err) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    /// Word-wrap and append one logical line.
    fn emit_line(&mut self, text: &str, indent: usize) {
        let mut text = text;
        let mut leading = "  ".repeat(indent);
        while leading.len() + text.len() > self.width {
            // Leave room for the trailing " $" continuation marker.
            let available = self.width.saturating_sub(leading.len() + 2);
            let Some(idx) = break_index(text, available) else {
                break;
            };
            self.buf.push_str(&leading);
            self.buf.push_str(&text[..idx]);
            self.buf.push_str(" $\n");
            text = &text[idx + 1..];
            leading = "  ".repeat(indent + 2);
        }
        self.buf.push_str(&leading);
        self.buf.push_str(text);
        self.buf.push('\n');
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

fn check_no_newline(value: &str) -> Result<()> {
    if value.contains('\n') {
        return Err(NinjaError::EmbeddedNewline {
            value: value.to_string(),
        });
    }
    Ok(())
}

fn path(p: &str) -> Result<String> {
    check_no_newline(p)?;
    Ok(escape_path(p))
}

fn join_paths(paths: &[String]) -> Result<String> {
    let escaped: Vec<String> = paths.iter().map(|p| path(p)).collect::<Result<_>>()?;
    Ok(escaped.join(" "))
}

/// Number of consecutive `$` bytes immediately before `idx`.
fn dollars_before(bytes: &[u8], idx: usize) -> usize {
    bytes[..idx].iter().rev().take_while(|&&b| b == b'$').count()
}

/// Pick a break point for a line that exceeds the width.
///
/// Prefers the rightmost unescaped space left of `limit`; failing that, the
/// leftmost unescaped space at or right of it. `None` means the line goes
/// out unwrapped.
fn break_index(text: &str, limit: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = limit.min(bytes.len());
    while i > 0 {
        i -= 1;
        if bytes[i] == b' ' && dollars_before(bytes, i) % 2 == 0 {
            return Some(i);
        }
    }
    let mut i = limit;
    while i < bytes.len() {
        if bytes[i] == b' ' && dollars_before(bytes, i) % 2 == 0 {
            return Some(i);
        }
        i += 1;
    }
    None
}
