//! Static reference checks for queries.
//!
//! The engine treats a reference to an undefined rule as "undefined" at
//! evaluation time, so a typo in the query would silently deny every
//! decision. [`ModuleIndex`] records the package and top-level rule names a
//! module defines so the query can be checked once during preparation.

use crate::{Error, Result};

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn package_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^\s*package\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)")
            .expect("package pattern is valid")
    })
}

// Rule heads: `allow {`, `allow if`, `x := 1`, `deny[msg] {`,
// `deny contains msg if`, `f(x) = y {`, `default allow = false`.
// Only lines that begin outside any rule body are matched.
fn rule_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(?:default\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*(?:\{|:?=|\[|\(|\.|contains\b|if\b)",
        )
        .expect("rule pattern is valid")
    })
}

// `data` must start a term: not the tail of `input.data` or `metadata`.
fn data_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[^A-Za-z0-9_.])data((?:\.[A-Za-z_][A-Za-z0-9_]*)+)")
            .expect("data ref pattern is valid")
    })
}

/// Blank out string literals and comments, keeping quotes, newlines and
/// byte offsets, so the patterns above only see code.
fn strip_literals(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                out.push('"');
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            out.push(' ');
                            if let Some(escaped) = chars.next() {
                                blank(&mut out, escaped);
                            }
                        }
                        '"' => {
                            out.push('"');
                            break;
                        }
                        other => blank(&mut out, other),
                    }
                }
            }
            '`' => {
                out.push('`');
                for c in chars.by_ref() {
                    if c == '`' {
                        out.push('`');
                        break;
                    }
                    blank(&mut out, c);
                }
            }
            '#' => {
                out.push(' ');
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                    blank(&mut out, c);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn blank(out: &mut String, c: char) {
    if c == '\n' {
        out.push('\n');
    } else {
        out.push(' ');
    }
}

const KEYWORDS: [&str; 10] = [
    "package", "import", "default", "not", "some", "every", "with", "as", "else", "in",
];

/// Package path and rule names declared by one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleIndex {
    package: Vec<String>,
    rules: BTreeSet<String>,
}

impl ModuleIndex {
    /// Scan module source for its package declaration and rule heads.
    pub fn scan(module_name: &str, content: &str) -> Result<Self> {
        let code = strip_literals(content);
        let package = package_pattern()
            .captures(&code)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().split('.').map(str::to_string).collect::<Vec<_>>())
            .ok_or_else(|| Error::compilation_in("Module has no package declaration", module_name))?;

        let mut rules = BTreeSet::new();
        let mut depth = 0usize;
        for line in code.lines() {
            if depth == 0 {
                if let Some(name) = rule_pattern().captures(line).and_then(|c| c.get(1)) {
                    if !KEYWORDS.contains(&name.as_str()) {
                        rules.insert(name.as_str().to_string());
                    }
                }
            }
            for c in line.chars() {
                match c {
                    '{' | '[' | '(' => depth += 1,
                    '}' | ']' | ')' => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
        }

        Ok(Self { package, rules })
    }

    /// Package path segments, e.g. `["authz", "http"]`.
    pub fn package(&self) -> &[String] {
        &self.package
    }

    /// Whether a top-level rule with this name is defined.
    pub fn defines(&self, rule: &str) -> bool {
        self.rules.contains(rule)
    }

    /// Check that every `data.*` reference in `query` resolves into this module.
    ///
    /// A reference may name an ancestor of the package, the package itself, or
    /// a rule inside it. Anything else is reported as unresolved.
    pub fn check_query(&self, query: &str) -> Result<()> {
        let code = strip_literals(query);
        for captures in data_ref_pattern().captures_iter(&code) {
            let Some(path) = captures.get(1) else {
                continue;
            };
            let segments: Vec<&str> = path.as_str().trim_start_matches('.').split('.').collect();
            self.resolve(&segments).map_err(|reason| {
                Error::compilation(format!(
                    "unresolved reference data.{}: {}",
                    segments.join("."),
                    reason
                ))
            })?;
        }
        Ok(())
    }

    fn resolve(&self, segments: &[&str]) -> std::result::Result<(), String> {
        let shared = segments
            .iter()
            .zip(self.package.iter())
            .take_while(|(a, b)| **a == b.as_str())
            .count();

        if shared == segments.len() {
            // data.a or data.a.b for package a.b
            return Ok(());
        }

        if shared < self.package.len() {
            return Err(format!("package {} is not defined", segments[..=shared].join(".")));
        }

        let rule = segments[shared];
        if self.defines(rule) {
            Ok(())
        } else {
            Err(format!("rule {} is not defined in package {}", rule, self.package.join(".")))
        }
    }
}
