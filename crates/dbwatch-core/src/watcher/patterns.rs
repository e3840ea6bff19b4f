//! Glob matching for watched and ignored paths.
//!
//! Globs are compiled to anchored regexes and matched against the full
//! `/`-separated path. Supported syntax: `**`, `*`, `?` and `{a,b}`.

use crate::error::{DbWatchError, Result};
use regex::Regex;
use std::path::Path;

/// Compiled include and ignore globs.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    patterns: Vec<Regex>,
    ignored: Vec<Regex>,
}

impl PathMatcher {
    pub fn new(patterns: &[String], ignored: &[String]) -> Result<Self> {
        Ok(Self {
            patterns: compile_all("patterns", patterns)?,
            ignored: compile_all("ignored", ignored)?,
        })
    }

    /// True for files that match an include glob and no ignore glob.
    pub fn is_match(&self, path: &Path) -> bool {
        let normalized = normalize(path);
        self.patterns.iter().any(|re| re.is_match(&normalized))
            && !self.ignored.iter().any(|re| re.is_match(&normalized))
    }

    /// True if a directory (and so everything below it) is ignored.
    pub fn is_ignored_dir(&self, path: &Path) -> bool {
        let mut normalized = normalize(path);
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        self.ignored.iter().any(|re| re.is_match(&normalized))
    }
}

fn compile_all(field: &str, globs: &[String]) -> Result<Vec<Regex>> {
    globs
        .iter()
        .map(|glob| {
            Regex::new(&glob_to_regex(glob)).map_err(|e| {
                DbWatchError::validation(field, format!("invalid glob '{}': {}", glob, e))
            })
        })
        .collect()
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Translate a glob into an anchored regex source string.
pub fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut in_group = false;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '{' if !in_group && chars[i + 1..].contains(&'}') => {
                in_group = true;
                out.push_str("(?:");
            }
            ',' if in_group => out.push('|'),
            '}' if in_group => {
                in_group = false;
                out.push(')');
            }
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
        i += 1;
    }

    out.push('$');
    out
}
