//! Glob-style exclude patterns for source items.
//!
//! Patterns without a `/` match the file name anywhere (`*.tmp`); patterns with
//! a `/` match the full relative path (`Designs/drafts/**`). `*` and `?` stay
//! within one path segment, `**` crosses segments.

use regex::Regex;

use crate::error::SyncError;

#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    by_name: Vec<Regex>,
    by_path: Vec<Regex>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self, SyncError> {
        let mut set = ExcludeSet::default();
        for pattern in patterns {
            let regex = Regex::new(&glob_to_regex(pattern))
                .map_err(|e| SyncError::Config(format!("invalid exclude pattern {pattern:?}: {e}")))?;
            if pattern.contains('/') {
                set.by_path.push(regex);
            } else {
                set.by_name.push(regex);
            }
        }
        Ok(set)
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        self.by_name.iter().any(|r| r.is_match(name)) || self.by_path.iter().any(|r| r.is_match(path))
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}
