//! Include/exclude path filtering shared by capture and restore.
//!
//! Patterns are globs evaluated against slash-separated paths relative to the
//! capture root. `**` matches across path separators, `*` matches within a
//! single segment only. An exclude pattern ending in `/` applies to
//! directories only, so `**/build/` prunes a `build` directory but keeps a
//! regular file of that name.

use glob::{MatchOptions, Pattern};

use crate::error::Result;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Directories that are never worth snapshotting: VCS metadata, build output
/// and dependency caches.
const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    ".next",
    "coverage",
];

/// Default exclude globs: every [`DEFAULT_EXCLUDED_DIRS`] entry as a
/// directory at any depth, plus everything beneath it.
pub fn default_exclude_patterns() -> Vec<String> {
    let mut patterns = Vec::with_capacity(DEFAULT_EXCLUDED_DIRS.len() * 2 + 1);
    for dir in DEFAULT_EXCLUDED_DIRS {
        patterns.push(format!("**/{}/", dir));
        patterns.push(format!("**/{}/**", dir));
    }
    patterns.push("**/.DS_Store".to_string());
    patterns
}

/// Default include globs: everything.
pub fn default_include_patterns() -> Vec<String> {
    vec!["**".to_string()]
}

/// Compiled include/exclude rules.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    exclude_dirs: Vec<Pattern>,
    include_hidden: bool,
}

impl PathFilter {
    /// Compiles the given patterns. An empty include list matches everything.
    pub fn new(include: &[String], exclude: &[String], include_hidden: bool) -> Result<Self> {
        let (dir_only, any): (Vec<String>, Vec<String>) =
            exclude.iter().cloned().partition(|p| p.len() > 1 && p.ends_with('/'));
        let dir_only: Vec<String> = dir_only.iter().map(|p| p.trim_end_matches('/').to_string()).collect();
        Ok(Self {
            include: compile(include)?,
            exclude: compile(&any)?,
            exclude_dirs: compile(&dir_only)?,
            include_hidden,
        })
    }

    /// A filter that lets every path through.
    pub fn allow_all() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            exclude_dirs: Vec::new(),
            include_hidden: true,
        }
    }

    /// True when any segment of `path` starts with a dot.
    pub fn is_hidden(path: &str) -> bool {
        path.split('/').any(|segment| segment.starts_with('.') && segment != "." && segment != "..")
    }

    /// True when any exclude pattern that applies to files matches.
    pub fn is_excluded(&self, path: &str) -> bool {
        matches_any(&self.exclude, path)
    }

    /// True when any exclude pattern matches the directory `path`, including
    /// the directory-only ones.
    pub fn is_dir_excluded(&self, path: &str) -> bool {
        self.is_excluded(path) || matches_any(&self.exclude_dirs, path)
    }

    /// True when the include list is empty or any include pattern matches.
    pub fn is_included(&self, path: &str) -> bool {
        self.include.is_empty() || matches_any(&self.include, path)
    }

    /// Whether traversal may descend into this directory.
    pub fn allows_dir(&self, path: &str) -> bool {
        self.passes_hidden_rule(path) && !self.is_dir_excluded(path)
    }

    /// Whether this file passes the hidden rule, excludes and includes.
    pub fn allows_file(&self, path: &str) -> bool {
        self.passes_hidden_rule(path) && !self.is_excluded(path) && self.is_included(path)
    }

    fn passes_hidden_rule(&self, path: &str) -> bool {
        self.include_hidden || !Self::is_hidden(path)
    }
}

fn matches_any(patterns: &[Pattern], path: &str) -> bool {
    patterns.iter().any(|p| p.matches_with(path, MATCH_OPTIONS))
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| Pattern::new(p.trim_start_matches("./")).map_err(Into::into))
        .collect()
}
