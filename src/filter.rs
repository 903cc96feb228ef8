//! Ignore filter
//!
//! Pure decision function over root-relative paths: given the built-in
//! pattern set, the patterns parsed from the ignore file at the watch root,
//! the user's drop patterns, and the never-ignore override list, decide
//! whether a path is tracked. The filter never touches the filesystem after
//! construction.
//!
//! Decision order:
//! 1. Never-ignore patterns → keep
//! 2. Built-in patterns (VCS metadata, dependency directories, editor
//!    swap/backup files, OS metadata) → drop
//! 3. Ignore-file patterns in order, honoring negations; final flag → drop
//! 4. User patterns → drop
//! 5. Otherwise → keep
//!
//! Paths are matched with a leading `/` prepended so every segment boundary
//! is explicit in the pattern text.

use crate::error::Result;
use crate::types::MonitorConfig;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

/// Built-in drop patterns, matched against `/`-prefixed relative paths.
const BUILTIN_PATTERNS: &[&str] = &[
    // VCS metadata
    r"/\.git(/|$)",
    r"/\.svn(/|$)",
    r"/\.hg(/|$)",
    r"/\.jj(/|$)",
    // Dependency and build directories
    r"/node_modules(/|$)",
    r"/target(/|$)",
    r"/vendor(/|$)",
    r"/__pycache__(/|$)",
    r"/\.venv(/|$)",
    r"/venv(/|$)",
    // Editor swap and backup files
    r"\.sw[pox]$",
    r"~$",
    r"/#[^/]*#$",
    r"\.bak$",
    r"\.orig$",
    // OS metadata
    r"/\.DS_Store$",
    r"/Thumbs\.db$",
    r"/desktop\.ini$",
];

/// Decides whether a root-relative path is tracked
pub struct IgnoreFilter {
    never: Vec<Regex>,
    builtin: Vec<Regex>,
    ignore_file: Option<Gitignore>,
    user: Vec<Regex>,
}

impl IgnoreFilter {
    /// Build a filter for a watch root from the session configuration.
    ///
    /// Reads the ignore file at the root once (when `respect_gitignore` is
    /// set) and compiles every pattern; invalid regexes are skipped with a
    /// warning rather than failing the watch.
    pub fn build(root: &Path, config: &MonitorConfig) -> Result<Self> {
        let builtin = BUILTIN_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("built-in pattern must compile"))
            .collect();

        let ignore_file = if config.respect_gitignore {
            let gitignore_path = root.join(".gitignore");
            if gitignore_path.is_file() {
                let mut builder = GitignoreBuilder::new(root);
                if let Some(err) = builder.add(&gitignore_path) {
                    warn!("Failed to parse {:?}: {}", gitignore_path, err);
                    None
                } else {
                    match builder.build() {
                        Ok(gi) => {
                            debug!("Loaded {} ignore-file patterns", gi.len());
                            Some(gi)
                        }
                        Err(err) => {
                            warn!("Failed to build ignore matcher: {}", err);
                            None
                        }
                    }
                }
            } else {
                None
            }
        } else {
            None
        };

        Ok(Self {
            never: compile_patterns(&config.never_ignore),
            builtin,
            ignore_file,
            user: compile_patterns(&config.ignore_patterns),
        })
    }

    /// Filter with no patterns at all; everything is tracked.
    #[cfg(test)]
    pub fn allow_all() -> Self {
        Self {
            never: Vec::new(),
            builtin: Vec::new(),
            ignore_file: None,
            user: Vec::new(),
        }
    }

    /// Whether a root-relative file path should be dropped
    pub fn should_ignore(&self, relative: &str) -> bool {
        self.decide(relative, false)
    }

    /// Whether a root-relative directory should be pruned from descent
    pub fn should_ignore_dir(&self, relative: &str) -> bool {
        self.decide(relative, true)
    }

    fn decide(&self, relative: &str, is_dir: bool) -> bool {
        let slashed = format!("/{}", relative.trim_start_matches('/'));

        if self.never.iter().any(|re| re.is_match(&slashed)) {
            return false;
        }
        if self.builtin.iter().any(|re| re.is_match(&slashed)) {
            return true;
        }
        if let Some(gi) = &self.ignore_file {
            let matched = gi.matched(relative, is_dir);
            if matched.is_ignore() {
                return true;
            }
            // A whitelist match falls through to the user patterns below.
        }
        self.user.iter().any(|re| re.is_match(&slashed))
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(err) => {
                warn!("Skipping invalid ignore pattern '{}': {}", p, err);
                None
            }
        })
        .collect()
}

impl std::fmt::Debug for IgnoreFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreFilter")
            .field("never", &self.never.len())
            .field("builtin", &self.builtin.len())
            .field("ignore_file", &self.ignore_file.is_some())
            .field("user", &self.user.len())
            .finish()
    }
}
