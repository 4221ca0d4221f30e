//! Ignore rules consulted before an event enters the pipeline
//!
//! Two sources of patterns:
//! 1. Built-in rules (VCS directories, editor temp files, OS junk) - always active
//! 2. User patterns: glob lines from config plus the root `.gitignore` (optional)

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use parking_lot::RwLock;
use pipeline::PathFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory names that are never descended into or reported
const BUILTIN_DIRS: &[&str] = &[
    ".git",
    ".jj",
    ".hg",
    ".svn",
    "node_modules",
    "__pycache__",
    ".venv",
    ".idea",
    ".vscode",
];

/// Ignore rule manager
///
/// Built-in rules cannot be overridden; a negated user pattern does not
/// resurrect `.git/` contents.
pub struct IgnoreRules {
    /// Watched root; user patterns are anchored here
    root: PathBuf,

    /// Patterns from configuration, compiled once
    patterns: Option<Gitignore>,

    /// Root `.gitignore`, reloadable
    gitignore: RwLock<Option<Gitignore>>,

    config: IgnoreConfig,
}

impl IgnoreRules {
    /// Compile rules for `root`
    pub fn load(root: &Path, config: IgnoreConfig) -> Result<Self> {
        let patterns = if config.patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(root);
            for pattern in &config.patterns {
                builder
                    .add_line(None, pattern)
                    .with_context(|| format!("Invalid ignore pattern: {pattern}"))?;
            }
            Some(builder.build().context("Failed to compile ignore patterns")?)
        };

        let rules = Self {
            root: root.to_path_buf(),
            patterns,
            gitignore: RwLock::new(None),
            config,
        };
        rules.reload()?;
        Ok(rules)
    }

    /// Re-read the root `.gitignore` from disk
    pub fn reload(&self) -> Result<()> {
        let loaded = if self.config.use_gitignore {
            let path = self.root.join(".gitignore");
            if path.exists() {
                let mut builder = GitignoreBuilder::new(&self.root);
                if let Some(err) = builder.add(&path) {
                    tracing::warn!(error = %err, "Problem reading .gitignore, some lines were skipped");
                }
                Some(builder.build().context("Failed to compile .gitignore")?)
            } else {
                None
            }
        } else {
            None
        };

        *self.gitignore.write() = loaded;
        Ok(())
    }

    /// Check if a path should be ignored
    pub fn is_ignored(&self, path: &Path) -> bool {
        if is_builtin_ignored(path) {
            return true;
        }

        // Anchored matchers only understand paths under the root
        let relative = if path.is_absolute() {
            match path.strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => return false,
            }
        } else {
            path
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        let is_dir = self.root.join(relative).is_dir();

        if let Some(patterns) = &self.patterns {
            if patterns.matched_path_or_any_parents(relative, is_dir).is_ignore() {
                return true;
            }
        }

        if let Some(gitignore) = self.gitignore.read().as_ref() {
            if gitignore.matched_path_or_any_parents(relative, is_dir).is_ignore() {
                return true;
            }
        }

        false
    }

    /// Get number of active ignore sources
    pub fn active_sources(&self) -> usize {
        let mut count = 1; // Built-in always active
        if self.patterns.is_some() {
            count += 1;
        }
        if self.gitignore.read().is_some() {
            count += 1;
        }
        count
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PathFilter for IgnoreRules {
    fn should_ignore(&self, path: &Path) -> bool {
        self.is_ignored(path)
    }
}

/// Rules that apply regardless of configuration
fn is_builtin_ignored(path: &Path) -> bool {
    let in_builtin_dir = path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .is_some_and(|name| BUILTIN_DIRS.contains(&name))
    });
    if in_builtin_dir {
        return true;
    }

    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    is_temp_or_junk(filename)
}

/// Editor swap/backup files and OS metadata files
fn is_temp_or_junk(filename: &str) -> bool {
    // Vim swap files
    if [".swp", ".swo", ".swn", ".swx"].iter().any(|ext| filename.ends_with(ext)) {
        return true;
    }

    // Backup files
    if filename.ends_with('~') {
        return true;
    }

    // Emacs auto-save (#file#) and lock (.#file) files
    if (filename.len() > 1 && filename.starts_with('#') && filename.ends_with('#'))
        || filename.starts_with(".#")
    {
        return true;
    }

    // macOS and Windows metadata
    if filename == ".DS_Store" || filename.starts_with("._") {
        return true;
    }
    if filename == "Thumbs.db" || filename == "desktop.ini" {
        return true;
    }

    // Atomic-save temporaries written by many editors
    filename.ends_with(".tmp") && filename.starts_with('.')
}

/// Ignore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Honour the root `.gitignore` (default: true)
    #[serde(default = "default_true")]
    pub use_gitignore: bool,

    /// Extra gitignore-style glob patterns
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            patterns: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}
