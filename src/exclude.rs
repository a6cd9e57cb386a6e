use anyhow::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

/// Per-directory ignore manifest recognized during traversal.
pub const IGNORE_FILE: &str = ".gitignore";

/// A compiled set of exclusion globs anchored at a directory.
///
/// Patterns follow the gitwildmatch grammar. Candidates are matched by
/// their path relative to the anchor, with the directory flag applied so
/// that trailing-slash patterns match directories only. Negated patterns
/// (`!glob`) whitelist entries back in.
#[derive(Debug)]
pub struct Exclusions {
    matcher: Gitignore,
}

impl Exclusions {
    /// Compiles a user-supplied pattern list rooted at `base`.
    pub fn from_patterns<S: AsRef<str>>(base: &Path, patterns: &[S]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(base);
        for pattern in patterns {
            builder.add_line(None, pattern.as_ref())?;
        }
        Ok(Exclusions {
            matcher: builder.build()?,
        })
    }

    /// Compiles `<base>/.gitignore` if it exists.
    ///
    /// Unparsable lines are reported and skipped so a stray ignore file
    /// cannot abort packaging.
    pub fn from_ignore_file(base: &Path) -> Option<Self> {
        let ignore_file = base.join(IGNORE_FILE);
        if !ignore_file.is_file() {
            return None;
        }
        let (matcher, err) = Gitignore::new(&ignore_file);
        if let Some(err) = err {
            warn!(
                "problem with ignore file {}: {}",
                ignore_file.display(),
                err
            );
        }
        Some(Exclusions { matcher })
    }

    /// True iff `path` is excluded by this set.
    pub fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        self.matcher.matched(path, is_dir).is_ignore()
    }
}
