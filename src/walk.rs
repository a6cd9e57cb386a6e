use crate::exclude::Exclusions;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Depth-first traversal with hierarchically scoped exclusion rules.
///
/// Each directory is probed for an ignore file on entry; a matcher found
/// there governs exactly the subtree rooted at that directory, while
/// ancestor matchers stay in force. The handler runs once per retained
/// entry, directories included. An excluded entry is neither handled nor
/// descended into. Traversal order within a directory is unspecified and
/// callers must not depend on it.
pub fn dir_travel<F>(path: &Path, excludes: &mut Vec<Exclusions>, handler: &mut F) -> Result<()>
where
    F: FnMut(&Path) -> Result<()>,
{
    let is_dir = path.is_dir();
    let mut pushed = false;
    if is_dir {
        if let Some(found) = Exclusions::from_ignore_file(path) {
            excludes.push(found);
            pushed = true;
        }
    }
    let skip = excludes.iter().any(|e| e.is_excluded(path, is_dir));
    if !skip {
        if let Err(err) = handler(path) {
            error!("issue with path: {}", path.display());
            return Err(err);
        }
        if is_dir {
            let entries = fs::read_dir(path)
                .with_context(|| format!("failed to list directory {}", path.display()))?;
            for entry in entries {
                dir_travel(&entry?.path(), excludes, handler)?;
            }
        }
    }
    if pushed {
        excludes.pop();
    }
    Ok(())
}

/// Entry name of `path` relative to `base`, joined with `/` regardless of
/// platform. The base itself maps to `.`.
pub(crate) fn entry_name(path: &Path, base: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(base)
        .with_context(|| format!("{} is not below {}", path.display(), base.display()))?;
    if rel.as_os_str().is_empty() {
        return Ok(".".to_owned());
    }
    Ok(rel
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

/// A traversal entry becomes part of a package iff it is a file or a
/// directory without children; non-empty directories are implied by the
/// paths of their contents.
pub(crate) fn is_package_entry(path: &Path) -> Result<bool> {
    if path.is_dir() {
        let mut children = fs::read_dir(path)
            .with_context(|| format!("failed to list directory {}", path.display()))?;
        Ok(children.next().is_none())
    } else {
        Ok(path.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{sample_tree, write_file};
    use anyhow::anyhow;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn visit(root: &Path, excludes: Vec<Exclusions>) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut excludes = excludes;
        dir_travel(root, &mut excludes, &mut |path| {
            seen.insert(entry_name(path, root).unwrap());
            Ok(())
        })
        .unwrap();
        seen
    }

    #[test]
    fn visits_every_entry_once() {
        let td = TempDir::new().unwrap();
        sample_tree(td.path());
        let seen = visit(td.path(), vec![]);
        let expected: BTreeSet<String> = [".", "a.txt", "b", "b/c.txt", "d"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn excluded_directories_are_not_descended() {
        let td = TempDir::new().unwrap();
        sample_tree(td.path());
        let ex = Exclusions::from_patterns(td.path(), &["b/"]).unwrap();
        let seen = visit(td.path(), vec![ex]);
        assert!(!seen.contains("b"));
        assert!(!seen.contains("b/c.txt"));
        assert!(seen.contains("a.txt"));
    }

    #[test]
    fn nested_ignore_file_governs_only_its_subtree() {
        crate::tests::init_logging();
        let td = TempDir::new().unwrap();
        write_file(&td.path().join("secret.txt"), "top");
        write_file(&td.path().join("sub/secret.txt"), "nested");
        write_file(&td.path().join("sub/.gitignore"), "secret.txt\n");
        let seen = visit(td.path(), vec![]);
        assert!(seen.contains("secret.txt"));
        assert!(!seen.contains("sub/secret.txt"));
        assert!(seen.contains("sub/.gitignore"));
    }

    #[test]
    fn ignore_file_applies_to_siblings_after_the_subtree() {
        // The matcher pushed for `sub` must be popped before `z.txt` is
        // visited, whatever the traversal order was.
        let td = TempDir::new().unwrap();
        write_file(&td.path().join("sub/.gitignore"), "z.txt\n");
        write_file(&td.path().join("sub/z.txt"), "inside");
        write_file(&td.path().join("z.txt"), "outside");
        let seen = visit(td.path(), vec![]);
        assert!(seen.contains("z.txt"));
        assert!(!seen.contains("sub/z.txt"));
    }

    #[test]
    fn handler_errors_abort_the_walk() {
        let td = TempDir::new().unwrap();
        sample_tree(td.path());
        let mut excludes = vec![];
        let res = dir_travel(td.path(), &mut excludes, &mut |path| {
            if path.ends_with("c.txt") {
                return Err(anyhow!("boom"));
            }
            Ok(())
        });
        assert!(res.is_err());
    }

    #[test]
    fn entry_names_are_slash_joined() {
        let base = Path::new("/base");
        assert_eq!(entry_name(&base.join("b").join("c.txt"), base).unwrap(), "b/c.txt");
        assert_eq!(entry_name(base, base).unwrap(), ".");
    }
}
