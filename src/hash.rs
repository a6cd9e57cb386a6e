use crate::errors::PackErr;
use crate::exclude::Exclusions;
use crate::walk::{dir_travel, entry_name, is_package_entry};
use anyhow::{Context, Result};
use md5::{Digest, Md5};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Prefix of generated package names; the hex digest in between is the
/// sole identifier of the content.
pub const PKG_NAME_PREFIX: &str = "_ray_pkg_";

/// Files at or above this size trigger an advisory while hashing.
pub const FILE_SIZE_WARNING: u64 = 10 * 1024 * 1024;

const HASH_BUF_SIZE: usize = 4096 * 1024;

type EntryDigest = [u8; 16];

/// Folds a per-entry digest into the running tree digest.
///
/// XOR keeps the fold commutative and associative, so any traversal order
/// yields the same tree digest. Swapped file contents still change the
/// result because each entry digest binds path and contents together.
fn xor_bytes(left: Option<EntryDigest>, right: EntryDigest) -> EntryDigest {
    match left {
        Some(mut fold) => {
            for (a, b) in fold.iter_mut().zip(right.iter()) {
                *a ^= b;
            }
            fold
        }
        None => right,
    }
}

/// Canonicalizes a descriptor path and checks that it names a directory.
pub(crate) fn existing_dir(path: &Path, field: &str) -> Result<PathBuf> {
    let dir = path.canonicalize().map_err(|_| {
        PackErr::BadDescriptor(format!(
            "{} {} must be an existing directory",
            field,
            path.display()
        ))
    })?;
    if !dir.is_dir() {
        return Err(PackErr::BadDescriptor(format!(
            "{} {} must be an existing directory",
            field,
            path.display()
        ))
        .into());
    }
    Ok(dir)
}

/// Digests one tree: every retained file contributes
/// `md5(relpath ++ contents)`, every retained childless directory
/// `md5(relpath)`. Returns `None` for a tree with no retained entries.
fn hash_module(
    root: &Path,
    relative_base: &Path,
    excludes: Option<Exclusions>,
) -> Result<Option<EntryDigest>> {
    let mut hash_val: Option<EntryDigest> = None;
    let mut stack: Vec<Exclusions> = excludes.into_iter().collect();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    dir_travel(root, &mut stack, &mut |path| {
        if !is_package_entry(path)? {
            return Ok(());
        }
        let mut md5 = Md5::new();
        md5.update(entry_name(path, relative_base)?.as_bytes());
        if path.is_file() {
            let len = path
                .metadata()
                .with_context(|| format!("failed to stat {}", path.display()))?
                .len();
            if len >= FILE_SIZE_WARNING {
                warn!(
                    "file {} is very large ({} bytes); consider excluding it \
                     from the working directory",
                    path.display(),
                    len
                );
            }
            let mut file = fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            loop {
                let n = file
                    .read(&mut buf)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                if n == 0 {
                    break;
                }
                md5.update(&buf[..n]);
            }
        }
        hash_val = Some(xor_bytes(hash_val.take(), md5.finalize().into()));
        Ok(())
    })?;
    Ok(hash_val)
}

/// Derives the content-addressed package name for a working directory and
/// a list of module trees.
///
/// The working directory is digested relative to itself with the
/// user-supplied exclusion patterns active; each module tree relative to
/// its parent so the module keeps its top-level name. Returns `None` when
/// there is nothing to package. Only the trees given here are included;
/// their dependencies are not resolved.
pub fn get_project_package_name(
    working_dir: Option<&Path>,
    py_modules: &[PathBuf],
    excludes: &[String],
) -> Result<Option<String>> {
    let mut hash_val: Option<EntryDigest> = None;
    if let Some(working_dir) = working_dir {
        let working_dir = existing_dir(working_dir, "working_dir")?;
        let user_excludes = Exclusions::from_patterns(&working_dir, excludes)?;
        if let Some(digest) = hash_module(&working_dir, &working_dir, Some(user_excludes))? {
            hash_val = Some(xor_bytes(hash_val.take(), digest));
        }
    }
    for py_module in py_modules {
        let module_dir = existing_dir(py_module, "py_module")?;
        let relative_base = module_dir.parent().unwrap_or_else(|| Path::new("/"));
        if let Some(digest) = hash_module(&module_dir, relative_base, None)? {
            hash_val = Some(xor_bytes(hash_val.take(), digest));
        }
    }
    Ok(hash_val.map(|digest| format!("{}{}.zip", PKG_NAME_PREFIX, hex::encode(digest))))
}
