use crate::exclude::Exclusions;
use crate::hash::existing_dir;
use crate::walk::{dir_travel, entry_name, is_package_entry};
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Writes one filtered tree into the archive.
///
/// Entry paths are taken relative to `relative_base`; files become sized
/// entries, childless directories empty `name/` entries. Non-empty
/// directories are implied by their contents.
fn zip_module(
    zip: &mut ZipWriter<fs::File>,
    root: &Path,
    relative_base: &Path,
    excludes: Option<Exclusions>,
) -> Result<()> {
    let mut stack: Vec<Exclusions> = excludes.into_iter().collect();
    dir_travel(root, &mut stack, &mut |path| {
        if !is_package_entry(path)? {
            return Ok(());
        }
        let name = entry_name(path, relative_base)?;
        if path.is_dir() {
            zip.add_directory(name, FileOptions::default())?;
        } else {
            zip.start_file(name, FileOptions::default())?;
            let mut file = fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            io::copy(&mut file, zip)
                .with_context(|| format!("failed to archive {}", path.display()))?;
        }
        Ok(())
    })
}

/// Creates the package archive for a working directory and module trees.
///
/// Working-directory entries are stored relative to the working directory
/// itself; module entries relative to the module's parent, so unpacking
/// the archive root exposes each module under its own top-level name.
/// Archive bytes are not reproducible across runs; only the package name
/// identifies content.
pub fn create_project_package(
    working_dir: Option<&Path>,
    py_modules: &[PathBuf],
    excludes: &[String],
    output_path: &Path,
) -> Result<()> {
    let file = fs::File::create(output_path).with_context(|| {
        format!("failed to create package file {}", output_path.display())
    })?;
    let mut zip = ZipWriter::new(file);
    if let Some(working_dir) = working_dir {
        let working_path = existing_dir(working_dir, "working_dir")?;
        let user_excludes = Exclusions::from_patterns(&working_path, excludes)?;
        zip_module(&mut zip, &working_path, &working_path, Some(user_excludes))?;
    }
    for py_module in py_modules {
        let module_path = existing_dir(py_module, "py_module")?;
        let relative_base = module_path.parent().unwrap_or_else(|| Path::new("/"));
        zip_module(&mut zip, &module_path, relative_base, None)?;
    }
    zip.finish()?;
    Ok(())
}

/// Unpacks `archive` into `dest`, re-creating files and empty directories.
pub fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive)
        .with_context(|| format!("failed to open package file {}", archive.display()))?;
    ZipArchive::new(file)
        .with_context(|| format!("failed to read package file {}", archive.display()))?
        .extract(dest)
        .with_context(|| format!("failed to unpack into {}", dest.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{sample_tree, write_file};
    use tempfile::TempDir;

    fn pack_and_unpack(
        working_dir: Option<&Path>,
        py_modules: &[PathBuf],
        excludes: &[String],
    ) -> TempDir {
        let scratch = TempDir::new().unwrap();
        let pkg = scratch.path().join("pkg.zip");
        create_project_package(working_dir, py_modules, excludes, &pkg).unwrap();
        let dest = TempDir::new().unwrap();
        unpack(&pkg, dest.path()).unwrap();
        dest
    }

    #[test]
    fn working_dir_roundtrip_preserves_files_and_empty_dirs() {
        let td = TempDir::new().unwrap();
        sample_tree(td.path());
        let dest = pack_and_unpack(Some(td.path()), &[], &[]);
        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dest.path().join("b/c.txt")).unwrap(), b"world");
        assert!(dest.path().join("d").is_dir());
        assert_eq!(fs::read_dir(dest.path().join("d")).unwrap().count(), 0);
    }

    #[test]
    fn modules_keep_their_top_level_name() {
        let td = TempDir::new().unwrap();
        write_file(&td.path().join("mod1/code.py"), "pass");
        write_file(&td.path().join("mod1/deep/more.py"), "pass");
        let dest = pack_and_unpack(None, &[td.path().join("mod1")], &[]);
        assert!(dest.path().join("mod1/code.py").is_file());
        assert!(dest.path().join("mod1/deep/more.py").is_file());
    }

    #[test]
    fn excluded_entries_do_not_reach_the_archive() {
        let td = TempDir::new().unwrap();
        sample_tree(td.path());
        write_file(&td.path().join("big.log"), "noise");
        let excludes = vec!["*.log".to_owned(), "b/".to_owned()];
        let dest = pack_and_unpack(Some(td.path()), &[], &excludes);
        assert!(dest.path().join("a.txt").is_file());
        assert!(!dest.path().join("big.log").exists());
        assert!(!dest.path().join("b").exists());
    }

    #[test]
    fn working_dir_and_modules_share_one_archive() {
        let wd = TempDir::new().unwrap();
        write_file(&wd.path().join("main.py"), "entry");
        let mods = TempDir::new().unwrap();
        write_file(&mods.path().join("lib1/util.py"), "helper");
        let dest = pack_and_unpack(Some(wd.path()), &[mods.path().join("lib1")], &[]);
        assert!(dest.path().join("main.py").is_file());
        assert!(dest.path().join("lib1/util.py").is_file());
    }
}
