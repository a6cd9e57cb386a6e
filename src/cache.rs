use crate::archive;
use crate::errors::PackErr;
use crate::store::KvStore;
use crate::uri::{parse_uri, Protocol};
use anyhow::{ensure, Context, Result};
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk package cache shared by every worker process on a host.
///
/// Per URI the cache holds the transient archive `<name>`, the unpacked
/// directory `<name>` with the extension stripped, and the advisory lock
/// file `<name>.lock`. The archive is removed once unpacked; the unpacked
/// directory persists for the lifetime of the host cache.
#[derive(Debug, Clone)]
pub struct PkgCache {
    root: PathBuf,
}

impl PkgCache {
    /// Opens the cache rooted at `root`, creating the directory if needed.
    ///
    /// An empty root is the unset-configuration case and is rejected up
    /// front rather than at first use.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(PackErr::CacheNotConfigured.into());
        }
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create package cache at {}", root.display()))?;
        Ok(PkgCache {
            root: root.to_path_buf(),
        })
    }

    /// Local staging path of the archive named by `pkg_uri`.
    pub fn local_path(&self, pkg_uri: &str) -> Result<PathBuf> {
        let (_, pkg_name) = parse_uri(pkg_uri)?;
        Ok(self.root.join(pkg_name))
    }

    /// Takes the cross-process lock for `pkg_uri`, blocking until it is
    /// free. Dropping the guard releases the lock; the lock file itself is
    /// a sentinel and is never cleaned up.
    pub fn lock(&self, pkg_uri: &str) -> Result<PkgLock> {
        let mut path = self.local_path(pkg_uri)?.into_os_string();
        path.push(".lock");
        let path = PathBuf::from(path);
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("failed to lock {}", path.display()))?;
        Ok(PkgLock { file })
    }

    /// Fetches and unpacks the package unless it is cached already.
    ///
    /// The unpacked directory is the commit point: once it exists it is
    /// returned immediately and no store round trip happens, so readers
    /// after the first fetch need no lock.
    pub fn fetch(&self, store: &dyn KvStore, pkg_uri: &str) -> Result<PathBuf> {
        let pkg_file = self.local_path(pkg_uri)?;
        let local_dir = pkg_file.with_extension("");
        ensure!(
            local_dir != pkg_file,
            "invalid package file name {}",
            pkg_file.display()
        );
        if local_dir.exists() {
            ensure!(
                local_dir.is_dir(),
                "{} exists but is not a directory",
                local_dir.display()
            );
            return Ok(local_dir);
        }
        debug!("fetching {}", pkg_uri);
        let (protocol, _) = parse_uri(pkg_uri)?;
        let data = match protocol {
            Protocol::Gcs | Protocol::PinGcs => store
                .get(pkg_uri)?
                .ok_or_else(|| PackErr::FetchFailed(pkg_uri.to_owned()))?,
        };
        fs::write(&pkg_file, data)
            .with_context(|| format!("failed to write package file {}", pkg_file.display()))?;
        debug!("unpacking {} to {}", pkg_file.display(), local_dir.display());
        archive::unpack(&pkg_file, &local_dir)?;
        if let Err(err) = fs::remove_file(&pkg_file) {
            // Stale archives are harmless; the directory check above wins.
            warn!("failed to remove {}: {}", pkg_file.display(), err);
        }
        Ok(local_dir)
    }
}

/// Guard for the per-package advisory file lock.
#[derive(Debug)]
pub struct PkgLock {
    file: fs::File,
}

impl Drop for PkgLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::create_project_package;
    use crate::store::MemStore;
    use crate::tests::{sample_tree, write_file};
    use tempfile::TempDir;

    fn seeded_store(uri: &str) -> (MemStore, TempDir) {
        let src = TempDir::new().unwrap();
        sample_tree(src.path());
        let scratch = TempDir::new().unwrap();
        let pkg = scratch.path().join("pkg.zip");
        create_project_package(Some(src.path()), &[], &[], &pkg).unwrap();
        let store = MemStore::new();
        store.put(uri, &fs::read(&pkg).unwrap()).unwrap();
        (store, scratch)
    }

    #[test]
    fn empty_root_is_rejected() {
        let err = PkgCache::new("").unwrap_err();
        match err.downcast_ref::<PackErr>() {
            Some(PackErr::CacheNotConfigured) => (),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn fetch_unpacks_once_and_removes_the_archive() {
        crate::tests::init_logging();
        let uri = "gcs://_ray_pkg_cafe.zip";
        let (store, _scratch) = seeded_store(uri);
        let root = TempDir::new().unwrap();
        let cache = PkgCache::new(root.path()).unwrap();

        let dir = cache.fetch(&store, uri).unwrap();
        assert_eq!(dir, root.path().join("_ray_pkg_cafe"));
        assert_eq!(fs::read(dir.join("a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(dir.join("b/c.txt")).unwrap(), b"world");
        assert!(dir.join("d").is_dir());
        assert!(!root.path().join("_ray_pkg_cafe.zip").exists());

        // Second fetch hits the unpacked directory, not the store.
        assert_eq!(store.gets(), 1);
        assert_eq!(cache.fetch(&store, uri).unwrap(), dir);
        assert_eq!(store.gets(), 1);
    }

    #[test]
    fn missing_package_is_a_fetch_failure() {
        let root = TempDir::new().unwrap();
        let cache = PkgCache::new(root.path()).unwrap();
        let store = MemStore::new();
        let err = cache.fetch(&store, "gcs://_ray_pkg_dead.zip").unwrap_err();
        match err.downcast_ref::<PackErr>() {
            Some(PackErr::FetchFailed(uri)) => assert_eq!(uri, "gcs://_ray_pkg_dead.zip"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn stale_archive_does_not_shadow_the_directory() {
        let uri = "gcs://_ray_pkg_beef.zip";
        let (store, _scratch) = seeded_store(uri);
        let root = TempDir::new().unwrap();
        let cache = PkgCache::new(root.path()).unwrap();
        cache.fetch(&store, uri).unwrap();
        // A leftover archive from an interrupted run is ignored.
        write_file(&root.path().join("_ray_pkg_beef.zip"), "garbage");
        let dir = cache.fetch(&store, uri).unwrap();
        assert_eq!(fs::read(dir.join("a.txt")).unwrap(), b"hello");
    }

    #[test]
    fn lock_guards_are_reentrant_across_releases() {
        let root = TempDir::new().unwrap();
        let cache = PkgCache::new(root.path()).unwrap();
        let uri = "gcs://_ray_pkg_0a.zip";
        drop(cache.lock(uri).unwrap());
        drop(cache.lock(uri).unwrap());
        assert!(root.path().join("_ray_pkg_0a.zip.lock").exists());
    }
}
