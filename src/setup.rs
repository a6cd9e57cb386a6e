use crate::archive::create_project_package;
use crate::cache::PkgCache;
use crate::hash::get_project_package_name;
use crate::job::JobConfig;
use crate::store::{package_exists, push_package, KvStore};
use crate::uri::{make_uri, Protocol};
use anyhow::Result;
use std::ffi::OsString;
use std::path::PathBuf;

/// Module search path of the current worker process.
///
/// Fetched package directories are prepended so the worker loader finds
/// shipped code before anything preinstalled. The list only describes this
/// process; handing it to a launched worker is the launcher's business.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    entries: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepend<P: Into<PathBuf>>(&mut self, dir: P) {
        self.entries.insert(0, dir.into());
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Renders the list for a path-style environment variable.
    pub fn to_env_value(&self) -> Result<OsString> {
        Ok(std::env::join_paths(&self.entries)?)
    }
}

/// Replaces the job's code trees with a content-addressed package URI.
///
/// A descriptor that already pins a `uris` list is taken as canonical and
/// left alone; without code trees there is nothing to rewrite.
pub fn rewrite_runtime_env_uris(job: &mut JobConfig) -> Result<()> {
    if job.runtime_env().uris().is_some() {
        return Ok(());
    }
    let env = job.runtime_env();
    let working_dir = env.working_dir().map(PathBuf::from);
    let py_modules = env.py_modules();
    if working_dir.is_none() && py_modules.is_empty() {
        return Ok(());
    }
    let excludes = env.excludes();
    if let Some(pkg_name) =
        get_project_package_name(working_dir.as_deref(), &py_modules, &excludes)?
    {
        job.set_runtime_env_uris(vec![make_uri(Protocol::Gcs, &pkg_name)]);
    }
    Ok(())
}

/// Builds and uploads the job's packages unless the store already holds
/// them.
///
/// Content addressing makes this idempotent across drivers: a second
/// driver with an identical descriptor computes the same URI and takes the
/// `exists` fast path.
pub fn upload_runtime_env_package_if_needed(
    store: &dyn KvStore,
    cache: &PkgCache,
    job: &JobConfig,
) -> Result<()> {
    assert!(store.initialized(), "kv store must be initialized");
    for pkg_uri in job.runtime_env_uris() {
        if package_exists(store, &pkg_uri)? {
            continue;
        }
        let env = job.runtime_env();
        let working_dir = env.working_dir().map(PathBuf::from);
        let py_modules = env.py_modules();
        info!(
            "{} does not exist, creating package from {:?} and {:?}",
            pkg_uri, working_dir, py_modules
        );
        let pkg_file = cache.local_path(&pkg_uri)?;
        if !pkg_file.exists() {
            create_project_package(
                working_dir.as_deref(),
                &py_modules,
                &env.excludes(),
                &pkg_file,
            )?;
        }
        let pkg_size = push_package(store, &pkg_uri, &pkg_file)?;
        info!("{} pushed with {} bytes", pkg_uri, pkg_size);
    }
    Ok(())
}

/// Downloads and unpacks every package on the local host and splices each
/// directory into the worker's module search path.
///
/// Per host a package is downloaded at most once: the per-URI file lock
/// serializes concurrent workers and the unpacked directory is the commit
/// point. With several URIs only the last directory is reported as the
/// working directory; directories are not merged.
pub fn ensure_runtime_env_setup(
    store: &dyn KvStore,
    cache: &PkgCache,
    search_path: &mut SearchPath,
    pkg_uris: &[String],
) -> Result<Option<PathBuf>> {
    assert!(store.initialized(), "kv store must be initialized");
    let mut pkg_dir = None;
    for pkg_uri in pkg_uris {
        let dir = {
            let _lock = cache.lock(pkg_uri)?;
            cache.fetch(store, pkg_uri)?
        };
        search_path.prepend(dir.clone());
        pkg_dir = Some(dir);
    }
    Ok(pkg_dir)
}
