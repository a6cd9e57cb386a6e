//! Runtime environment packaging and distribution for cluster workers.
//!
//! Drivers declare a logical execution environment: a working directory,
//! extra code trees, dependency manifests, environment variables, an
//! optional container image. This crate derives a content-addressed
//! package name from the code trees, archives them, publishes the archive
//! to a shared blob store and, on any worker host, fetches and unpacks it
//! at most once before splicing the directory into the worker's module
//! search path.
//!
//! The blob store itself is opaque: anything implementing [`KvStore`]
//! works. The local package cache is shared by all worker processes on a
//! host and serialized with per-package advisory file locks.

#[macro_use]
extern crate log;

pub mod archive;
pub mod cache;
pub mod env;
pub mod errors;
pub mod exclude;
pub mod hash;
pub mod job;
pub mod setup;
pub mod store;
pub mod uri;
pub mod walk;

pub use crate::cache::{PkgCache, PkgLock};
pub use crate::env::RuntimeEnv;
pub use crate::errors::PackErr;
pub use crate::job::JobConfig;
pub use crate::setup::{
    ensure_runtime_env_setup, rewrite_runtime_env_uris, upload_runtime_env_package_if_needed,
    SearchPath,
};
pub use crate::store::{package_exists, push_package, KvStore, MemStore};
pub use crate::uri::{make_uri, parse_uri, Protocol};
