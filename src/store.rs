use crate::errors::PackErr;
use crate::uri::{parse_uri, Protocol};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Hard cap on a single package payload.
pub const STORAGE_MAX_SIZE: usize = 512 * 1024 * 1024;

/// Byte-oriented view of the shared key-value blob store.
///
/// Keys are full package URI strings, values raw archive bytes. Reads are
/// safe to run concurrently; writes of the same key are idempotent because
/// equal names imply equal content.
pub trait KvStore: Send + Sync {
    /// True once the client is connected and usable. Flows assert this
    /// before touching the store.
    fn initialized(&self) -> bool;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn exists(&self, key: &str) -> Result<bool>;
}

/// Process-local store for single-host setups and tests.
#[derive(Debug, Default)]
pub struct MemStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls seen; upload idempotence shows up here.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `get` calls seen; per-host download dedup shows up here.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl KvStore for MemStore {
    fn initialized(&self) -> bool {
        true
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entries
            .write()
            .unwrap()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().unwrap().contains_key(key))
    }
}

fn store_package_in_kv(store: &dyn KvStore, key: &str, data: &[u8]) -> Result<u64> {
    if data.len() >= STORAGE_MAX_SIZE {
        return Err(PackErr::PayloadTooLarge(data.len()).into());
    }
    store.put(key, data)?;
    Ok(data.len() as u64)
}

/// Uploads a local package file under its URI and returns the byte count.
pub fn push_package(store: &dyn KvStore, pkg_uri: &str, pkg_path: &Path) -> Result<u64> {
    let (protocol, _) = parse_uri(pkg_uri)?;
    let data = fs::read(pkg_path)
        .with_context(|| format!("failed to read package file {}", pkg_path.display()))?;
    match protocol {
        Protocol::Gcs | Protocol::PinGcs => store_package_in_kv(store, pkg_uri, &data),
    }
}

/// Checks whether the store already holds the package.
pub fn package_exists(store: &dyn KvStore, pkg_uri: &str) -> Result<bool> {
    assert!(store.initialized(), "kv store must be initialized");
    let (protocol, _) = parse_uri(pkg_uri)?;
    match protocol {
        Protocol::Gcs | Protocol::PinGcs => store.exists(pkg_uri),
    }
}
