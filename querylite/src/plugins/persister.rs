// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Persister plugin
//!
//! Saves a snapshot of the cache after every settled fetch and seeds a
//! fresh client from the last saved snapshot. Snapshots are JSON envelopes
//! carrying a crc32 checksum of their entries, a buster string (a mismatch
//! discards the snapshot) and the time they were written.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::Plugin;
use crate::client::QueryClient;
use crate::error::QueryError;
use crate::hooks::{HookPoint, HookRegistrar};
use crate::query::{EntrySummary, QueryStatus};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected:08x}, found {actual:08x}")]
    Checksum { expected: u32, actual: u32 },

    #[error("Unsupported snapshot version {0}")]
    Version(u32),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<PersistError> for QueryError {
    fn from(err: PersistError) -> Self {
        QueryError::Persist(err.to_string())
    }
}

pub type PersistResult<T> = Result<T, PersistError>;

/// On-disk snapshot envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCache {
    pub version: u32,
    pub buster: String,
    pub timestamp: DateTime<Utc>,
    pub checksum: u32,
    pub entries: Vec<EntrySummary>,
}

impl PersistedCache {
    pub fn new(buster: &str, entries: Vec<EntrySummary>) -> PersistResult<Self> {
        let checksum = Self::compute_checksum(&entries)?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            buster: buster.to_string(),
            timestamp: Utc::now(),
            checksum,
            entries,
        })
    }

    fn compute_checksum(entries: &[EntrySummary]) -> PersistResult<u32> {
        let bytes = serde_json::to_vec(entries)?;
        Ok(crc32fast::hash(&bytes))
    }

    pub fn verify(&self) -> PersistResult<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(PersistError::Version(self.version));
        }
        let actual = Self::compute_checksum(&self.entries)?;
        if actual != self.checksum {
            return Err(PersistError::Checksum {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> PersistResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and verify an envelope
    pub fn from_json(json: &str) -> PersistResult<Self> {
        let snapshot: PersistedCache = serde_json::from_str(json)?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    /// Drop entries last fetched more than `max_age` ago; returns how many
    pub fn prune(&mut self, max_age: Duration) -> PersistResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|entry| !is_expired(entry, max_age));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.checksum = Self::compute_checksum(&self.entries)?;
        }
        Ok(removed)
    }
}

fn is_expired(entry: &EntrySummary, max_age: Duration) -> bool {
    match entry.last_fetched_at {
        Some(at) => (Utc::now() - at)
            .to_std()
            .map_or(false, |age| age > max_age),
        None => false,
    }
}

/// Backend holding one serialized snapshot
pub trait PersistStorage: Send + Sync {
    fn save(&self, payload: &str) -> PersistResult<()>;
    fn load(&self) -> PersistResult<Option<String>>;
    fn clear(&self) -> PersistResult<()>;
    fn describe(&self) -> String;
}

/// In-process storage, mainly for tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    payload: Arc<RwLock<Option<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistStorage for MemoryStorage {
    fn save(&self, payload: &str) -> PersistResult<()> {
        *self.payload.write() = Some(payload.to_string());
        Ok(())
    }

    fn load(&self) -> PersistResult<Option<String>> {
        Ok(self.payload.read().clone())
    }

    fn clear(&self) -> PersistResult<()> {
        *self.payload.write() = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Single JSON file, replaced atomically on save
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistStorage for FileStorage {
    fn save(&self, payload: &str) -> PersistResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> PersistResult<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self) -> PersistResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// Sled-backed storage
#[cfg(feature = "sled-backend")]
pub struct SledStorage {
    db: sled::Db,
    tree: sled::Tree,
}

#[cfg(feature = "sled-backend")]
impl SledStorage {
    const TREE: &'static str = "querylite";
    const KEY: &'static [u8] = b"cache";

    pub fn open<P: AsRef<Path>>(path: P) -> PersistResult<Self> {
        let db = sled::open(path).map_err(|e| PersistError::Backend(e.to_string()))?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> PersistResult<Self> {
        let tree = db
            .open_tree(Self::TREE)
            .map_err(|e| PersistError::Backend(e.to_string()))?;
        Ok(Self { db, tree })
    }
}

#[cfg(feature = "sled-backend")]
impl PersistStorage for SledStorage {
    fn save(&self, payload: &str) -> PersistResult<()> {
        self.tree
            .insert(Self::KEY, payload.as_bytes())
            .map_err(|e| PersistError::Backend(e.to_string()))?;
        self.db
            .flush()
            .map_err(|e| PersistError::Backend(e.to_string()))?;
        Ok(())
    }

    fn load(&self) -> PersistResult<Option<String>> {
        let value = self
            .tree
            .get(Self::KEY)
            .map_err(|e| PersistError::Backend(e.to_string()))?;
        Ok(value.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn clear(&self) -> PersistResult<()> {
        self.tree
            .remove(Self::KEY)
            .map_err(|e| PersistError::Backend(e.to_string()))?;
        Ok(())
    }

    fn describe(&self) -> String {
        "sled".to_string()
    }
}

/// Saves the cache after every settle and restores it on demand
#[derive(Clone)]
pub struct CachePersister {
    storage: Arc<dyn PersistStorage>,
    buster: String,
    max_age: Duration,
}

impl CachePersister {
    pub fn new<S: PersistStorage + 'static>(storage: S) -> Self {
        Self {
            storage: Arc::new(storage),
            buster: String::new(),
            max_age: Duration::from_secs(24 * 60 * 60), // 24 hours
        }
    }

    /// Snapshots written with a different buster are discarded on restore
    pub fn with_buster(mut self, buster: &str) -> Self {
        self.buster = buster.to_string();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn storage(&self) -> &Arc<dyn PersistStorage> {
        &self.storage
    }

    /// Write the current cache contents
    pub fn persist_now(&self, client: &QueryClient) -> PersistResult<usize> {
        let entries: Vec<EntrySummary> = client
            .snapshot()
            .into_iter()
            .filter(|entry| entry.data.is_some() || entry.status == QueryStatus::Error)
            .collect();
        let count = entries.len();
        let snapshot = PersistedCache::new(&self.buster, entries)?;
        self.storage.save(&snapshot.to_json()?)?;
        log::debug!("Persisted {} entries to {}", count, self.storage.describe());
        Ok(count)
    }

    /// Seed `client` from the saved snapshot, returning entries restored.
    ///
    /// A snapshot that is corrupt, older than `max_age`, or written with a
    /// different buster is removed from storage.
    pub fn restore(&self, client: &QueryClient) -> PersistResult<usize> {
        let Some(payload) = self.storage.load()? else {
            return Ok(0);
        };

        let mut snapshot = match PersistedCache::from_json(&payload) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!(
                    "Discarding unreadable snapshot in {}: {}",
                    self.storage.describe(),
                    err
                );
                self.storage.clear()?;
                return Err(err);
            }
        };

        if snapshot.buster != self.buster {
            log::info!(
                "Discarding snapshot with buster '{}' (expected '{}')",
                snapshot.buster,
                self.buster
            );
            self.storage.clear()?;
            return Ok(0);
        }
        if snapshot.age() > self.max_age {
            log::info!("Discarding snapshot older than {:?}", self.max_age);
            self.storage.clear()?;
            return Ok(0);
        }

        let pruned = snapshot.prune(self.max_age)?;
        if pruned > 0 {
            log::debug!("Skipped {} expired persisted entries", pruned);
        }
        Ok(client.restore(&snapshot.entries))
    }
}

impl fmt::Debug for CachePersister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePersister")
            .field("storage", &self.storage.describe())
            .field("buster", &self.buster)
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl Plugin for CachePersister {
    fn name(&self) -> &str {
        "persister"
    }

    fn register(&self, hooks: &mut HookRegistrar<'_>) {
        let persister = self.clone();
        hooks.on(HookPoint::OnSettled, move |client, _event| {
            persister.persist_now(client)?;
            Ok(())
        });
    }
}
