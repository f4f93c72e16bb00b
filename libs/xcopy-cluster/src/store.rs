// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Object store contract
//!
//! A storage target keeps objects in an [`ObjectStore`]. The store owns
//! per-object locks, object metadata and the write path; remote-backed
//! buckets may additionally be served by a [`RemoteBackend`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use xcopy_types::{Bck, ObjAttrs, SIZE_UNKNOWN};

use crate::error::ClusterError;

/// Streamed object body
pub type ObjReader = Box<dyn AsyncRead + Send + Unpin>;

/// Lock table size above which unused entries are pruned
const LOCK_TABLE_PRUNE_AT: usize = 4096;

/// Parameters of a store write.
#[derive(Debug, Clone)]
pub struct PutParams {
    /// Attributes to persist with the object. A known size is enforced.
    pub attrs: ObjAttrs,
    /// Do not compare the computed checksum with `attrs.cksum`
    pub skip_verify: bool,
}

impl Default for PutParams {
    fn default() -> Self {
        Self {
            attrs: ObjAttrs::with_size(SIZE_UNKNOWN),
            skip_verify: false,
        }
    }
}

/// Storage-target object store.
///
/// `put` takes the exclusive lock on the destination itself; callers must
/// not hold a lock on the object they are writing.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn node_id(&self) -> &str;

    /// Acquire the per-object lock, shared or exclusive.
    async fn lock(&self, bck: &Bck, obj: &str, exclusive: bool) -> ObjLock;

    /// Read persisted metadata.
    async fn load(&self, bck: &Bck, obj: &str) -> Result<ObjAttrs, ClusterError>;

    fn local_path(&self, bck: &Bck, obj: &str) -> Result<PathBuf, ClusterError>;

    /// Open the object body for reading.
    async fn open(&self, bck: &Bck, obj: &str) -> Result<ObjReader, ClusterError>;

    /// Write an object from a stream; the object becomes visible only once
    /// the whole stream has been written.
    async fn put(
        &self,
        bck: &Bck,
        obj: &str,
        reader: ObjReader,
        params: PutParams,
    ) -> Result<ObjAttrs, ClusterError>;

    /// Fetch a remote-backed object into local storage.
    async fn get_cold(&self, bck: &Bck, obj: &str) -> Result<ObjAttrs, ClusterError>;

    /// Names of objects in `bck` starting with `prefix`, sorted.
    async fn list(&self, bck: &Bck, prefix: &str) -> Result<Vec<String>, ClusterError>;
}

/// A held per-object lock; released on drop.
#[derive(Debug)]
pub enum ObjLock {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

impl ObjLock {
    pub fn is_exclusive(&self) -> bool {
        matches!(self, ObjLock::Exclusive(_))
    }
}

/// Per-uname reader/writer locks.
#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, uname: &str, exclusive: bool) -> ObjLock {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > LOCK_TABLE_PRUNE_AT {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            Arc::clone(locks.entry(uname.to_string()).or_default())
        };
        if exclusive {
            ObjLock::Exclusive(lock.write_owned().await)
        } else {
            ObjLock::Shared(lock.read_owned().await)
        }
    }
}

// ============================================================================
// Remote backends
// ============================================================================

/// Backing store of remote buckets (cloud, HTTP).
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn get(&self, bck: &Bck, obj: &str) -> Result<(ObjReader, ObjAttrs), ClusterError>;

    async fn list(&self, bck: &Bck, prefix: &str) -> Result<Vec<String>, ClusterError>;
}

/// A remote backend held in memory.
#[derive(Default)]
pub struct InMemoryBackend {
    objects: tokio::sync::RwLock<BTreeMap<(Bck, String), Bytes>>,
    gets: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, bck: &Bck, obj: &str, data: impl Into<Bytes>) {
        self.objects
            .write()
            .await
            .insert((bck.clone(), obj.to_string()), data.into());
    }

    /// Number of `get` calls served, found or not.
    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RemoteBackend for InMemoryBackend {
    async fn get(&self, bck: &Bck, obj: &str) -> Result<(ObjReader, ObjAttrs), ClusterError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let objects = self.objects.read().await;
        let data = objects
            .get(&(bck.clone(), obj.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::not_found(bck, obj))?;
        let attrs = ObjAttrs::with_size(data.len() as i64);
        Ok((Box::new(std::io::Cursor::new(data)), attrs))
    }

    async fn list(&self, bck: &Bck, prefix: &str) -> Result<Vec<String>, ClusterError> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|(b, name)| b == bck && name.starts_with(prefix))
            .map(|(_, name)| name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_shared_locks_coexist() {
        let table = LockTable::new();
        let a = table.lock("ais/b/o", false).await;
        let b = table.lock("ais/b/o", false).await;
        assert!(!a.is_exclusive());
        assert!(!b.is_exclusive());
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_shared() {
        let table = Arc::new(LockTable::new());
        let shared = table.lock("ais/b/o", false).await;

        let t = Arc::clone(&table);
        let waiter = tokio::spawn(async move { t.lock("ais/b/o", true).await.is_exclusive() });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());
        drop(shared);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_in_memory_backend() {
        let backend = InMemoryBackend::new();
        let bck = Bck::new("cloud", xcopy_types::Provider::Aws);
        backend.insert(&bck, "dir/a", "hello").await;
        backend.insert(&bck, "other", "x").await;

        let (mut reader, attrs) = backend.get(&bck, "dir/a").await.unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "hello");
        assert_eq!(attrs.size, 5);

        assert!(backend.get(&bck, "missing").await.err().unwrap().is_not_found());
        assert_eq!(backend.gets(), 2);
        assert_eq!(backend.list(&bck, "dir/").await.unwrap(), vec!["dir/a"]);
    }
}
