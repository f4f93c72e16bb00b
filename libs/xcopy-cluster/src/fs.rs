// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Filesystem-backed object store
//!
//! Layout under the store root:
//!
//! ```text
//! data/<provider>/<bucket>/<object>        object bytes
//! meta/<provider>/<bucket>/<object>.json   ObjAttrs sidecar
//! work/<uuid>                              in-flight writes
//! ```
//!
//! Writes stream into a work file while the MD5 is computed, then the work
//! file is renamed into place under the object's exclusive lock.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use md5::{Digest, Md5};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use xcopy_types::{Bck, Cksum, CksumType, ObjAttrs, SIZE_UNKNOWN, validate_obj_name};

use crate::error::ClusterError;
use crate::memsys;
use crate::store::{LockTable, ObjLock, ObjReader, ObjectStore, PutParams, RemoteBackend};

const DATA_DIR: &str = "data";
const META_DIR: &str = "meta";
const WORK_DIR: &str = "work";

/// Object store rooted at a local directory.
pub struct FsStore {
    node_id: String,
    root: PathBuf,
    capacity: Option<u64>,
    used: AtomicU64,
    locks: LockTable,
    backend: Option<Arc<dyn RemoteBackend>>,
}

impl FsStore {
    /// Open (creating if needed) a store at `root`.
    ///
    /// Space already taken by objects under `data/` counts against the
    /// capacity set later with [`FsStore::with_capacity`].
    pub async fn new(node_id: impl Into<String>, root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for dir in [DATA_DIR, META_DIR, WORK_DIR] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        // Leftovers of interrupted writes
        let mut entries = fs::read_dir(root.join(WORK_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Err(e) = fs::remove_file(entry.path()).await {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove stale work file");
            }
        }

        let data_root = root.join(DATA_DIR);
        let used = tokio::task::spawn_blocking(move || dir_size(&data_root))
            .await
            .map_err(io::Error::other)?;

        Ok(Self {
            node_id: node_id.into(),
            root,
            capacity: None,
            used: AtomicU64::new(used),
            locks: LockTable::new(),
            backend: None,
        })
    }

    /// Cap the bytes this store may hold.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Serve cold GETs of remote buckets from `backend`.
    pub fn with_backend(mut self, backend: Arc<dyn RemoteBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    fn bucket_dir(&self, top: &str, bck: &Bck) -> Result<PathBuf, ClusterError> {
        bck.validate()
            .map_err(|e| ClusterError::InvalidName(e.to_string()))?;
        Ok(self
            .root
            .join(top)
            .join(bck.provider.to_string())
            .join(&bck.name))
    }

    fn meta_path(&self, bck: &Bck, obj: &str) -> Result<PathBuf, ClusterError> {
        validate_obj_name(obj).map_err(|e| ClusterError::InvalidName(e.to_string()))?;
        Ok(self
            .bucket_dir(META_DIR, bck)?
            .join(format!("{}.json", obj)))
    }

    fn reserve(&self, n: u64) -> Result<(), ClusterError> {
        let Some(capacity) = self.capacity else {
            self.used.fetch_add(n, Ordering::SeqCst);
            return Ok(());
        };
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used + n <= capacity).then_some(used + n)
            })
            .map(|_| ())
            .map_err(|used| ClusterError::OutOfSpace {
                needed: n,
                available: capacity.saturating_sub(used),
            })
    }

    fn release(&self, n: u64) {
        let _ = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(n))
            });
    }

    /// Stream `reader` into `work`, returning the MD5 of what was written.
    async fn write_work(
        &self,
        work: &Path,
        reader: &mut ObjReader,
        size_hint: i64,
        reserved: &mut u64,
    ) -> Result<String, ClusterError> {
        let mut file = File::create(work).await.map_err(map_write_err)?;
        let mut hasher = Md5::new();
        let mut buf = memsys::alloc_size(size_hint);

        loop {
            let n = reader.read(&mut buf).await.map_err(ClusterError::from_io)?;
            if n == 0 {
                break;
            }
            self.reserve(n as u64)?;
            *reserved += n as u64;
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await.map_err(map_write_err)?;
        }
        file.flush().await.map_err(map_write_err)?;

        Ok(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            hasher.finalize(),
        ))
    }

    /// Rename a completed work file into place together with its metadata.
    async fn commit(
        &self,
        bck: &Bck,
        obj: &str,
        work: &Path,
        mut attrs: ObjAttrs,
    ) -> Result<ObjAttrs, ClusterError> {
        let path = self.local_path(bck, obj)?;
        let meta = self.meta_path(bck, obj)?;
        if attrs.atime.is_none() {
            attrs.atime = Some(Utc::now());
        }
        let meta_work = work.with_extension("json");
        let encoded = serde_json::to_vec_pretty(&attrs)?;

        let _guard = self.locks.lock(&bck.make_uname(obj), true).await;

        let old_size = match fs::metadata(&path).await {
            Ok(md) => md.len(),
            Err(_) => 0,
        };
        let renamed = async {
            fs::write(&meta_work, &encoded).await?;
            for p in [&path, &meta] {
                if let Some(parent) = p.parent() {
                    fs::create_dir_all(parent).await?;
                }
            }
            fs::rename(work, &path).await?;
            fs::rename(&meta_work, &meta).await
        }
        .await;
        if let Err(e) = renamed {
            let _ = fs::remove_file(&meta_work).await;
            return Err(map_write_err(e));
        }
        self.release(old_size);
        Ok(attrs)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn lock(&self, bck: &Bck, obj: &str, exclusive: bool) -> ObjLock {
        self.locks.lock(&bck.make_uname(obj), exclusive).await
    }

    async fn load(&self, bck: &Bck, obj: &str) -> Result<ObjAttrs, ClusterError> {
        let meta = self.meta_path(bck, obj)?;
        let raw = match fs::read(&meta).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ClusterError::not_found(bck, obj));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    fn local_path(&self, bck: &Bck, obj: &str) -> Result<PathBuf, ClusterError> {
        validate_obj_name(obj).map_err(|e| ClusterError::InvalidName(e.to_string()))?;
        Ok(self.bucket_dir(DATA_DIR, bck)?.join(obj))
    }

    async fn open(&self, bck: &Bck, obj: &str) -> Result<ObjReader, ClusterError> {
        let path = self.local_path(bck, obj)?;
        match File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ClusterError::not_found(bck, obj)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(
        &self,
        bck: &Bck,
        obj: &str,
        mut reader: ObjReader,
        params: PutParams,
    ) -> Result<ObjAttrs, ClusterError> {
        // Validate before any bytes are consumed.
        self.local_path(bck, obj)?;

        let work = self
            .root
            .join(WORK_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        let mut reserved = 0u64;

        let result = async {
            let computed = self
                .write_work(&work, &mut reader, params.attrs.size, &mut reserved)
                .await?;

            let mut attrs = params.attrs;
            if attrs.size != SIZE_UNKNOWN && attrs.size != reserved as i64 {
                return Err(ClusterError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "{}/{}: expected {} bytes, received {}",
                        bck, obj, attrs.size, reserved
                    ),
                )));
            }
            if !params.skip_verify {
                if let Some(expected) = attrs.cksum.as_ref().filter(|c| c.ty == CksumType::Md5) {
                    if !expected.value.is_empty() && expected.value != computed {
                        return Err(ClusterError::ChecksumMismatch {
                            bck: bck.clone(),
                            obj: obj.to_string(),
                            expected: expected.value.clone(),
                            computed,
                        });
                    }
                }
            }
            attrs.size = reserved as i64;
            // A checksum the caller vouches for is kept as is.
            let trusted = params.skip_verify && attrs.cksum.as_ref().is_some_and(|c| !c.is_empty());
            if !trusted {
                attrs.cksum = Some(Cksum::new(CksumType::Md5, computed));
            }
            self.commit(bck, obj, &work, attrs).await
        }
        .await;

        if result.is_err() {
            if let Err(e) = fs::remove_file(&work).await {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %work.display(), error = %e, "Failed to remove work file");
                }
            }
            self.release(reserved);
        }
        result
    }

    async fn get_cold(&self, bck: &Bck, obj: &str) -> Result<ObjAttrs, ClusterError> {
        let backend = match (&self.backend, bck.is_remote()) {
            (Some(backend), true) => backend,
            _ => return Err(ClusterError::not_found(bck, obj)),
        };
        let (reader, mut attrs) = backend.get(bck, obj).await?;
        // Remote checksums use their own scheme; recompute locally.
        attrs.cksum = None;
        tracing::debug!(bucket = %bck, object = %obj, size = attrs.size, "Cold GET");
        self.put(
            bck,
            obj,
            reader,
            PutParams {
                attrs,
                skip_verify: true,
            },
        )
        .await
    }

    async fn list(&self, bck: &Bck, prefix: &str) -> Result<Vec<String>, ClusterError> {
        let dir = self.bucket_dir(DATA_DIR, bck)?;
        let owned_prefix = prefix.to_string();
        let mut names = tokio::task::spawn_blocking(move || list_dir(&dir, &owned_prefix))
            .await
            .map_err(io::Error::other)??;

        if bck.is_remote() {
            if let Some(backend) = &self.backend {
                names.extend(backend.list(bck, prefix).await?);
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

fn map_write_err(e: io::Error) -> ClusterError {
    if e.kind() == io::ErrorKind::StorageFull {
        return ClusterError::OutOfSpace {
            needed: 0,
            available: 0,
        };
    }
    ClusterError::Io(e)
}

fn dir_size(dir: &Path) -> u64 {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|md| md.len())
        .sum()
}

fn list_dir(dir: &Path, prefix: &str) -> Result<Vec<String>, ClusterError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(|e| ClusterError::Io(io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name.starts_with(prefix) {
            names.push(name);
        }
    }
    Ok(names)
}
