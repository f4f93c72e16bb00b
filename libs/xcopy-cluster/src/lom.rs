// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Local object metadata handle

use std::path::PathBuf;
use std::sync::Arc;

use xcopy_types::{Bck, ObjAttrs, SIZE_UNKNOWN, validate_obj_name};

use crate::error::ClusterError;
use crate::store::{ObjLock, ObjReader, ObjectStore, PutParams};

/// Handle on one object of one bucket in a local store.
///
/// The handle caches attributes after [`Lom::load`] and may hold the
/// object's lock; the lock is released by [`Lom::unlock`] or on drop.
pub struct Lom {
    store: Arc<dyn ObjectStore>,
    bck: Bck,
    obj_name: String,
    attrs: Option<ObjAttrs>,
    lock: Option<ObjLock>,
}

impl Lom {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bck: &Bck,
        obj_name: &str,
    ) -> Result<Self, ClusterError> {
        validate_obj_name(obj_name).map_err(|e| ClusterError::InvalidName(e.to_string()))?;
        Ok(Self {
            store,
            bck: bck.clone(),
            obj_name: obj_name.to_string(),
            attrs: None,
            lock: None,
        })
    }

    pub fn bck(&self) -> &Bck {
        &self.bck
    }

    pub fn obj_name(&self) -> &str {
        &self.obj_name
    }

    pub fn uname(&self) -> String {
        self.bck.make_uname(&self.obj_name)
    }

    /// Take the object lock. A lock already held is released first.
    pub async fn lock(&mut self, exclusive: bool) {
        self.lock = None;
        self.lock = Some(self.store.lock(&self.bck, &self.obj_name, exclusive).await);
    }

    pub fn unlock(&mut self) {
        self.lock = None;
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Read persisted attributes; `cache_it` keeps them on the handle.
    pub async fn load(&mut self, cache_it: bool) -> Result<ObjAttrs, ClusterError> {
        let attrs = self.store.load(&self.bck, &self.obj_name).await?;
        if cache_it {
            self.attrs = Some(attrs.clone());
        }
        Ok(attrs)
    }

    pub fn attrs(&self) -> Option<&ObjAttrs> {
        self.attrs.as_ref()
    }

    pub fn size_bytes(&self) -> i64 {
        self.attrs.as_ref().map_or(SIZE_UNKNOWN, |a| a.size)
    }

    pub fn local_path(&self) -> Result<PathBuf, ClusterError> {
        self.store.local_path(&self.bck, &self.obj_name)
    }

    /// Adopt attributes received from elsewhere. With `skip_cksum` the
    /// checksum is dropped and recomputed on persist.
    pub fn copy_attrs(&mut self, attrs: &ObjAttrs, skip_cksum: bool) {
        let mut attrs = attrs.clone();
        if skip_cksum {
            attrs.cksum = None;
        }
        self.attrs = Some(attrs);
    }

    /// Write the object from `reader` with the handle's attributes.
    ///
    /// Any lock the handle holds is released first, since the store takes
    /// the exclusive lock for the rename.
    pub async fn persist(&mut self, reader: ObjReader) -> Result<ObjAttrs, ClusterError> {
        self.persist_inner(reader, false).await
    }

    /// Like [`Lom::persist`], but the handle's checksum is stored without
    /// being compared against the received bytes.
    pub async fn persist_trusted(&mut self, reader: ObjReader) -> Result<ObjAttrs, ClusterError> {
        self.persist_inner(reader, true).await
    }

    async fn persist_inner(
        &mut self,
        reader: ObjReader,
        skip_verify: bool,
    ) -> Result<ObjAttrs, ClusterError> {
        self.lock = None;
        let params = PutParams {
            attrs: self
                .attrs
                .clone()
                .unwrap_or_else(|| ObjAttrs::with_size(SIZE_UNKNOWN)),
            skip_verify,
        };
        let stored = self
            .store
            .put(&self.bck, &self.obj_name, reader, params)
            .await?;
        self.attrs = Some(stored.clone());
        Ok(stored)
    }

    pub async fn open(&self) -> Result<ObjReader, ClusterError> {
        self.store.open(&self.bck, &self.obj_name).await
    }

    /// Give up the handle, keeping whatever lock it holds.
    pub fn into_lock(self) -> Option<ObjLock> {
        self.lock
    }
}
