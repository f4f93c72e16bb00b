// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Data providers
//!
//! The copy path reads source objects through a [`DataProvider`]: either
//! the raw local bytes ([`LocalDataProvider`]) or the output of a transform.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

use xcopy_types::{Bck, ObjAttrs};

use crate::error::ClusterError;
use crate::lom::Lom;
use crate::store::{ObjLock, ObjReader, ObjectStore};

/// A source stream and the attributes it is described by.
///
/// `attrs.size` is `SIZE_UNKNOWN` when the provider cannot tell ahead of
/// time (transform output).
pub struct DpReader {
    pub reader: ObjReader,
    pub attrs: ObjAttrs,
}

#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Open `obj` in `bck`. `timeout` bounds providers that call out to
    /// another service; zero means no deadline.
    async fn reader(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<DpReader, ClusterError>;
}

/// Reads objects as stored, holding the shared lock while the returned
/// reader is alive.
pub struct LocalDataProvider {
    store: Arc<dyn ObjectStore>,
}

impl LocalDataProvider {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DataProvider for LocalDataProvider {
    async fn reader(
        &self,
        bck: &Bck,
        obj: &str,
        _timeout: Duration,
    ) -> Result<DpReader, ClusterError> {
        let mut lom = Lom::new(Arc::clone(&self.store), bck, obj)?;
        lom.lock(false).await;
        let attrs = match lom.load(true).await {
            Ok(attrs) => attrs,
            Err(e) if e.is_not_found() && bck.is_remote() => {
                lom.unlock();
                self.store.get_cold(bck, obj).await?;
                lom.lock(false).await;
                lom.load(true).await?
            }
            Err(e) => return Err(e),
        };
        let file = lom.open().await?;
        Ok(DpReader {
            reader: Box::new(LockedReader {
                inner: file,
                _lock: lom.into_lock(),
            }),
            attrs,
        })
    }
}

/// Reader that keeps an object lock until dropped.
pub struct LockedReader {
    inner: ObjReader,
    _lock: Option<ObjLock>,
}

impl AsyncRead for LockedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
