// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! In-process data mover
//!
//! Every node of a single-process cluster gets a [`MemTransport`] from a
//! shared [`MemHub`]. Receive registrations are mpsc endpoints keyed by
//! (node, transport name); object bodies travel as bounded chunk channels,
//! so a slow receiver applies back-pressure to the sender.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use crate::error::ClusterError;
use crate::memsys;
use crate::smap::{Smap, Snode};
use crate::store::ObjReader;
use crate::transport::{DataMover, ObjHdr, RecvCallback, Transport};

/// Pending deliveries per receive endpoint
const DELIVERY_QUEUE: usize = 256;

/// Body chunks in flight per object
const BODY_CHUNKS: usize = 4;

struct Delivery {
    hdr: ObjHdr,
    body: ObjReader,
}

enum Frame {
    Data(Bytes),
    Fin,
    Err(io::Error),
}

type EndpointKey = (String, String);

/// Switchboard shared by all in-process nodes.
#[derive(Default)]
pub struct MemHub {
    endpoints: RwLock<HashMap<EndpointKey, mpsc::Sender<Delivery>>>,
}

impl MemHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, node_id: impl Into<String>) -> MemTransport {
        MemTransport {
            hub: Arc::clone(self),
            node_id: node_id.into(),
        }
    }

    pub fn is_registered(&self, node_id: &str, trname: &str) -> bool {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(node_id.to_string(), trname.to_string()))
    }

    fn register(
        &self,
        node_id: &str,
        trname: &str,
        tx: mpsc::Sender<Delivery>,
    ) -> Result<(), ClusterError> {
        let mut endpoints = self
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let key = (node_id.to_string(), trname.to_string());
        if endpoints.contains_key(&key) {
            return Err(ClusterError::AlreadyRegistered(trname.to_string()));
        }
        endpoints.insert(key, tx);
        Ok(())
    }

    fn unregister(&self, node_id: &str, trname: &str) -> bool {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(node_id.to_string(), trname.to_string()))
            .is_some()
    }

    fn endpoint(&self, node_id: &str, trname: &str) -> Option<mpsc::Sender<Delivery>> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(node_id.to_string(), trname.to_string()))
            .cloned()
    }
}

/// One node's view of the hub.
pub struct MemTransport {
    hub: Arc<MemHub>,
    node_id: String,
}

impl Transport for MemTransport {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn new_dm(&self, trname: &str, recv: RecvCallback) -> Arc<dyn DataMover> {
        Arc::new(MemDataMover {
            hub: Arc::clone(&self.hub),
            node_id: self.node_id.clone(),
            trname: trname.to_string(),
            recv,
            open: AtomicBool::new(false),
        })
    }
}

pub struct MemDataMover {
    hub: Arc<MemHub>,
    node_id: String,
    trname: String,
    recv: RecvCallback,
    open: AtomicBool,
}

impl MemDataMover {
    async fn deliver(
        &self,
        mut hdr: ObjHdr,
        mut body: ObjReader,
        to: &Snode,
    ) -> Result<(), ClusterError> {
        let endpoint = self
            .hub
            .endpoint(&to.id, &self.trname)
            .ok_or_else(|| ClusterError::NoSuchNode(format!("{} ({})", to.id, self.trname)))?;

        hdr.sender = self.node_id.clone();
        let size = hdr.attrs.size;
        let (tx, rx) = mpsc::channel(BODY_CHUNKS);
        endpoint
            .send(Delivery {
                hdr,
                body: Box::new(StreamReader::new(Box::pin(frames(rx)))),
            })
            .await
            .map_err(|_| ClusterError::StreamClosed(self.trname.clone()))?;

        let mut buf = memsys::alloc_size(size);
        loop {
            match body.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if tx.send(Frame::Data(chunk)).await.is_err() {
                        return Err(ClusterError::StreamClosed(self.trname.clone()));
                    }
                }
                Err(e) => {
                    let err = ClusterError::from_io(e);
                    let relayed = io::Error::other(err.to_string());
                    let _ = tx.send(Frame::Err(relayed)).await;
                    return Err(err);
                }
            }
        }
        tx.send(Frame::Fin)
            .await
            .map_err(|_| ClusterError::StreamClosed(self.trname.clone()))
    }
}

/// Reassemble a body from frames; a sender that disappears without `Fin`
/// shows up as an unexpected EOF.
fn frames(rx: mpsc::Receiver<Frame>) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures_util::stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Frame::Data(chunk)) => Some((Ok(chunk), Some(rx))),
            Some(Frame::Fin) => None,
            Some(Frame::Err(e)) => Some((Err(e), None)),
            None => Some((
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "sender went away mid-object",
                )),
                None,
            )),
        }
    })
}

#[async_trait]
impl DataMover for MemDataMover {
    fn trname(&self) -> &str {
        &self.trname
    }

    fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn reg_recv(&self) -> Result<(), ClusterError> {
        let (tx, mut rx) = mpsc::channel::<Delivery>(DELIVERY_QUEUE);
        self.hub.register(&self.node_id, &self.trname, tx)?;

        let recv = Arc::clone(&self.recv);
        tokio::spawn(async move {
            while let Some(Delivery { hdr, body }) = rx.recv().await {
                // The callback runs in arrival order; only its future is
                // detached.
                tokio::spawn(recv(hdr, body, None));
            }
        });
        tracing::debug!(node = %self.node_id, trname = %self.trname, "Registered receive handler");
        Ok(())
    }

    fn unreg_recv(&self) {
        if self.hub.unregister(&self.node_id, &self.trname) {
            tracing::debug!(node = %self.node_id, trname = %self.trname, "Unregistered receive handler");
        }
    }

    async fn send(&self, hdr: ObjHdr, body: ObjReader, to: &Snode) -> Result<(), ClusterError> {
        if !self.is_open() {
            return Err(ClusterError::StreamClosed(self.trname.clone()));
        }
        self.deliver(hdr, body, to).await
    }

    async fn bcast(&self, hdr: ObjHdr, smap: &Smap) -> Result<(), ClusterError> {
        if !self.is_open() {
            return Err(ClusterError::StreamClosed(self.trname.clone()));
        }
        let mut first_err = None;
        for node in smap.others(&self.node_id) {
            if let Err(e) = self
                .deliver(hdr.clone(), Box::new(tokio::io::empty()), node)
                .await
            {
                tracing::warn!(trname = %self.trname, node = %node.id, error = %e, "Broadcast failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn close(&self, err: Option<&ClusterError>) {
        if self.open.swap(false, Ordering::SeqCst) {
            match err {
                Some(e) => tracing::info!(trname = %self.trname, error = %e, "Closing data mover"),
                None => tracing::debug!(trname = %self.trname, "Closing data mover"),
            }
        }
    }
}
