// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Node-to-node object streaming (the data mover)
//!
//! A [`DataMover`] is bound to one transport name. Senders push an
//! [`ObjHdr`] followed by the object body; the receiving node hands both to
//! the callback registered under the same name, one task per object.

mod mem;

pub use mem::{MemDataMover, MemHub, MemTransport};

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use xcopy_types::{Bck, ObjAttrs};

use crate::error::ClusterError;
use crate::smap::{Smap, Snode};
use crate::store::ObjReader;

/// Header opcode of an object payload
pub const OPCODE_PUT: u32 = 0;

/// Header opcode marking that the sender has no more objects for the
/// message named in `opaque`
pub const OPCODE_DONE_SENDING: u32 = 31;

/// Per-object header carried ahead of the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjHdr {
    /// Destination bucket
    pub bck: Bck,
    /// Destination object name
    pub obj_name: String,
    pub attrs: ObjAttrs,
    pub opcode: u32,
    /// Caller data; the copy xaction puts the message id here
    pub opaque: Vec<u8>,
    /// Sending node id, filled in by the mover
    pub sender: String,
}

impl ObjHdr {
    pub fn is_done_marker(&self) -> bool {
        self.opcode == OPCODE_DONE_SENDING
    }

    pub fn opaque_str(&self) -> String {
        String::from_utf8_lossy(&self.opaque).into_owned()
    }
}

/// Receive callback: header, body and the stream-level error, if any.
///
/// Movers invoke the callback in arrival order and run the returned future
/// on its own task, so bookkeeping done before the first await observes
/// objects and markers in the order a peer sent them.
pub type RecvCallback =
    Arc<dyn Fn(ObjHdr, ObjReader, Option<ClusterError>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Factory of data movers for one node.
pub trait Transport: Send + Sync {
    fn node_id(&self) -> &str;

    fn new_dm(&self, trname: &str, recv: RecvCallback) -> Arc<dyn DataMover>;
}

#[async_trait]
pub trait DataMover: Send + Sync {
    fn trname(&self) -> &str;

    /// Enable sending.
    fn open(&self);

    fn is_open(&self) -> bool;

    /// Start accepting objects addressed to this transport name.
    fn reg_recv(&self) -> Result<(), ClusterError>;

    /// Stop accepting objects; idempotent.
    fn unreg_recv(&self);

    /// Stream one object to `to`.
    async fn send(&self, hdr: ObjHdr, body: ObjReader, to: &Snode) -> Result<(), ClusterError>;

    /// Send a body-less header to every other node in `smap`.
    async fn bcast(&self, hdr: ObjHdr, smap: &Smap) -> Result<(), ClusterError>;

    /// Disable sending; `err` records why.
    fn close(&self, err: Option<&ClusterError>);
}
