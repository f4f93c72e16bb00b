// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Storage-target collaborators
//!
//! The copy/transform engine runs on storage targets and leans on a few
//! services each target provides:
//!
//! - an [`ObjectStore`] with per-object locks and an atomic write path
//!   ([`FsStore`] keeps objects on a local filesystem),
//! - the [`Lom`] object handle,
//! - the cluster map ([`Smap`]) with HRW ownership,
//! - a [`DataMover`] for streaming objects between targets
//!   ([`MemHub`] wires targets living in one process),
//! - the process-wide slab buffer pool ([`memsys`]),
//! - [`DataProvider`]s that produce source streams.

pub mod dp;
pub mod error;
pub mod fs;
pub mod lom;
pub mod memsys;
pub mod smap;
pub mod store;
pub mod transport;

pub use dp::{DataProvider, DpReader, LocalDataProvider};
pub use error::ClusterError;
pub use fs::FsStore;
pub use lom::Lom;
pub use smap::{ClusterView, Smap, Snode, StaticView};
pub use store::{InMemoryBackend, ObjLock, ObjReader, ObjectStore, PutParams, RemoteBackend};
pub use transport::{
    DataMover, MemHub, MemTransport, OPCODE_DONE_SENDING, OPCODE_PUT, ObjHdr, RecvCallback,
    Transport,
};
