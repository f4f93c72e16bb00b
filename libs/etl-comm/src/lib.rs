// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Transform communicators
//!
//! A [`Communicator`] is a target's client for one transform backend. Four
//! strategies are provided, chosen by the descriptor's [`CommType`]:
//!
//! - push (`hpush://`): the target PUTs object bytes to the backend and
//!   relays the response
//! - redirect (`hpull://`): clients are redirected to the backend, which
//!   reads the object back from the cluster
//! - reverse proxy (`hrev://`): the target forwards the read to the backend
//! - exec (`io://`): a local process transforms stdin to stdout
//!
//! Each strategy serves both live reads (`online_transform`) and bulk jobs
//! (`offline_transform`), and keeps object and byte counters.
//!
//! [`CommType`]: xcopy_types::CommType

mod comm;
mod deadline;
mod dp;
mod error;
mod exec;
mod push;
mod reader;
mod redirect;
mod registry;
mod revproxy;
mod stats;
pub mod util;

pub use comm::{CommEnv, Communicator, make_communicator};
pub use deadline::Deadline;
pub use dp::EtlDataProvider;
pub use error::EtlError;
pub use exec::ExecComm;
pub use push::PushComm;
pub use reader::TransformReader;
pub use redirect::RedirectComm;
pub use registry::{EtlInfo, EtlRegistry};
pub use revproxy::RevProxyComm;
pub use stats::Stats;
