// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Registry of copy xactions on one node
//!
//! At most one xaction runs per (kind, source bucket, destination bucket).
//! Renewing while one is running hands back the running instance; finished
//! xactions stay queryable until pushed out of the history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use xcopy_types::{Bck, XactId, XactKind, XactSnapshot};

use super::{XactArgs, XactEnv, XactTransCopyObjs};
use crate::error::XactError;

/// Finished xactions kept for queries
pub const DEFAULT_HISTORY: usize = 64;

type RunningKey = (XactKind, Bck, Bck);

/// Result of [`XactRegistry::renew`].
pub enum RenewOutcome {
    New(Arc<XactTransCopyObjs>),
    Reused(Arc<XactTransCopyObjs>),
}

impl RenewOutcome {
    pub fn xact(&self) -> &Arc<XactTransCopyObjs> {
        match self {
            RenewOutcome::New(x) | RenewOutcome::Reused(x) => x,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, RenewOutcome::Reused(_))
    }
}

#[derive(Default)]
struct Inner {
    running: HashMap<RunningKey, Arc<XactTransCopyObjs>>,
    all: HashMap<XactId, Arc<XactTransCopyObjs>>,
    /// Ids in start order, for pruning
    order: VecDeque<XactId>,
}

pub struct XactRegistry {
    inner: Mutex<Inner>,
    history: usize,
}

impl Default for XactRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl XactRegistry {
    pub fn new(history: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            history,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the running xaction for the args' (kind, from, to), or start
    /// a new one.
    ///
    /// A running xaction is reused when the caller asked for no particular
    /// id or for its id; nodes of one job must share the id to share a
    /// data-mover stream.
    pub fn renew(&self, args: XactArgs, env: &XactEnv) -> Result<RenewOutcome, XactError> {
        let key = (args.kind, args.from_bck.clone(), args.to_bck.clone());
        let mut inner = self.lock();

        if let Some(running) = inner.running.get(&key) {
            if !running.is_finishing() {
                if args.id.as_deref().is_some_and(|id| id != running.id()) {
                    return Err(XactError::InvalidMessage(format!(
                        "xaction {} ({}) is already running for {} => {}",
                        running.id(),
                        args.kind,
                        args.from_bck,
                        args.to_bck
                    )));
                }
                tracing::debug!(xact_id = %running.id(), "Reusing running xaction");
                return Ok(RenewOutcome::Reused(Arc::clone(running)));
            }
        }
        if let Some(id) = args.id.as_deref().filter(|id| inner.all.contains_key(*id)) {
            return Err(XactError::InvalidMessage(format!(
                "xaction id {} was already used",
                id
            )));
        }

        let xact = XactTransCopyObjs::start(args, env)?;
        inner.running.insert(key, Arc::clone(&xact));
        inner.all.insert(xact.id().to_string(), Arc::clone(&xact));
        inner.order.push_back(xact.id().to_string());
        self.prune(&mut inner);
        Ok(RenewOutcome::New(xact))
    }

    pub fn get(&self, id: &str) -> Result<Arc<XactTransCopyObjs>, XactError> {
        self.lock()
            .all
            .get(id)
            .cloned()
            .ok_or_else(|| XactError::UnknownXaction(id.to_string()))
    }

    /// Snapshots of every known xaction, oldest first.
    pub fn list(&self) -> Vec<XactSnapshot> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.all.get(id))
            .map(|x| x.snapshot())
            .collect()
    }

    pub fn abort(&self, id: &str, reason: &str) -> Result<XactSnapshot, XactError> {
        let xact = self.get(id)?;
        xact.abort(reason);
        Ok(xact.snapshot())
    }

    /// Abort everything still running; used at shutdown.
    pub fn abort_all(&self, reason: &str) {
        let running: Vec<_> = self.lock().running.values().cloned().collect();
        for xact in running {
            xact.abort(reason);
        }
    }

    fn prune(&self, inner: &mut Inner) {
        inner.running.retain(|_, x| !x.is_finishing());
        while inner.order.len() > self.history {
            let Some(oldest) = inner.order.front().cloned() else {
                break;
            };
            let finished = inner.all.get(&oldest).is_none_or(|x| x.is_finished());
            if !finished {
                break;
            }
            inner.order.pop_front();
            inner.all.remove(&oldest);
        }
    }
}
