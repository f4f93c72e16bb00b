// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Copy/transform xaction
//!
//! An [`XactTransCopyObjs`] is a demand-driven job copying objects from one
//! bucket to another, optionally through a transform. Messages arrive via
//! [`XactTransCopyObjs::do_msg`]; the worker expands each into the source
//! objects this node owns and, per object, either writes the destination
//! locally or streams it to the owning peer over the data mover. The job
//! exits after the idle timeout once no work is pending, on abort, or when
//! an object fails.
//!
//! Every node runs the same message under the same id. A message's work
//! item on a node retires once the node has dispatched its share, every
//! peer has sent its done marker for the message, and every object received
//! for it has been written.

pub mod lriter;
pub mod registry;

use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use xcopy_cluster::{
    ClusterError, ClusterView, DataMover, DataProvider, Lom, OPCODE_DONE_SENDING, OPCODE_PUT,
    ObjHdr, ObjReader, ObjectStore, RecvCallback, Smap, Transport,
};
use xcopy_types::{
    Bck, MsgId, ObjAttrs, TransCpyListRangeMsg, XactId, XactKind, XactSnapshot, XactState,
};

use crate::config::TargetConfig;
use crate::error::XactError;
use crate::metrics;
use lriter::Candidate;

/// Prefix of the data-mover stream name; the xaction id follows.
pub const TRNAME_PREFIX: &str = "tco-";

/// Tunables shared by the xactions of one node.
#[derive(Debug, Clone)]
pub struct XactConfig {
    pub idle_timeout: Duration,
    pub work_queue: usize,
    pub delay_unreg_recv: Duration,
    /// Per-object transform timeout for messages that do not set one
    pub default_timeout: Duration,
}

impl From<&TargetConfig> for XactConfig {
    fn from(config: &TargetConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            work_queue: config.xact_work_queue,
            delay_unreg_recv: config.delay_unreg_recv(),
            default_timeout: config.etl_timeout(),
        }
    }
}

/// Node collaborators an xaction runs against.
#[derive(Clone)]
pub struct XactEnv {
    pub store: Arc<dyn ObjectStore>,
    pub view: Arc<dyn ClusterView>,
    pub transport: Arc<dyn Transport>,
    pub config: XactConfig,
}

/// What to start.
pub struct XactArgs {
    /// Cluster-wide id; names the data-mover stream shared by all nodes.
    /// Generated when absent.
    pub id: Option<XactId>,
    pub kind: XactKind,
    pub from_bck: Bck,
    pub to_bck: Bck,
    /// Source bytes: raw objects or transform output
    pub dp: Arc<dyn DataProvider>,
}

/// Per-message completion bookkeeping.
struct WorkItem {
    /// Peers whose done marker has not arrived yet
    awaiting: HashSet<String>,
    /// The message was submitted on this node
    submitted: bool,
    /// This node finished dispatching its share
    local_done: bool,
    /// Received objects still being written
    inflight: u64,
    waiters: Vec<oneshot::Sender<()>>,
}

impl WorkItem {
    fn new(peers: HashSet<String>) -> Self {
        Self {
            awaiting: peers,
            submitted: false,
            local_done: false,
            inflight: 0,
            waiters: Vec::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.submitted && self.local_done && self.awaiting.is_empty() && self.inflight == 0
    }

    /// Record `sender`'s done marker. False for a peer that is not
    /// expected or already reported.
    fn peer_done(&mut self, sender: &str) -> bool {
        self.awaiting.remove(sender)
    }
}

#[derive(Default)]
struct WorkTable {
    items: HashMap<MsgId, WorkItem>,
    retired: HashSet<MsgId>,
    /// Set when the xaction finishes; no further bookkeeping
    closed: bool,
}

impl WorkTable {
    /// The item for `msg_id`, created on first reference. `None` once the
    /// item retired or the table closed.
    fn item_mut(
        &mut self,
        msg_id: &str,
        peers: impl FnOnce() -> HashSet<String>,
    ) -> Option<&mut WorkItem> {
        if self.closed || self.retired.contains(msg_id) {
            return None;
        }
        Some(
            self.items
                .entry(msg_id.to_string())
                .or_insert_with(|| WorkItem::new(peers())),
        )
    }
}

struct Status {
    state: XactState,
    outcome: Option<XactState>,
    error: Option<Arc<XactError>>,
    abort_reason: Option<String>,
    finished_at: Option<DateTime<Utc>>,
}

/// How the worker loop ended.
enum End {
    Completed(Option<Arc<XactError>>),
    IdleTimeout,
    Aborted(Option<Arc<XactError>>),
}

/// Result of dispatching one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatched {
    Written(u64),
    Sent(u64),
    DryRun(u64),
    /// Destination already holds identical content
    Skipped,
    /// Source does not exist; nothing to do
    Missing,
}

/// Resolves when one submitted message has been fully processed.
pub struct WorkTicket {
    msg_id: MsgId,
    rx: oneshot::Receiver<()>,
    xact: Arc<XactTransCopyObjs>,
}

impl WorkTicket {
    pub fn msg_id(&self) -> &str {
        &self.msg_id
    }

    pub fn xact(&self) -> &Arc<XactTransCopyObjs> {
        &self.xact
    }

    /// Wait for the message's work item to retire. If the xaction ends
    /// first, its terminal error is returned.
    pub async fn wait(self) -> Result<(), XactError> {
        match self.rx.await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.xact.terminal_error()),
        }
    }
}

pub struct XactTransCopyObjs {
    id: XactId,
    kind: XactKind,
    from_bck: Bck,
    to_bck: Bck,
    node_id: String,
    started_at: DateTime<Utc>,
    config: XactConfig,

    store: Arc<dyn ObjectStore>,
    view: Arc<dyn ClusterView>,
    dm: Arc<dyn DataMover>,
    dp: Arc<dyn DataProvider>,

    work_tx: Mutex<Option<mpsc::Sender<TransCpyListRangeMsg>>>,
    work_rx: Mutex<Option<mpsc::Receiver<TransCpyListRangeMsg>>>,
    abort: CancellationToken,
    registered: AtomicBool,
    finishing: AtomicBool,
    finished: watch::Sender<bool>,

    pending: AtomicI64,
    table: Mutex<WorkTable>,
    status: Mutex<Status>,

    objects: AtomicU64,
    bytes: AtomicU64,
    in_objects: AtomicU64,
    in_bytes: AtomicU64,
    skipped: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl XactTransCopyObjs {
    /// Bind the data mover, register for incoming objects and start the
    /// worker.
    pub fn start(args: XactArgs, env: &XactEnv) -> Result<Arc<Self>, XactError> {
        let xact = Self::new(args, env);
        xact.bind()?;
        tokio::spawn(Arc::clone(&xact).run());
        Ok(xact)
    }

    fn new(args: XactArgs, env: &XactEnv) -> Arc<Self> {
        let id = args.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let trname = format!("{}{}", TRNAME_PREFIX, id);
        let (work_tx, work_rx) = mpsc::channel(env.config.work_queue.max(1));
        let (finished, _) = watch::channel(false);

        Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let recv: RecvCallback = Arc::new(
                move |hdr: ObjHdr,
                      body: ObjReader,
                      err: Option<ClusterError>|
                      -> BoxFuture<'static, ()> {
                    match weak.upgrade() {
                        Some(xact) => xact.recv(hdr, body, err),
                        None => Box::pin(async {}),
                    }
                },
            );
            Self {
                id,
                kind: args.kind,
                from_bck: args.from_bck,
                to_bck: args.to_bck,
                node_id: env.store.node_id().to_string(),
                started_at: Utc::now(),
                config: env.config.clone(),
                store: Arc::clone(&env.store),
                view: Arc::clone(&env.view),
                dm: env.transport.new_dm(&trname, recv),
                dp: args.dp,
                work_tx: Mutex::new(Some(work_tx)),
                work_rx: Mutex::new(Some(work_rx)),
                abort: CancellationToken::new(),
                registered: AtomicBool::new(false),
                finishing: AtomicBool::new(false),
                finished,
                pending: AtomicI64::new(0),
                table: Mutex::new(WorkTable::default()),
                status: Mutex::new(Status {
                    state: XactState::Starting,
                    outcome: None,
                    error: None,
                    abort_reason: None,
                    finished_at: None,
                }),
                objects: AtomicU64::new(0),
                bytes: AtomicU64::new(0),
                in_objects: AtomicU64::new(0),
                in_bytes: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }
        })
    }

    /// Register the receive callback and open the data mover. On failure
    /// the xaction is torn down before any worker runs.
    fn bind(&self) -> Result<(), XactError> {
        if let Err(e) = self.dm.reg_recv() {
            self.txn_abort();
            return Err(e.into());
        }
        self.registered.store(true, Ordering::SeqCst);
        self.dm.open();

        tracing::info!(
            xact_id = %self.id,
            kind = %self.kind,
            from = %self.from_bck,
            to = %self.to_bck,
            "Starting xaction"
        );
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> XactKind {
        self.kind
    }

    pub fn from_bck(&self) -> &Bck {
        &self.from_bck
    }

    pub fn to_bck(&self) -> &Bck {
        &self.to_bck
    }

    pub fn pending(&self) -> i64 {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// True from the moment the worker decided to stop; no new work is
    /// accepted.
    pub fn is_finishing(&self) -> bool {
        self.finishing.load(Ordering::SeqCst)
    }

    /// Queue a message. Pending work is incremented until the message's
    /// work item retires.
    pub async fn do_msg(
        self: &Arc<Self>,
        msg: TransCpyListRangeMsg,
    ) -> Result<WorkTicket, XactError> {
        let Some(work_tx) = lock(&self.work_tx).clone() else {
            return Err(XactError::Finished(self.id.clone()));
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock(&self.table);
            if table.closed {
                return Err(XactError::Finished(self.id.clone()));
            }
            let item = table.item_mut(&msg.id, || self.peers()).ok_or_else(|| {
                XactError::InvalidMessage(format!("message {} already processed", msg.id))
            })?;
            if item.submitted {
                return Err(XactError::InvalidMessage(format!(
                    "message {} already submitted",
                    msg.id
                )));
            }
            item.submitted = true;
            item.waiters.push(tx);
            self.pending.fetch_add(1, Ordering::SeqCst);
        }

        let msg_id = msg.id.clone();
        if work_tx.send(msg).await.is_err() {
            self.release_item(&msg_id);
            return Err(XactError::Finished(self.id.clone()));
        }
        tracing::debug!(xact_id = %self.id, msg_id = %msg_id, "Queued message");
        Ok(WorkTicket {
            msg_id,
            rx,
            xact: Arc::clone(self),
        })
    }

    /// Stop accepting messages; the worker completes once the queue drains.
    pub fn quiesce(&self) {
        lock(&self.work_tx).take();
    }

    /// Abort the xaction. Queued and in-progress work is abandoned.
    pub fn abort(&self, reason: impl Into<String>) {
        if self.is_finished() {
            return;
        }
        lock(&self.status).abort_reason = Some(reason.into());
        self.abort.cancel();
        // A worker that never started cannot observe the token.
        if lock(&self.work_rx).take().is_some() {
            self.finish(End::Aborted(None));
        }
    }

    /// Tear down an xaction whose construction did not complete: the data
    /// mover is closed and deregistered right away.
    pub fn txn_abort(&self) {
        self.abort.cancel();
        lock(&self.work_rx).take();
        if self.registered.swap(false, Ordering::SeqCst) {
            self.dm.unreg_recv();
        }
        self.finish(End::Aborted(None));
    }

    /// Wait for the xaction to finish and return its final snapshot.
    pub async fn wait_finished(&self) -> XactSnapshot {
        let mut rx = self.finished.subscribe();
        let _ = rx.wait_for(|done| *done).await;
        self.snapshot()
    }

    pub fn snapshot(&self) -> XactSnapshot {
        let status = lock(&self.status);
        XactSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            from_bck: self.from_bck.clone(),
            to_bck: self.to_bck.clone(),
            state: status.state,
            outcome: status.outcome,
            objects: self.objects.load(Ordering::SeqCst),
            bytes: self.bytes.load(Ordering::SeqCst),
            in_objects: self.in_objects.load(Ordering::SeqCst),
            in_bytes: self.in_bytes.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            pending: self.pending(),
            error: status.error.as_ref().map(|e| e.to_string()),
            started_at: self.started_at,
            finished_at: status.finished_at,
        }
    }

    /// The error a caller waiting on unfinished work should see.
    pub fn terminal_error(&self) -> XactError {
        let status = lock(&self.status);
        match (status.outcome, &status.error) {
            (Some(XactState::Aborted), Some(e)) => XactError::Aborted {
                xact: self.id.clone(),
                reason: e.to_string(),
                source: Some(Arc::clone(e)),
            },
            (Some(XactState::Aborted), None) => XactError::Aborted {
                xact: self.id.clone(),
                reason: status
                    .abort_reason
                    .clone()
                    .unwrap_or_else(|| "aborted".to_string()),
                source: None,
            },
            (_, Some(e)) => XactError::Failed {
                xact: self.id.clone(),
                source: Arc::clone(e),
            },
            _ => XactError::Finished(self.id.clone()),
        }
    }

    /// Nodes expected to send a done marker for each message.
    fn peers(&self) -> HashSet<String> {
        self.view
            .smap()
            .others(&self.node_id)
            .map(|node| node.id.clone())
            .collect()
    }

    fn set_state(&self, state: XactState) {
        lock(&self.status).state = state;
    }

    // ========================================================================
    // Worker
    // ========================================================================

    async fn run(self: Arc<Self>) {
        let Some(mut work_rx) = lock(&self.work_rx).take() else {
            return;
        };
        self.set_state(XactState::Running);

        let idle_timeout = self.config.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);

        let end = loop {
            tokio::select! {
                biased;
                () = self.abort.cancelled() => break End::Aborted(None),
                msg = work_rx.recv() => {
                    let Some(msg) = msg else {
                        break End::Completed(None);
                    };
                    if let Err(e) = self.process_msg(&msg).await {
                        if self.abort.is_cancelled() {
                            break End::Aborted(None);
                        }
                        let e = Arc::new(e);
                        if e.is_out_of_space() {
                            break End::Aborted(Some(e));
                        }
                        break End::Completed(Some(e));
                    }
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
                () = &mut idle => {
                    if self.pending() > 0 {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                    } else {
                        break End::IdleTimeout;
                    }
                }
            }
        };
        drop(work_rx);
        self.finish(end);
    }

    async fn process_msg(&self, msg: &TransCpyListRangeMsg) -> Result<(), XactError> {
        let smap = self.view.smap();
        let candidates =
            lriter::candidates(&self.store, &smap, &self.node_id, &self.from_bck, msg).await?;
        tracing::debug!(
            xact_id = %self.id,
            msg_id = %msg.id,
            count = candidates.len(),
            dry_run = msg.dry_run,
            "Processing message"
        );

        for cand in &candidates {
            let res = tokio::select! {
                biased;
                () = self.abort.cancelled() => return Err(self.aborted_by_request()),
                res = self.do_object(msg, cand, &smap) => res,
            };
            match res {
                Ok(done) => self.account(msg, cand, done),
                Err(e) => {
                    metrics::record_error(e.metric_label());
                    tracing::warn!(
                        xact_id = %self.id,
                        object = %self.from_bck.make_uname(&cand.name),
                        error = %e,
                        "Object failed; stopping"
                    );
                    return Err(e);
                }
            }
        }

        if smap.count_targets() > 1 {
            let hdr = ObjHdr {
                bck: msg.to_bck.clone(),
                obj_name: String::new(),
                attrs: ObjAttrs::with_size(0),
                opcode: OPCODE_DONE_SENDING,
                opaque: msg.id.as_bytes().to_vec(),
                sender: self.node_id.clone(),
            };
            self.dm.bcast(hdr, &smap).await?;
        }
        self.mark_local_done(&msg.id);
        Ok(())
    }

    async fn do_object(
        &self,
        msg: &TransCpyListRangeMsg,
        cand: &Candidate,
        smap: &Smap,
    ) -> Result<Dispatched, XactError> {
        let to_name = msg.to_name(&cand.name);
        if self.from_bck == msg.to_bck && to_name == cand.name {
            return Err(XactError::InvalidMessage(format!(
                "{} would be copied onto itself",
                self.from_bck.make_uname(&cand.name)
            )));
        }
        if msg.dry_run {
            return self.dry_run(cand).await;
        }

        let owner = smap.hrw_node(&msg.to_bck.make_uname(&to_name))?;
        let local = owner.id == self.node_id;
        if local
            && !msg.force
            && self.kind == XactKind::CopyObjects
            && self.is_identical(&cand.name, &msg.to_bck, &to_name).await
        {
            return Ok(Dispatched::Skipped);
        }

        let timeout = if msg.timeout().is_zero() {
            self.config.default_timeout
        } else {
            msg.timeout()
        };
        let src = match self.dp.reader(&self.from_bck, &cand.name, timeout).await {
            Ok(src) => src,
            Err(e) if e.is_not_found() => return self.missing(cand),
            Err(e) => return Err(e.into()),
        };

        if local {
            let mut lom = Lom::new(Arc::clone(&self.store), &msg.to_bck, &to_name)?;
            lom.copy_attrs(&src.attrs, false);
            return match lom.persist(src.reader).await {
                Ok(stored) => Ok(Dispatched::Written(stored.size.max(0) as u64)),
                Err(e) if e.is_out_of_space() => Err(XactError::OutOfSpace(format!(
                    "{}/{}: {}",
                    msg.to_bck, to_name, e
                ))),
                Err(e) => Err(e.into()),
            };
        }

        let (body, sent) = CountingReader::new(src.reader);
        let hdr = ObjHdr {
            bck: msg.to_bck.clone(),
            obj_name: to_name,
            attrs: src.attrs,
            opcode: OPCODE_PUT,
            opaque: msg.id.as_bytes().to_vec(),
            sender: self.node_id.clone(),
        };
        self.dm.send(hdr, Box::new(body), owner).await?;
        Ok(Dispatched::Sent(sent.load(Ordering::SeqCst)))
    }

    async fn dry_run(&self, cand: &Candidate) -> Result<Dispatched, XactError> {
        match self.store.load(&self.from_bck, &cand.name).await {
            Ok(attrs) => Ok(Dispatched::DryRun(attrs.size.max(0) as u64)),
            Err(e) if e.is_not_found() => self.missing(cand),
            Err(e) => Err(e.into()),
        }
    }

    /// A missing source is fatal only when the caller named it explicitly
    /// in a bucket without a remote backend.
    fn missing(&self, cand: &Candidate) -> Result<Dispatched, XactError> {
        let uname = self.from_bck.make_uname(&cand.name);
        if cand.explicit && !self.from_bck.is_remote() {
            return Err(XactError::NotFound(uname));
        }
        tracing::debug!(xact_id = %self.id, object = %uname, "Source missing; skipping");
        Ok(Dispatched::Missing)
    }

    async fn is_identical(&self, obj: &str, to_bck: &Bck, to_name: &str) -> bool {
        let (src, dst) = tokio::join!(
            self.store.load(&self.from_bck, obj),
            self.store.load(to_bck, to_name)
        );
        matches!((src, dst), (Ok(src), Ok(dst)) if dst.same_content(&src))
    }

    fn account(&self, msg: &TransCpyListRangeMsg, cand: &Candidate, done: Dispatched) {
        let bytes = match done {
            Dispatched::Written(n) | Dispatched::Sent(n) | Dispatched::DryRun(n) => n,
            Dispatched::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
                return;
            }
            Dispatched::Missing => return,
        };
        self.objects.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
        if !msg.dry_run {
            metrics::record_object(&self.kind.to_string(), bytes);
        }
        tracing::debug!(
            xact_id = %self.id,
            object = %self.from_bck.make_uname(&cand.name),
            bytes,
            result = ?done,
            "Object dispatched"
        );
    }

    fn aborted_by_request(&self) -> XactError {
        XactError::Aborted {
            xact: self.id.clone(),
            reason: lock(&self.status)
                .abort_reason
                .clone()
                .unwrap_or_else(|| "aborted".to_string()),
            source: None,
        }
    }

    // ========================================================================
    // Work item bookkeeping
    // ========================================================================

    fn mark_local_done(&self, msg_id: &str) {
        let mut table = lock(&self.table);
        if let Some(item) = table.item_mut(msg_id, || self.peers()) {
            item.local_done = true;
        }
        self.try_retire(&mut table, msg_id);
    }

    fn on_done_marker(&self, msg_id: &str, sender: &str) {
        let mut table = lock(&self.table);
        if let Some(item) = table.item_mut(msg_id, || self.peers()) {
            if !item.peer_done(sender) {
                tracing::warn!(
                    xact_id = %self.id,
                    msg_id = %msg_id,
                    sender = %sender,
                    "Ignoring unexpected done marker"
                );
                return;
            }
            tracing::debug!(
                xact_id = %self.id,
                msg_id = %msg_id,
                sender = %sender,
                awaiting = item.awaiting.len(),
                "Peer done sending"
            );
        }
        self.try_retire(&mut table, msg_id);
    }

    fn begin_receive(&self, msg_id: &str) {
        if let Some(item) = lock(&self.table).item_mut(msg_id, || self.peers()) {
            item.inflight += 1;
        }
    }

    fn end_receive(&self, msg_id: &str) {
        let mut table = lock(&self.table);
        if let Some(item) = table.items.get_mut(msg_id) {
            item.inflight = item.inflight.saturating_sub(1);
        }
        self.try_retire(&mut table, msg_id);
    }

    /// Retire the item once it is done; happens at most once per message.
    fn try_retire(&self, table: &mut WorkTable, msg_id: &str) {
        if !table.items.get(msg_id).is_some_and(WorkItem::is_done) {
            return;
        }
        if let Some(item) = table.items.remove(msg_id) {
            table.retired.insert(msg_id.to_string());
            self.pending.fetch_sub(1, Ordering::SeqCst);
            for waiter in item.waiters {
                let _ = waiter.send(());
            }
            tracing::debug!(xact_id = %self.id, msg_id = %msg_id, "Work item retired");
        }
    }

    /// Undo a submission that never reached the worker.
    fn release_item(&self, msg_id: &str) {
        let mut table = lock(&self.table);
        if table.items.remove(msg_id).is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    // ========================================================================
    // Receive side
    // ========================================================================

    fn recv(
        self: Arc<Self>,
        hdr: ObjHdr,
        body: ObjReader,
        err: Option<ClusterError>,
    ) -> BoxFuture<'static, ()> {
        if let Some(err) = err {
            tracing::error!(xact_id = %self.id, sender = %hdr.sender, error = %err, "Receive failed");
            metrics::record_error("recv");
            return Box::pin(async {});
        }
        let msg_id = hdr.opaque_str();
        if hdr.is_done_marker() {
            self.on_done_marker(&msg_id, &hdr.sender);
            return Box::pin(async {});
        }

        // Counted before the write starts so a done marker that follows
        // cannot retire the item early.
        self.begin_receive(&msg_id);
        Box::pin(async move {
            self.write_received(hdr, body).await;
            self.end_receive(&msg_id);
        })
    }

    async fn write_received(&self, hdr: ObjHdr, body: ObjReader) {
        let uname = hdr.bck.make_uname(&hdr.obj_name);
        let res = async {
            let mut lom = Lom::new(Arc::clone(&self.store), &hdr.bck, &hdr.obj_name)?;
            lom.copy_attrs(&hdr.attrs, false);
            lom.persist_trusted(body).await
        }
        .await;

        match res {
            Ok(stored) => {
                let size = stored.size.max(0) as u64;
                self.in_objects.fetch_add(1, Ordering::SeqCst);
                self.in_bytes.fetch_add(size, Ordering::SeqCst);
                metrics::record_recv(size);
                tracing::debug!(
                    xact_id = %self.id,
                    object = %uname,
                    sender = %hdr.sender,
                    size,
                    "Received object"
                );
            }
            Err(e) => {
                metrics::record_error("recv");
                tracing::error!(
                    xact_id = %self.id,
                    object = %uname,
                    sender = %hdr.sender,
                    error = %e,
                    "Failed to write received object"
                );
            }
        }
    }

    // ========================================================================
    // Termination
    // ========================================================================

    fn finish(&self, end: End) {
        if self.finishing.swap(true, Ordering::SeqCst) {
            return;
        }
        let (outcome, error) = match end {
            End::Completed(error) => (XactState::Completed, error),
            End::IdleTimeout => (XactState::IdleTimeout, None),
            End::Aborted(error) => (XactState::Aborted, error),
        };
        {
            let mut status = lock(&self.status);
            status.state = outcome;
            status.outcome = Some(outcome);
            status.error = error.clone();
        }

        let close_err = error
            .as_ref()
            .map(|e| ClusterError::Aborted(e.to_string()));
        self.dm.close(close_err.as_ref());
        lock(&self.work_tx).take();

        // Dropping the waiters hands every open ticket the terminal error.
        let abandoned = {
            let mut table = lock(&self.table);
            table.closed = true;
            let n = table.items.len();
            table.items.clear();
            n
        };
        self.pending.store(0, Ordering::SeqCst);

        if self.registered.swap(false, Ordering::SeqCst) {
            // Objects peers already sent still land during the grace delay.
            let dm = Arc::clone(&self.dm);
            let delay = self.config.delay_unreg_recv;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                dm.unreg_recv();
            });
        }

        metrics::record_xaction(&outcome.to_string());
        match &error {
            Some(e) => tracing::warn!(
                xact_id = %self.id,
                outcome = %outcome,
                objects = self.objects.load(Ordering::SeqCst),
                bytes = self.bytes.load(Ordering::SeqCst),
                abandoned,
                error = %e,
                "Xaction finished with error"
            ),
            None => tracing::info!(
                xact_id = %self.id,
                outcome = %outcome,
                objects = self.objects.load(Ordering::SeqCst),
                bytes = self.bytes.load(Ordering::SeqCst),
                abandoned,
                "Xaction finished"
            ),
        }

        {
            let mut status = lock(&self.status);
            status.state = XactState::Finished;
            status.finished_at = Some(Utc::now());
        }
        self.finished.send_replace(true);
    }
}

/// Counts bytes pulled through a reader.
struct CountingReader {
    inner: ObjReader,
    count: Arc<AtomicU64>,
}

impl CountingReader {
    fn new(inner: ObjReader) -> (Self, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        (
            Self {
                inner,
                count: Arc::clone(&count),
            },
            count,
        )
    }
}

impl AsyncRead for CountingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            let n = buf.filled().len() - before;
            self.count.fetch_add(n as u64, Ordering::SeqCst);
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use xcopy_cluster::{FsStore, LocalDataProvider, MemHub, Snode, StaticView};

    async fn node_env(
        hub: &Arc<MemHub>,
        view: &Arc<dyn ClusterView>,
        node_id: &str,
        dir: &TempDir,
    ) -> XactEnv {
        let store: Arc<dyn ObjectStore> =
            Arc::new(FsStore::new(node_id, dir.path()).await.unwrap());
        XactEnv {
            store,
            view: Arc::clone(view),
            transport: Arc::new(hub.transport(node_id)),
            config: XactConfig {
                idle_timeout: Duration::from_secs(60),
                work_queue: 8,
                delay_unreg_recv: Duration::ZERO,
                default_timeout: Duration::ZERO,
            },
        }
    }

    fn view_of(ids: &[&str]) -> Arc<dyn ClusterView> {
        let nodes = ids.iter().map(|id| Snode::new(*id, "")).collect();
        Arc::new(StaticView::new(Smap::new(nodes)))
    }

    fn xact_args(env: &XactEnv, id: &str) -> XactArgs {
        XactArgs {
            id: Some(id.to_string()),
            kind: XactKind::CopyObjects,
            from_bck: Bck::ais("src"),
            to_bck: Bck::ais("dst"),
            dp: Arc::new(LocalDataProvider::new(Arc::clone(&env.store))),
        }
    }

    fn empty_msg(id: &str) -> TransCpyListRangeMsg {
        let mut msg = TransCpyListRangeMsg::list(std::iter::empty::<&str>(), Bck::ais("dst"));
        msg.id = id.to_string();
        msg
    }

    fn peer_set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_work_item_done() {
        let mut item = WorkItem::new(peer_set(&["t2", "t3"]));
        item.submitted = true;
        item.local_done = true;
        assert!(!item.is_done());
        assert!(item.peer_done("t2"));
        assert!(item.peer_done("t3"));
        assert!(item.is_done());
        item.inflight = 1;
        assert!(!item.is_done());
    }

    #[test]
    fn test_work_item_counts_each_peer_once() {
        let mut item = WorkItem::new(peer_set(&["t2", "t3"]));
        item.submitted = true;
        item.local_done = true;
        assert!(item.peer_done("t2"));
        assert!(!item.peer_done("t2"));
        assert!(!item.peer_done("t9"));
        assert!(!item.is_done());
        assert!(item.peer_done("t3"));
        assert!(item.is_done());
    }

    #[test]
    fn test_table_ignores_retired_and_closed() {
        let mut table = WorkTable::default();
        assert!(table.item_mut("m1", HashSet::new).is_some());
        table.items.remove("m1");
        table.retired.insert("m1".to_string());
        assert!(table.item_mut("m1", HashSet::new).is_none());

        table.closed = true;
        assert!(table.item_mut("m2", HashSet::new).is_none());
    }

    #[tokio::test]
    async fn test_counting_reader() {
        use tokio::io::AsyncReadExt;

        let (mut reader, count) = CountingReader::new(Box::new(&b"twelve bytes"[..]));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn test_repeated_done_marker_does_not_retire_early() {
        let hub = MemHub::new();
        let view = view_of(&["t1", "t2", "t3"]);
        let mut dirs = Vec::new();
        let mut xacts = Vec::new();
        for id in ["t1", "t2", "t3"] {
            let dir = TempDir::new().unwrap();
            let env = node_env(&hub, &view, id, &dir).await;
            xacts.push(XactTransCopyObjs::start(xact_args(&env, "markers"), &env).unwrap());
            dirs.push(dir);
        }
        let xact = &xacts[0];

        xact.on_done_marker("m", "t2");
        xact.on_done_marker("m", "t2");
        xact.on_done_marker("m", "t9");
        let mut ticket = xact.do_msg(empty_msg("m")).await.unwrap();
        let early = tokio::time::timeout(Duration::from_millis(300), &mut ticket.rx).await;
        assert!(early.is_err(), "retired before t3 reported");
        assert_eq!(xact.pending(), 1);

        xact.on_done_marker("m", "t3");
        ticket.wait().await.unwrap();
        assert_eq!(xact.pending(), 0);

        for x in &xacts {
            x.abort("done");
        }
    }

    #[tokio::test]
    async fn test_failed_registration_tears_down() {
        let dir = TempDir::new().unwrap();
        let hub = MemHub::new();
        let env = node_env(&hub, &view_of(&["t1"]), "t1", &dir).await;
        let noop: RecvCallback = Arc::new(
            |_hdr: ObjHdr, _body: ObjReader, _err: Option<ClusterError>| -> BoxFuture<'static, ()> {
                Box::pin(async {})
            },
        );
        let holder = env.transport.new_dm("tco-dup", noop);
        holder.reg_recv().unwrap();

        let err = XactTransCopyObjs::start(xact_args(&env, "dup"), &env)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            XactError::Cluster(ClusterError::AlreadyRegistered(_))
        ));

        let xact = XactTransCopyObjs::new(xact_args(&env, "dup"), &env);
        assert!(xact.bind().is_err());
        assert!(xact.is_finished());
        let snap = xact.snapshot();
        assert_eq!(snap.state, XactState::Finished);
        assert_eq!(snap.outcome, Some(XactState::Aborted));
        assert!(!xact.dm.is_open());
        assert!(matches!(
            xact.do_msg(empty_msg("m")).await,
            Err(XactError::Finished(_))
        ));
        // The endpoint belongs to the holder; the failed xaction leaves it.
        assert!(hub.is_registered("t1", "tco-dup"));

        holder.unreg_recv();
        let xact = XactTransCopyObjs::start(xact_args(&env, "dup"), &env).unwrap();
        assert!(hub.is_registered("t1", "tco-dup"));
        xact.abort("done");
    }

    #[tokio::test]
    async fn test_abort_before_worker_runs_releases_data_mover() {
        let dir = TempDir::new().unwrap();
        let hub = MemHub::new();
        let env = node_env(&hub, &view_of(&["t1"]), "t1", &dir).await;

        let xact = XactTransCopyObjs::start(xact_args(&env, "early"), &env).unwrap();
        // Single-threaded runtime: the spawned worker has not been polled.
        assert!(lock(&xact.work_rx).is_some());
        assert!(xact.dm.is_open());

        xact.abort("early");
        assert!(xact.is_finished());
        assert!(!xact.dm.is_open());
        assert_eq!(xact.snapshot().outcome, Some(XactState::Aborted));
        assert!(matches!(
            xact.terminal_error(),
            XactError::Aborted { ref reason, .. } if reason == "early"
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!hub.is_registered("t1", "tco-early"));
    }
}
