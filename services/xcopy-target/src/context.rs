// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Target node: the state shared by all request handlers

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, Response};

use etl_comm::{CommEnv, EtlDataProvider, EtlError, EtlInfo, EtlRegistry};
use xcopy_cluster::{
    ClusterError, ClusterView, DataProvider, DpReader, FsStore, LocalDataProvider, MemHub,
    ObjectStore, Smap, Snode, StaticView, Transport,
};
use xcopy_types::{Bck, EtlDescriptor, TcoRequest, TcoResponse, XactKind, XactSnapshot};

use crate::config::TargetConfig;
use crate::error::XactError;
use crate::xact::registry::{RenewOutcome, XactRegistry};
use crate::xact::{WorkTicket, XactArgs, XactConfig, XactEnv};

pub struct TargetNode {
    node_id: String,
    env: XactEnv,
    comm_env: CommEnv,
    xacts: XactRegistry,
    etls: EtlRegistry,
}

impl TargetNode {
    /// Standalone node: a filesystem store under `data_dir` and a
    /// single-node cluster map.
    pub async fn new(config: TargetConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create data directory: {}",
                    config.data_dir.display()
                )
            })?;

        let mut store = FsStore::new(config.node_id.clone(), &config.data_dir)
            .await
            .context("Failed to open object store")?;
        if let Some(capacity) = config.capacity_bytes {
            store = store.with_capacity(capacity);
        }
        let view = StaticView::new(Smap::new(vec![Snode::new(
            config.node_id.clone(),
            format!("http://{}", config.bind_address),
        )]));
        let transport = MemHub::new().transport(config.node_id.clone());

        Ok(Self::with_parts(
            &config,
            Arc::new(store),
            Arc::new(view),
            Arc::new(transport),
        ))
    }

    /// Node over caller-provided collaborators; several nodes sharing a
    /// [`MemHub`] and a cluster view make an in-process cluster.
    pub fn with_parts(
        config: &TargetConfig,
        store: Arc<dyn ObjectStore>,
        view: Arc<dyn ClusterView>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let comm_env = CommEnv::new(Arc::clone(&store), config.http_timeout());
        Self {
            node_id: store.node_id().to_string(),
            env: XactEnv {
                store,
                view,
                transport,
                config: XactConfig::from(config),
            },
            comm_env,
            xacts: XactRegistry::default(),
            etls: EtlRegistry::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.env.store
    }

    // ========================================================================
    // Copy/transform
    // ========================================================================

    /// First phase of a submission: validate the request and make sure the
    /// xaction exists and receives. A coordinator calls this on every node
    /// before submitting, so no node streams objects to a peer that is not
    /// listening yet. Fills in the xaction and message ids when absent.
    pub fn begin_tco(&self, req: &mut TcoRequest) -> Result<RenewOutcome, XactError> {
        req.from_bck.validate()?;
        req.msg.normalize()?;
        if req.from_bck == req.msg.to_bck && req.etl_id.is_none() && req.msg.rename.is_none() {
            return Err(XactError::InvalidMessage(format!(
                "source and destination are both {}",
                req.from_bck
            )));
        }

        let (kind, dp): (XactKind, Arc<dyn DataProvider>) = match &req.etl_id {
            Some(etl_id) => (
                XactKind::EtlObjects,
                Arc::new(EtlDataProvider::new(self.etls.get(etl_id)?)),
            ),
            None => (
                XactKind::CopyObjects,
                Arc::new(LocalDataProvider::new(Arc::clone(&self.env.store))),
            ),
        };
        let renewed = self.xacts.renew(
            XactArgs {
                id: req.xact_id.clone(),
                kind,
                from_bck: req.from_bck.clone(),
                to_bck: req.msg.to_bck.clone(),
                dp,
            },
            &self.env,
        )?;
        req.xact_id = Some(renewed.xact().id().to_string());
        Ok(renewed)
    }

    /// Submit a copy/transform message. The returned ticket resolves when
    /// this node's share of the message is done.
    pub async fn tco(&self, mut req: TcoRequest) -> Result<(TcoResponse, WorkTicket), XactError> {
        let chosen_here = req.xact_id.is_none();
        let mut renewed = self.begin_tco(&mut req)?;
        let ticket = match renewed.xact().do_msg(req.msg.clone()).await {
            // The reused xaction stopped between renewal and submission; a
            // locally chosen id can be replaced.
            Err(XactError::Finished(_)) if renewed.is_reused() && chosen_here => {
                req.xact_id = None;
                renewed = self.begin_tco(&mut req)?;
                renewed.xact().do_msg(req.msg.clone()).await?
            }
            res => res?,
        };
        tracing::info!(
            xact_id = %renewed.xact().id(),
            msg_id = %ticket.msg_id(),
            reused = renewed.is_reused(),
            "Submitted copy message"
        );
        let resp = TcoResponse {
            xact_id: renewed.xact().id().to_string(),
            msg_id: ticket.msg_id().to_string(),
            reused: renewed.is_reused(),
        };
        Ok((resp, ticket))
    }

    pub fn xaction(&self, id: &str) -> Result<XactSnapshot, XactError> {
        self.xacts.get(id).map(|x| x.snapshot())
    }

    pub fn xactions(&self) -> Vec<XactSnapshot> {
        self.xacts.list()
    }

    pub fn abort_xaction(&self, id: &str) -> Result<XactSnapshot, XactError> {
        self.xacts.abort(id, "aborted by request")
    }

    /// Abort all running xactions.
    pub fn shutdown(&self) {
        self.xacts.abort_all("shutting down");
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    pub fn add_etl(&self, desc: &EtlDescriptor) -> Result<EtlInfo, EtlError> {
        self.etls.add(desc, self.comm_env.clone())?;
        self.etls.info(&desc.id)
    }

    pub fn remove_etl(&self, id: &str) -> Result<(), EtlError> {
        self.etls.remove(id)
    }

    pub fn etl(&self, id: &str) -> Result<EtlInfo, EtlError> {
        self.etls.info(id)
    }

    pub fn etls(&self) -> Vec<EtlInfo> {
        self.etls.list()
    }

    /// Serve a live read of `obj` through transform `etl_id`.
    pub async fn transform_object(
        &self,
        etl_id: &str,
        req: Request<Body>,
        bck: &Bck,
        obj: &str,
    ) -> Result<Response<Body>, EtlError> {
        let comm = self.etls.get(etl_id)?;
        comm.online_transform(req, bck, obj).await
    }

    /// Open an object as stored.
    pub async fn get_object(&self, bck: &Bck, obj: &str) -> Result<DpReader, ClusterError> {
        LocalDataProvider::new(Arc::clone(&self.env.store))
            .reader(bck, obj, std::time::Duration::ZERO)
            .await
    }
}
