// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! The communicator contract and the parts the strategies share

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use futures_util::TryStreamExt;
use http::{Request, Response};
use tokio_util::io::StreamReader;

use xcopy_cluster::ObjectStore;
use xcopy_types::{Bck, CommStats, CommType, EtlDescriptor, SIZE_UNKNOWN};

use crate::deadline::Deadline;
use crate::error::EtlError;
use crate::exec::ExecComm;
use crate::push::PushComm;
use crate::reader::TransformReader;
use crate::redirect::RedirectComm;
use crate::revproxy::RevProxyComm;
use crate::stats::Stats;

/// Client of one transform backend.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// ETL id the communicator was registered under
    fn name(&self) -> &str;

    fn pod_name(&self) -> &str;

    fn svc_name(&self) -> &str;

    fn comm_type(&self) -> CommType;

    /// Serve a live read of `obj` with transformed bytes, or with a
    /// redirect for strategies that send the client to the backend.
    async fn online_transform(
        &self,
        req: Request<Body>,
        bck: &Bck,
        obj: &str,
    ) -> Result<Response<Body>, EtlError>;

    /// Produce the transformed stream of `obj` for a bulk job. A zero
    /// `timeout` means no deadline.
    async fn offline_transform(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<TransformReader, EtlError>;

    fn stats(&self) -> CommStats;
}

/// What a communicator needs from its storage target.
#[derive(Clone)]
pub struct CommEnv {
    pub store: Arc<dyn ObjectStore>,
    /// Client for outbound calls to HTTP backends
    pub client: reqwest::Client,
}

impl CommEnv {
    pub fn new(store: Arc<dyn ObjectStore>, connect_timeout: Duration) -> Self {
        // reqwest is built without a bundled provider; an error here only
        // means one is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let mut builder = reqwest::Client::builder();
        if !connect_timeout.is_zero() {
            builder = builder.connect_timeout(connect_timeout);
        }
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());
        Self { store, client }
    }
}

/// Pick the strategy named by `desc.comm_type`. The choice is fixed for
/// the communicator's lifetime.
pub fn make_communicator(
    desc: &EtlDescriptor,
    env: CommEnv,
) -> Result<Arc<dyn Communicator>, EtlError> {
    desc.validate()?;
    let base = BaseComm::new(desc, env);
    let comm: Arc<dyn Communicator> = match desc.comm_type {
        CommType::Push => Arc::new(PushComm::new(base, &desc.uri)?),
        CommType::Redirect => Arc::new(RedirectComm::new(base, &desc.uri)?),
        CommType::RevProxy => Arc::new(RevProxyComm::new(base, &desc.uri)?),
        CommType::Exec => Arc::new(ExecComm::new(base, desc.command.clone())),
    };
    tracing::info!(
        etl = %desc.id,
        comm_type = %desc.comm_type,
        pod = %comm.pod_name(),
        "Created transform communicator"
    );
    Ok(comm)
}

/// Identity, stats and environment common to every strategy.
pub(crate) struct BaseComm {
    pub(crate) name: String,
    pub(crate) pod_name: String,
    pub(crate) svc_name: String,
    pub(crate) stats: Arc<Stats>,
    pub(crate) env: CommEnv,
}

impl BaseComm {
    pub(crate) fn new(desc: &EtlDescriptor, env: CommEnv) -> Self {
        let pod_name = if desc.pod_name.is_empty() {
            desc.id.clone()
        } else {
            desc.pod_name.clone()
        };
        let svc_name = if desc.svc_name.is_empty() {
            pod_name.clone()
        } else {
            desc.svc_name.clone()
        };
        Self {
            name: desc.id.clone(),
            pod_name,
            svc_name,
            stats: Arc::new(Stats::new()),
            env,
        }
    }

    /// Outbound GET for the pull-style strategies' batch path.
    pub(crate) async fn get_with_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<TransformReader, EtlError> {
        let mut deadline = Deadline::new(timeout);
        let resp = deadline
            .run(self.env.client.get(url).send())
            .await
            .ok_or_else(|| EtlError::timed_out(url))?
            .map_err(|e| send_error(url, e))?;
        let resp = check_status(url, resp)?;
        Ok(self.response_reader(resp, deadline))
    }

    /// Wrap a backend response body; the object is counted once the reader
    /// drains it to EOF.
    pub(crate) fn response_reader(
        &self,
        resp: reqwest::Response,
        deadline: Deadline,
    ) -> TransformReader {
        let size = resp
            .content_length()
            .map_or(SIZE_UNKNOWN, |n| n as i64);
        let body = resp.bytes_stream().map_err(io::Error::other);
        let stats = Arc::clone(&self.stats);
        TransformReader::new(Box::new(StreamReader::new(Box::pin(body))), size)
            .with_deadline(deadline)
            .counting(Arc::clone(&self.stats))
            .on_complete(move || stats.inc_objects())
    }
}

pub(crate) fn parse_uri(uri: &str) -> Result<url::Url, EtlError> {
    url::Url::parse(uri).map_err(|e| EtlError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn send_error(uri: &str, e: reqwest::Error) -> EtlError {
    if e.is_builder() {
        return EtlError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        };
    }
    EtlError::BackendUnavailable {
        uri: uri.to_string(),
        reason: e.to_string(),
    }
}

/// Server errors mean the backend is unhealthy; any other non-success
/// status means it does not speak the expected protocol.
pub(crate) fn check_status(
    uri: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, EtlError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    tracing::warn!(uri = %uri, status = %status, "Transform backend returned error status");
    if status.is_server_error() {
        Err(EtlError::BackendUnavailable {
            uri: uri.to_string(),
            reason: format!("status {}", status),
        })
    } else {
        Err(EtlError::ProtocolMismatch {
            uri: uri.to_string(),
            reason: format!("unexpected status {}", status),
        })
    }
}
