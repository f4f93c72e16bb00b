// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Storage target service library
//!
//! A storage target copies objects between buckets, optionally running each
//! one through a registered transform on the way.
//!
//! # Modules
//!
//! - [`config`] - Target configuration (node id, data directory, timeouts)
//! - [`context`] - Node state shared by request handlers
//! - [`error`] - Xaction errors
//! - [`metrics`] - Prometheus counters
//! - [`xact`] - The copy/transform xaction and its registry

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod xact;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use etl_comm::{EtlError, EtlInfo};
use xcopy_cluster::{ClusterError, memsys};
use xcopy_types::{
    Bck, CommStats, CommType, EtlDescriptor, Provider, TcoRequest, TcoResponse, XactSnapshot,
};

use crate::context::TargetNode;
use crate::error::XactError;

/// Error body returned by every failing handler
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// HTTP view of a registered transform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtlInfoBody {
    pub id: String,
    pub comm_type: CommType,
    pub pod_name: String,
    pub svc_name: String,
    pub stats: CommStats,
}

impl From<EtlInfo> for EtlInfoBody {
    fn from(info: EtlInfo) -> Self {
        Self {
            id: info.id,
            comm_type: info.comm_type,
            pod_name: info.pod_name,
            svc_name: info.svc_name,
            stats: info.stats,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TcoQuery {
    /// Hold the response until this node finished its share
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ObjectQuery {
    #[serde(default)]
    pub provider: Provider,
    /// Transform to read the object through
    #[serde(default)]
    pub etl: Option<String>,
}

/// Handler error: a status and a message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn cluster_status(e: &ClusterError) -> StatusCode {
    if e.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    if e.is_out_of_space() {
        return StatusCode::INSUFFICIENT_STORAGE;
    }
    match e {
        ClusterError::InvalidName(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn etl_status(e: &EtlError) -> StatusCode {
    match e {
        EtlError::Cluster(e) => cluster_status(e),
        EtlError::UnknownEtl(_) => StatusCode::NOT_FOUND,
        EtlError::Duplicate(_) => StatusCode::CONFLICT,
        EtlError::Descriptor(_) | EtlError::InvalidUri { .. } => StatusCode::BAD_REQUEST,
        EtlError::BackendUnavailable { .. } | EtlError::ProtocolMismatch { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<XactError> for ApiError {
    fn from(e: XactError) -> Self {
        let status = match &e {
            XactError::Cluster(e) => cluster_status(e),
            XactError::Etl(e) => etl_status(e),
            XactError::OutOfSpace(_) => StatusCode::INSUFFICIENT_STORAGE,
            XactError::NotFound(_) | XactError::UnknownXaction(_) => StatusCode::NOT_FOUND,
            XactError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            XactError::Finished(_) | XactError::Aborted { .. } => StatusCode::CONFLICT,
            XactError::Failed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<EtlError> for ApiError {
    fn from(e: EtlError) -> Self {
        Self {
            status: etl_status(&e),
            message: e.to_string(),
        }
    }
}

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        Self {
            status: cluster_status(&e),
            message: e.to_string(),
        }
    }
}

/// Build the target's HTTP API.
pub fn router(node: Arc<TargetNode>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/v1/xactions", get(list_xactions))
        .route("/v1/xactions/tco/begin", post(begin_tco))
        .route("/v1/xactions/tco", post(submit_tco))
        .route("/v1/xactions/{id}", get(get_xaction).delete(abort_xaction))
        .route("/v1/etl", get(list_etls).post(add_etl))
        .route("/v1/etl/{id}", get(get_etl).delete(remove_etl))
        .route("/v1/etl/{id}/stats", get(etl_stats))
        .route("/v1/objects/{bucket}/{*obj}", get(get_object))
        .with_state(node)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
}

async fn health(State(node): State<Arc<TargetNode>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: node.node_id().to_string(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

async fn list_xactions(State(node): State<Arc<TargetNode>>) -> Json<Vec<XactSnapshot>> {
    Json(node.xactions())
}

async fn begin_tco(
    State(node): State<Arc<TargetNode>>,
    Json(mut req): Json<TcoRequest>,
) -> Result<Json<TcoResponse>, ApiError> {
    let renewed = node.begin_tco(&mut req)?;
    Ok(Json(TcoResponse {
        xact_id: renewed.xact().id().to_string(),
        msg_id: req.msg.id,
        reused: renewed.is_reused(),
    }))
}

async fn submit_tco(
    State(node): State<Arc<TargetNode>>,
    Query(query): Query<TcoQuery>,
    Json(req): Json<TcoRequest>,
) -> Result<(StatusCode, Json<TcoResponse>), ApiError> {
    tracing::info!(
        from = %req.from_bck,
        to = %req.msg.to_bck,
        etl = ?req.etl_id,
        wait = query.wait,
        "Received copy request"
    );
    let (resp, ticket) = node.tco(req).await?;
    if query.wait {
        ticket.wait().await?;
        return Ok((StatusCode::OK, Json(resp)));
    }
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

async fn get_xaction(
    State(node): State<Arc<TargetNode>>,
    Path(id): Path<String>,
) -> Result<Json<XactSnapshot>, ApiError> {
    Ok(Json(node.xaction(&id)?))
}

async fn abort_xaction(
    State(node): State<Arc<TargetNode>>,
    Path(id): Path<String>,
) -> Result<Json<XactSnapshot>, ApiError> {
    tracing::info!(xact_id = %id, "Abort requested");
    Ok(Json(node.abort_xaction(&id)?))
}

async fn list_etls(State(node): State<Arc<TargetNode>>) -> Json<Vec<EtlInfoBody>> {
    Json(node.etls().into_iter().map(Into::into).collect())
}

async fn add_etl(
    State(node): State<Arc<TargetNode>>,
    Json(desc): Json<EtlDescriptor>,
) -> Result<(StatusCode, Json<EtlInfoBody>), ApiError> {
    let info = node.add_etl(&desc)?;
    Ok((StatusCode::CREATED, Json(info.into())))
}

async fn get_etl(
    State(node): State<Arc<TargetNode>>,
    Path(id): Path<String>,
) -> Result<Json<EtlInfoBody>, ApiError> {
    Ok(Json(node.etl(&id)?.into()))
}

async fn etl_stats(
    State(node): State<Arc<TargetNode>>,
    Path(id): Path<String>,
) -> Result<Json<CommStats>, ApiError> {
    Ok(Json(node.etl(&id)?.stats))
}

async fn remove_etl(
    State(node): State<Arc<TargetNode>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    node.remove_etl(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_object(
    State(node): State<Arc<TargetNode>>,
    Path((bucket, obj)): Path<(String, String)>,
    Query(query): Query<ObjectQuery>,
    req: Request,
) -> Result<Response, ApiError> {
    let bck = Bck::new(bucket, query.provider);
    if let Some(etl) = &query.etl {
        return Ok(node.transform_object(etl, req, &bck, &obj).await?);
    }

    let src = node.get_object(&bck, &obj).await?;
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream");
    if src.attrs.size >= 0 {
        builder = builder.header(header::CONTENT_LENGTH, src.attrs.size);
    }
    let chunk = memsys::buf_size_for(src.attrs.size);
    builder
        .body(Body::from_stream(ReaderStream::with_capacity(
            src.reader, chunk,
        )))
        .map_err(|e| ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        })
}
