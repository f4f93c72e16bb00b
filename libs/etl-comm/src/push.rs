// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Push strategy: the target PUTs object bytes to the backend and streams
//! the response back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use tokio_util::io::ReaderStream;

use xcopy_cluster::{Lom, memsys};
use xcopy_types::{Bck, CommStats, CommType};

use crate::comm::{BaseComm, Communicator, check_status, parse_uri, send_error};
use crate::deadline::Deadline;
use crate::error::EtlError;
use crate::reader::TransformReader;

pub(crate) const CONTENT_BINARY: &str = "application/octet-stream";

pub struct PushComm {
    base: BaseComm,
    uri: String,
}

impl PushComm {
    pub(crate) fn new(base: BaseComm, uri: &str) -> Result<Self, EtlError> {
        parse_uri(uri)?;
        Ok(Self {
            base,
            uri: uri.to_string(),
        })
    }

    async fn do_request(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<TransformReader, EtlError> {
        match self.try_do_request(bck, obj, timeout).await {
            Err(e) if e.is_not_found() && bck.is_remote() => {
                self.base.env.store.get_cold(bck, obj).await?;
                self.try_do_request(bck, obj, timeout).await
            }
            res => res,
        }
    }

    async fn try_do_request(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<TransformReader, EtlError> {
        let mut lom = Lom::new(Arc::clone(&self.base.env.store), bck, obj)?;
        lom.lock(false).await;
        lom.load(true).await?;
        let size = lom.size_bytes();
        let file = tokio::fs::File::open(lom.local_path()?)
            .await
            .map_err(xcopy_cluster::ClusterError::from)?;

        let mut deadline = Deadline::new(timeout);
        let req = self
            .base
            .env
            .client
            .put(&self.uri)
            .header(CONTENT_TYPE, CONTENT_BINARY)
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file));
        let resp = deadline
            .run(req.send())
            .await
            .ok_or_else(|| EtlError::timed_out(&self.uri))?
            .map_err(|e| send_error(&self.uri, e))?;
        lom.unlock();
        let resp = check_status(&self.uri, resp)?;

        self.base.stats.add_in(size);
        Ok(self.base.response_reader(resp, deadline))
    }
}

#[async_trait]
impl Communicator for PushComm {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn pod_name(&self) -> &str {
        &self.base.pod_name
    }

    fn svc_name(&self) -> &str {
        &self.base.svc_name
    }

    fn comm_type(&self) -> CommType {
        CommType::Push
    }

    async fn online_transform(
        &self,
        _req: Request<Body>,
        bck: &Bck,
        obj: &str,
    ) -> Result<Response<Body>, EtlError> {
        let reader = self.do_request(bck, obj, Duration::ZERO).await?;
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, CONTENT_BINARY);
        if reader.size() >= 0 {
            builder = builder.header(CONTENT_LENGTH, reader.size());
        }
        let chunk = memsys::buf_size_for(reader.size());
        Ok(builder.body(Body::from_stream(ReaderStream::with_capacity(
            reader, chunk,
        )))?)
    }

    async fn offline_transform(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<TransformReader, EtlError> {
        self.do_request(bck, obj, timeout).await
    }

    fn stats(&self) -> CommStats {
        self.base.stats.snapshot()
    }
}
