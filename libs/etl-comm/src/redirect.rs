// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Redirect strategy: the client is sent to the backend, which fetches the
//! object from the cluster itself.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use http::header::LOCATION;
use http::{Request, Response, StatusCode};

use xcopy_types::{Bck, CommStats, CommType};

use crate::comm::{BaseComm, Communicator, parse_uri};
use crate::error::EtlError;
use crate::reader::TransformReader;
use crate::util::{determine_size, join_path, transformer_path};

pub struct RedirectComm {
    base: BaseComm,
    uri: String,
}

impl RedirectComm {
    pub(crate) fn new(base: BaseComm, uri: &str) -> Result<Self, EtlError> {
        parse_uri(uri)?;
        Ok(Self {
            base,
            uri: uri.to_string(),
        })
    }

    fn object_url(&self, bck: &Bck, obj: &str) -> String {
        join_path(&self.uri, &transformer_path(bck, obj))
    }
}

#[async_trait]
impl Communicator for RedirectComm {
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
        CommType::Redirect
    }

    async fn online_transform(
        &self,
        _req: Request<Body>,
        bck: &Bck,
        obj: &str,
    ) -> Result<Response<Body>, EtlError> {
        let size = determine_size(&self.base.env.store, bck, obj).await?;
        self.base.stats.add_in(size);

        Ok(Response::builder()
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header(LOCATION, self.object_url(bck, obj))
            .body(Body::empty())?)
    }

    async fn offline_transform(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<TransformReader, EtlError> {
        let size = determine_size(&self.base.env.store, bck, obj).await?;
        self.base.stats.add_in(size);

        self.base
            .get_with_timeout(&self.object_url(bck, obj), timeout)
            .await
    }

    fn stats(&self) -> CommStats {
        self.base.stats.snapshot()
    }
}
