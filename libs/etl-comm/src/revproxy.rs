// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Reverse-proxy strategy: the target forwards the client's read to the
//! backend and relays the answer, keeping the request on the target's own
//! error and stats path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use futures_util::TryStreamExt;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Request, Response};

use xcopy_types::{Bck, CommStats, CommType};

use crate::comm::{BaseComm, Communicator, parse_uri, send_error};
use crate::error::EtlError;
use crate::reader::TransformReader;
use crate::util::{determine_size, join_path, prune_query, transformer_path};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

pub struct RevProxyComm {
    base: BaseComm,
    uri: String,
    /// Scheme, host and port of the backend
    origin: String,
}

impl RevProxyComm {
    pub(crate) fn new(base: BaseComm, uri: &str) -> Result<Self, EtlError> {
        let parsed = parse_uri(uri)?;
        Ok(Self {
            base,
            uri: uri.to_string(),
            origin: parsed.origin().ascii_serialization(),
        })
    }

    /// Backend URL for a proxied read: the client's query, minus cluster
    /// control parameters, on the object's transformer path.
    fn proxied_url(&self, bck: &Bck, obj: &str, query: Option<&str>) -> String {
        let mut url = format!("{}{}", self.origin, transformer_path(bck, obj));
        if let Some(query) = query.map(prune_query).filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(&query);
        }
        url
    }
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

#[async_trait]
impl Communicator for RevProxyComm {
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
        CommType::RevProxy
    }

    async fn online_transform(
        &self,
        req: Request<Body>,
        bck: &Bck,
        obj: &str,
    ) -> Result<Response<Body>, EtlError> {
        let size = determine_size(&self.base.env.store, bck, obj).await?;
        self.base.stats.add_in(size);

        let url = self.proxied_url(bck, obj, req.uri().query());
        let mut headers = forwardable(req.headers());
        if !headers.contains_key(header::USER_AGENT) {
            // Keep the HTTP client from adding a default User-Agent.
            headers.insert(header::USER_AGENT, HeaderValue::from_static(""));
        }
        tracing::debug!(etl = %self.base.name, url = %url, "Proxying transform request");

        let resp = self
            .base
            .env
            .client
            .request(req.method().clone(), &url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| send_error(&url, e))?;

        let mut builder = Response::builder().status(resp.status());
        if let Some(out_headers) = builder.headers_mut() {
            *out_headers = forwardable(resp.headers());
        }
        let stats = Arc::clone(&self.base.stats);
        let body = resp
            .bytes_stream()
            .inspect_ok(move |chunk| stats.add_out(chunk.len() as u64));
        Ok(builder.body(Body::from_stream(body))?)
    }

    async fn offline_transform(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<TransformReader, EtlError> {
        let size = determine_size(&self.base.env.store, bck, obj).await?;
        self.base.stats.add_in(size);

        let url = join_path(&self.uri, &transformer_path(bck, obj));
        self.base.get_with_timeout(&url, timeout).await
    }

    fn stats(&self) -> CommStats {
        self.base.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::CommEnv;
    use tempfile::TempDir;
    use xcopy_cluster::FsStore;
    use xcopy_types::{EtlDescriptor, Provider};

    #[tokio::test]
    async fn test_proxied_url() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsStore::new("t1", dir.path()).await.unwrap());
        let desc = EtlDescriptor {
            id: "rp".to_string(),
            svc_name: String::new(),
            pod_name: String::new(),
            comm_type: CommType::RevProxy,
            uri: "http://10.0.0.5:8000/ignored/path".to_string(),
            command: vec![],
        };
        let base = BaseComm::new(&desc, CommEnv::new(store, Duration::ZERO));
        let comm = RevProxyComm::new(base, &desc.uri).unwrap();
        let bck = Bck::new("b", Provider::Ais);

        assert_eq!(
            comm.proxied_url(&bck, "x.txt", Some("uuid=1&pid=2&utm=3&fmt=a")),
            "http://10.0.0.5:8000/ais%2Fb%2Fx.txt?fmt=a"
        );
        assert_eq!(
            comm.proxied_url(&bck, "x.txt", Some("uuid=1")),
            "http://10.0.0.5:8000/ais%2Fb%2Fx.txt"
        );
        assert_eq!(comm.svc_name(), "rp");
    }

    #[test]
    fn test_hop_by_hop_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::HOST, HeaderValue::from_static("target:8081"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        let out = forwardable(&headers);
        assert_eq!(out.len(), 1);
        assert!(out.contains_key(header::ACCEPT));
    }
}
