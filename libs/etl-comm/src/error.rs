// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Error types for transform communicators

use thiserror::Error;
use xcopy_cluster::ClusterError;
use xcopy_types::MsgError;

#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("transform backend {uri} unavailable: {reason}")]
    BackendUnavailable { uri: String, reason: String },

    #[error("transform backend {uri} protocol mismatch: {reason}")]
    ProtocolMismatch { uri: String, reason: String },

    #[error("exec {command:?} failed: {reason}")]
    Exec { command: String, reason: String },

    #[error("invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("invalid ETL descriptor: {0}")]
    Descriptor(#[from] MsgError),

    #[error("ETL {0:?} does not exist")]
    UnknownEtl(String),

    #[error("ETL {0:?} already exists")]
    Duplicate(String),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

impl EtlError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EtlError::Cluster(e) if e.is_not_found())
    }

    pub fn is_out_of_space(&self) -> bool {
        matches!(self, EtlError::Cluster(e) if e.is_out_of_space())
    }

    pub(crate) fn timed_out(uri: &str) -> Self {
        EtlError::BackendUnavailable {
            uri: uri.to_string(),
            reason: "deadline exceeded".to_string(),
        }
    }
}

impl From<EtlError> for ClusterError {
    fn from(e: EtlError) -> Self {
        match e {
            EtlError::Cluster(inner) => inner,
            other => ClusterError::Provider(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcopy_types::Bck;

    #[test]
    fn test_cluster_errors_pass_through() {
        let etl: EtlError = ClusterError::not_found(&Bck::ais("b"), "o").into();
        assert!(etl.is_not_found());
        let back: ClusterError = etl.into();
        assert!(back.is_not_found());
    }

    #[test]
    fn test_backend_errors_wrap() {
        let err: ClusterError = EtlError::timed_out("http://etl:80").into();
        assert!(matches!(err, ClusterError::Provider(_)));
        assert!(err.to_string().contains("deadline exceeded"));
    }
}
