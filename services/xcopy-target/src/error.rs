// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Xaction errors

use std::sync::Arc;

use thiserror::Error;

use etl_comm::EtlError;
use xcopy_cluster::ClusterError;
use xcopy_types::{MsgError, XactId};

#[derive(Debug, Error)]
pub enum XactError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Etl(#[from] EtlError),

    /// The xaction stopped before the work completed. `source` is the
    /// condition that stopped it, absent for an abort by request.
    #[error("xaction {xact} aborted: {reason}")]
    Aborted {
        xact: XactId,
        reason: String,
        #[source]
        source: Option<Arc<XactError>>,
    },

    /// The worker stopped on an object error.
    #[error("xaction {xact} failed: {source}")]
    Failed {
        xact: XactId,
        #[source]
        source: Arc<XactError>,
    },

    #[error("out of space writing {0}")]
    OutOfSpace(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("xaction {0} is finished")]
    Finished(XactId),

    #[error("xaction {0} not found")]
    UnknownXaction(XactId),
}

impl From<MsgError> for XactError {
    fn from(e: MsgError) -> Self {
        XactError::InvalidMessage(e.to_string())
    }
}

impl XactError {
    pub fn is_out_of_space(&self) -> bool {
        match self {
            XactError::Cluster(e) => e.is_out_of_space(),
            XactError::Etl(e) => e.is_out_of_space(),
            XactError::OutOfSpace(_) => true,
            XactError::Aborted {
                source: Some(source),
                ..
            } => source.is_out_of_space(),
            XactError::Failed { source, .. } => source.is_out_of_space(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            XactError::Cluster(e) => e.is_not_found(),
            XactError::Etl(e) => e.is_not_found(),
            XactError::NotFound(_) => true,
            XactError::Failed { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, XactError::Aborted { .. })
    }

    /// Short label for the error metrics.
    pub fn metric_label(&self) -> &'static str {
        if self.is_out_of_space() {
            return "out_of_space";
        }
        if self.is_not_found() {
            return "not_found";
        }
        match self {
            XactError::Cluster(ClusterError::ChecksumMismatch { .. }) => "checksum",
            XactError::Cluster(_) => "storage",
            XactError::Etl(_) => "transform",
            XactError::Aborted { .. } => "aborted",
            XactError::Failed { .. } => "failed",
            XactError::InvalidMessage(_) => "invalid_message",
            _ => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_space_through_abort() {
        let oos = XactError::from(ClusterError::OutOfSpace {
            needed: 10,
            available: 2,
        });
        assert!(oos.is_out_of_space());

        let aborted = XactError::Aborted {
            xact: "x1".to_string(),
            reason: oos.to_string(),
            source: Some(Arc::new(oos)),
        };
        assert!(aborted.is_aborted());
        assert!(aborted.is_out_of_space());
        assert_eq!(aborted.metric_label(), "out_of_space");
        assert!(std::error::Error::source(&aborted).is_some());
    }

    #[test]
    fn test_classification() {
        let nf = XactError::from(ClusterError::not_found(&xcopy_types::Bck::ais("b"), "o"));
        assert!(nf.is_not_found());
        assert!(!nf.is_out_of_space());
        assert_eq!(nf.metric_label(), "not_found");

        let by_request = XactError::Aborted {
            xact: "x1".to_string(),
            reason: "by request".to_string(),
            source: None,
        };
        assert!(!by_request.is_out_of_space());
        assert_eq!(
            XactError::from(MsgError::ZeroStep).metric_label(),
            "invalid_message"
        );
    }
}
