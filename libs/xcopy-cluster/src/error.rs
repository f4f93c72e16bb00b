// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Error types for storage-target collaborators

use std::io;

use thiserror::Error;
use xcopy_types::Bck;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{bck}/{obj}: object does not exist")]
    NotFound { bck: Bck, obj: String },

    #[error("out of space: need {needed} bytes, {available} available")]
    OutOfSpace { needed: u64, available: u64 },

    #[error("{bck}/{obj}: checksum mismatch (expected {expected}, computed {computed})")]
    ChecksumMismatch {
        bck: Bck,
        obj: String,
        expected: String,
        computed: String,
    },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("no such node {0:?}")]
    NoSuchNode(String),

    #[error("stream {0:?} is closed")]
    StreamClosed(String),

    #[error("receive handler for {0:?} is already registered")]
    AlreadyRegistered(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("data provider: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn not_found(bck: &Bck, obj: &str) -> Self {
        ClusterError::NotFound {
            bck: bck.clone(),
            obj: obj.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound { .. } => true,
            ClusterError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_out_of_space(&self) -> bool {
        match self {
            ClusterError::OutOfSpace { .. } => true,
            ClusterError::Io(e) => e.kind() == io::ErrorKind::StorageFull,
            _ => false,
        }
    }

    /// Recover a `ClusterError` that travelled inside an `io::Error`
    /// (readers surface provider failures that way).
    pub fn from_io(e: io::Error) -> Self {
        if e.get_ref().is_some_and(|inner| inner.is::<ClusterError>()) {
            if let Some(inner) = e.into_inner() {
                return match inner.downcast::<ClusterError>() {
                    Ok(err) => *err,
                    Err(other) => ClusterError::Io(io::Error::other(other)),
                };
            }
            return ClusterError::Io(io::Error::other("unknown reader error"));
        }
        if e.kind() == io::ErrorKind::StorageFull {
            return ClusterError::OutOfSpace {
                needed: 0,
                available: 0,
            };
        }
        ClusterError::Io(e)
    }
}

impl From<ClusterError> for io::Error {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::Io(inner) => inner,
            other => io::Error::other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let nf = ClusterError::not_found(&Bck::ais("b"), "o");
        assert!(nf.is_not_found());
        assert!(!nf.is_out_of_space());
        assert_eq!(nf.to_string(), "ais://b/o: object does not exist");

        let io_nf = ClusterError::Io(io::Error::from(io::ErrorKind::NotFound));
        assert!(io_nf.is_not_found());

        let full = ClusterError::from_io(io::Error::from(io::ErrorKind::StorageFull));
        assert!(matches!(full, ClusterError::OutOfSpace { .. }));
    }

    #[test]
    fn test_round_trip_through_io_error() {
        let err: io::Error = ClusterError::OutOfSpace {
            needed: 10,
            available: 2,
        }
        .into();
        let back = ClusterError::from_io(err);
        assert!(back.is_out_of_space());

        let plain = ClusterError::from_io(io::Error::other("boom"));
        assert!(matches!(plain, ClusterError::Io(_)));
    }
}
