// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for the object copy/transform engine.
//!
//! This crate contains the data structures exchanged between storage targets
//! and their callers: buckets, selection messages for list/range copy jobs,
//! transform (ETL) endpoint descriptors, object attributes and xaction status
//! snapshots.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

// ============================================================================
// Type Aliases
// ============================================================================

/// Xaction identifier (UUID string)
pub type XactId = String;

/// Selection message identifier (UUID string)
pub type MsgId = String;

/// Size value used when the length of a stream is not known up front.
pub const SIZE_UNKNOWN: i64 = -1;

// ============================================================================
// Validation Errors
// ============================================================================

/// Errors raised while validating caller-supplied messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MsgError {
    #[error("invalid bucket name {0:?}")]
    InvalidBucket(String),

    #[error("invalid object name {0:?}")]
    InvalidObjName(String),

    #[error("ETL {id}: communication type {comm_type} requires an endpoint URI")]
    MissingUri { id: String, comm_type: CommType },

    #[error("ETL {0}: exec communication requires a command")]
    MissingCommand(String),

    #[error("ETL descriptor has an empty id")]
    EmptyEtlId,

    #[error("range step must be positive")]
    ZeroStep,
}

// ============================================================================
// Buckets
// ============================================================================

/// Backend provider of a bucket.
///
/// Every provider except `ais` is remote-backed: objects missing locally can
/// be fetched ("cold GET") from the backing store.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Provider {
    /// Native cluster bucket
    #[default]
    Ais,
    /// Amazon S3 backed
    Aws,
    /// Google Cloud Storage backed
    Gcp,
    /// Azure Blob Storage backed
    Azure,
    /// Read-only HTTP(S) backed
    Ht,
}

/// A bucket reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bck {
    /// Bucket name
    pub name: String,
    /// Backend provider
    #[serde(default)]
    pub provider: Provider,
}

impl Bck {
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }

    /// Shorthand for a native (`ais`) bucket
    pub fn ais(name: impl Into<String>) -> Self {
        Self::new(name, Provider::Ais)
    }

    pub fn is_remote(&self) -> bool {
        self.provider != Provider::Ais
    }

    /// Bucket-scoped object key used for ownership hashing and for
    /// addressing objects at a transform endpoint.
    pub fn make_uname(&self, obj_name: &str) -> String {
        format!("{}/{}/{}", self.provider, self.name, obj_name)
    }

    pub fn validate(&self) -> Result<(), MsgError> {
        let bad = self.name.is_empty()
            || self.name.starts_with('.')
            || self
                .name
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_whitespace() || c.is_control());
        if bad {
            return Err(MsgError::InvalidBucket(self.name.clone()));
        }
        Ok(())
    }
}

impl fmt::Display for Bck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.provider, self.name)
    }
}

/// Validate an object name: non-empty, relative, no `..` components.
pub fn validate_obj_name(name: &str) -> Result<(), MsgError> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.split('/').any(|c| c == ".." || c == "." || c.is_empty())
        || name.chars().any(|c| c.is_control());
    if bad {
        return Err(MsgError::InvalidObjName(name.to_string()));
    }
    Ok(())
}

// ============================================================================
// Selection Messages
// ============================================================================

fn default_step() -> u64 {
    1
}

/// A bash-style numeric range: `prefix{lo..hi..step}suffix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeTemplate {
    #[serde(default)]
    pub prefix: String,
    pub lo: u64,
    pub hi: u64,
    #[serde(default = "default_step")]
    pub step: u64,
    /// Zero-padding width; 0 disables padding
    #[serde(default)]
    pub digits: usize,
    #[serde(default)]
    pub suffix: String,
}

impl RangeTemplate {
    /// Parse `prefix{lo..hi}suffix` or `prefix{lo..hi..step}suffix`.
    ///
    /// When `lo` and `hi` are written with the same number of digits the
    /// generated names are zero-padded to that width (`{001..100}`).
    pub fn parse(template: &str) -> Option<Self> {
        let open = template.find('{')?;
        let close = open + template[open..].find('}')?;
        let inner = &template[open + 1..close];
        let parts: Vec<&str> = inner.split("..").collect();
        if parts.len() < 2 || parts.len() > 3 {
            return None;
        }
        let lo: u64 = parts[0].parse().ok()?;
        let hi: u64 = parts[1].parse().ok()?;
        let step = match parts.get(2) {
            Some(s) => s.parse().ok()?,
            None => 1,
        };
        if step == 0 {
            return None;
        }
        let digits = if parts[0].len() == parts[1].len() {
            parts[0].len()
        } else {
            0
        };
        Some(Self {
            prefix: template[..open].to_string(),
            lo,
            hi,
            step,
            digits,
            suffix: template[close + 1..].to_string(),
        })
    }

    /// Number of names the template expands to.
    pub fn count(&self) -> u64 {
        if self.hi < self.lo {
            return 0;
        }
        (self.hi - self.lo) / self.step.max(1) + 1
    }

    /// Expand into object names, in ascending order.
    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        let step = self.step.max(1);
        (0..self.count()).map(move |i| {
            format!(
                "{}{:0width$}{}",
                self.prefix,
                self.lo + i * step,
                self.suffix,
                width = self.digits
            )
        })
    }
}

/// Which source objects a copy/transform message operates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjSelection {
    /// Explicit list of object names
    List { objnames: Vec<String> },
    /// Names generated from a numeric range template
    Range(RangeTemplate),
    /// Every object in the source bucket whose name starts with `prefix`
    Prefix { prefix: String },
}

/// Destination naming rule.
///
/// The extension map is applied first (`{"jpg": "png"}` turns `a/b.jpg`
/// into `a/b.png`), then `prefix` is prepended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRule {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub ext: BTreeMap<String, String>,
}

impl RenameRule {
    pub fn apply(&self, name: &str) -> String {
        let base_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let renamed = match name[base_start..].rfind('.') {
            Some(dot) => {
                let dot = base_start + dot;
                match self.ext.get(&name[dot + 1..]) {
                    Some(new_ext) => format!("{}.{}", &name[..dot], new_ext),
                    None => name.to_string(),
                }
            }
            None => name.to_string(),
        };
        format!("{}{}", self.prefix, renamed)
    }
}

/// A list/range copy (or transform-and-copy) request.
///
/// The same message, with the same `id`, is delivered to every storage
/// target; each target processes the source objects it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransCpyListRangeMsg {
    /// Message id; assigned at submission when empty
    #[serde(default)]
    pub id: MsgId,
    pub selection: ObjSelection,
    /// Destination bucket
    pub to_bck: Bck,
    #[serde(default)]
    pub rename: Option<RenameRule>,
    /// Count what would be copied without writing anything
    #[serde(default)]
    pub dry_run: bool,
    /// Overwrite destination objects even when identical
    #[serde(default)]
    pub force: bool,
    /// Per-object transform timeout in milliseconds; 0 means no deadline
    #[serde(default)]
    pub timeout_per_object_ms: u64,
}

impl TransCpyListRangeMsg {
    pub fn new(selection: ObjSelection, to_bck: Bck) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            selection,
            to_bck,
            rename: None,
            dry_run: false,
            force: false,
            timeout_per_object_ms: 0,
        }
    }

    /// Convenience constructor for an explicit list.
    pub fn list<I, S>(names: I, to_bck: Bck) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            ObjSelection::List {
                objnames: names.into_iter().map(Into::into).collect(),
            },
            to_bck,
        )
    }

    pub fn is_list(&self) -> bool {
        matches!(self.selection, ObjSelection::List { .. })
    }

    /// Destination name for a source object
    pub fn to_name(&self, obj_name: &str) -> String {
        match &self.rename {
            Some(rule) => rule.apply(obj_name),
            None => obj_name.to_string(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_per_object_ms)
    }

    /// Assign an id if the caller did not, and check names.
    pub fn normalize(&mut self) -> Result<(), MsgError> {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        self.to_bck.validate()?;
        match &self.selection {
            ObjSelection::List { objnames } => {
                for name in objnames {
                    validate_obj_name(name)?;
                }
            }
            ObjSelection::Range(tmpl) if tmpl.step == 0 => return Err(MsgError::ZeroStep),
            _ => {}
        }
        Ok(())
    }
}

// ============================================================================
// ETL Descriptors
// ============================================================================

/// How a storage target talks to a transform backend.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum CommType {
    /// Target PUTs object bytes to the backend and streams the reply back
    #[serde(rename = "hpush://")]
    #[strum(serialize = "hpush://")]
    Push,
    /// Client is redirected to the backend, which GETs the object itself
    #[serde(rename = "hpull://")]
    #[strum(serialize = "hpull://")]
    Redirect,
    /// Target reverse-proxies the request to the backend
    #[serde(rename = "hrev://")]
    #[strum(serialize = "hrev://")]
    RevProxy,
    /// Target runs a command, piping object bytes through stdin/stdout
    #[serde(rename = "io://")]
    #[strum(serialize = "io://")]
    Exec,
}

/// A registered transform backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtlDescriptor {
    pub id: String,
    /// Backend service name
    #[serde(default)]
    pub svc_name: String,
    /// Backend pod (execution context) name
    #[serde(default)]
    pub pod_name: String,
    pub comm_type: CommType,
    /// Endpoint URI for the HTTP strategies
    #[serde(default)]
    pub uri: String,
    /// Command for the exec strategy
    #[serde(default)]
    pub command: Vec<String>,
}

impl EtlDescriptor {
    pub fn validate(&self) -> Result<(), MsgError> {
        if self.id.is_empty() {
            return Err(MsgError::EmptyEtlId);
        }
        match self.comm_type {
            CommType::Exec if self.command.is_empty() => {
                Err(MsgError::MissingCommand(self.id.clone()))
            }
            CommType::Exec => Ok(()),
            _ if self.uri.is_empty() => Err(MsgError::MissingUri {
                id: self.id.clone(),
                comm_type: self.comm_type,
            }),
            _ => Ok(()),
        }
    }
}

/// Running traffic counters of one communicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommStats {
    pub obj_count: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
}

// ============================================================================
// Object Attributes
// ============================================================================

/// Checksum algorithm.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CksumType {
    #[default]
    None,
    Md5,
    Sha256,
}

/// A checksum value (base64 encoded digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cksum {
    pub ty: CksumType,
    pub value: String,
}

impl Cksum {
    pub fn new(ty: CksumType, value: impl Into<String>) -> Self {
        Self {
            ty,
            value: value.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ty == CksumType::None || self.value.is_empty()
    }
}

impl fmt::Display for Cksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.ty, self.value)
    }
}

/// Object metadata carried with an object between nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjAttrs {
    /// Size in bytes, or [`SIZE_UNKNOWN`]
    pub size: i64,
    #[serde(default)]
    pub atime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub cksum: Option<Cksum>,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl ObjAttrs {
    pub fn with_size(size: i64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// True when both sides carry the same size and the same non-empty
    /// checksum.
    pub fn same_content(&self, other: &ObjAttrs) -> bool {
        match (&self.cksum, &other.cksum) {
            (Some(a), Some(b)) if !a.is_empty() => self.size == other.size && a == b,
            _ => false,
        }
    }
}

// ============================================================================
// Xactions
// ============================================================================

/// Kind of copy xaction; one running instance is allowed per
/// (kind, source bucket, destination bucket).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum XactKind {
    /// Plain copy of the selected objects
    CopyObjects,
    /// Copy with each object routed through a transform backend
    EtlObjects,
}

/// Xaction lifecycle state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum XactState {
    Starting,
    Running,
    /// No work arrived within the idle timeout
    IdleTimeout,
    /// Aborted by a caller or by running out of space
    Aborted,
    /// The worker stopped on its own: its queue closed or an object failed
    Completed,
    Finished,
}

impl XactState {
    /// States that lead directly to `Finished`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            XactState::IdleTimeout | XactState::Aborted | XactState::Completed
        )
    }
}

/// Point-in-time view of an xaction, as reported to monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XactSnapshot {
    pub id: XactId,
    pub kind: XactKind,
    pub from_bck: Bck,
    pub to_bck: Bck,
    pub state: XactState,
    /// Terminal reason, once finished
    pub outcome: Option<XactState>,
    /// Objects dispatched (written locally or streamed to a peer)
    pub objects: u64,
    pub bytes: u64,
    /// Objects received from peers and written locally
    pub in_objects: u64,
    pub in_bytes: u64,
    /// Objects left in place because the destination was identical
    pub skipped: u64,
    pub pending: i64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Body of a copy/transform submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcoRequest {
    /// Cluster-wide xaction id chosen by the coordinator; generated when
    /// absent. Every node must use the same id to share a data-mover stream.
    #[serde(default)]
    pub xact_id: Option<XactId>,
    pub from_bck: Bck,
    /// Transform to apply; plain copy when absent
    #[serde(default)]
    pub etl_id: Option<String>,
    pub msg: TransCpyListRangeMsg,
}

/// Reply to a copy/transform submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcoResponse {
    pub xact_id: XactId,
    pub msg_id: MsgId,
    /// True when the message attached to an already running xaction
    pub reused: bool,
}
