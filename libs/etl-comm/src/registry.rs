// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Table of running transforms on a target

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use xcopy_types::{CommStats, CommType, EtlDescriptor};

use crate::comm::{CommEnv, Communicator, make_communicator};
use crate::error::EtlError;

/// Summary of one registered transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlInfo {
    pub id: String,
    pub comm_type: CommType,
    pub pod_name: String,
    pub svc_name: String,
    pub stats: CommStats,
}

#[derive(Default)]
pub struct EtlRegistry {
    comms: RwLock<BTreeMap<String, Arc<dyn Communicator>>>,
}

impl EtlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register the communicator for `desc`.
    pub fn add(
        &self,
        desc: &EtlDescriptor,
        env: CommEnv,
    ) -> Result<Arc<dyn Communicator>, EtlError> {
        let mut comms = self.comms.write().unwrap_or_else(PoisonError::into_inner);
        if comms.contains_key(&desc.id) {
            return Err(EtlError::Duplicate(desc.id.clone()));
        }
        let comm = make_communicator(desc, env)?;
        comms.insert(desc.id.clone(), Arc::clone(&comm));
        Ok(comm)
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Communicator>, EtlError> {
        self.comms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| EtlError::UnknownEtl(id.to_string()))
    }

    pub fn remove(&self, id: &str) -> Result<(), EtlError> {
        let removed = self
            .comms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(_) => {
                tracing::info!(etl = %id, "Removed transform communicator");
                Ok(())
            }
            None => Err(EtlError::UnknownEtl(id.to_string())),
        }
    }

    pub fn list(&self) -> Vec<EtlInfo> {
        self.comms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|comm| EtlInfo::of(comm.as_ref()))
            .collect()
    }

    pub fn info(&self, id: &str) -> Result<EtlInfo, EtlError> {
        self.get(id).map(|comm| EtlInfo::of(comm.as_ref()))
    }
}

impl EtlInfo {
    fn of(comm: &dyn Communicator) -> Self {
        Self {
            id: comm.name().to_string(),
            comm_type: comm.comm_type(),
            pod_name: comm.pod_name().to_string(),
            svc_name: comm.svc_name().to_string(),
            stats: comm.stats(),
        }
    }
}
