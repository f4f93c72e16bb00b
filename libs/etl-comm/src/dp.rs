// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use xcopy_cluster::{ClusterError, DataProvider, DpReader};
use xcopy_types::{Bck, ObjAttrs};

use crate::comm::Communicator;

/// Source of transformed object bytes for the copy path.
pub struct EtlDataProvider {
    comm: Arc<dyn Communicator>,
}

impl EtlDataProvider {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self { comm }
    }
}

#[async_trait]
impl DataProvider for EtlDataProvider {
    async fn reader(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<DpReader, ClusterError> {
        let reader = self.comm.offline_transform(bck, obj, timeout).await?;
        let attrs = ObjAttrs::with_size(reader.size());
        Ok(DpReader {
            reader: Box::new(reader),
            attrs,
        })
    }
}
