// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Cluster map and object ownership
//!
//! Every object is owned by exactly one storage target, chosen by highest
//! random weight (HRW) over MD5(node id, uname).

use std::sync::{Arc, PoisonError, RwLock};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// A storage target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snode {
    pub id: String,
    /// Base URL of the node's HTTP API
    #[serde(default)]
    pub url: String,
}

impl Snode {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Cluster map: the set of storage targets at some version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Smap {
    #[serde(default)]
    pub version: u64,
    pub nodes: Vec<Snode>,
}

impl Smap {
    pub fn new(nodes: Vec<Snode>) -> Self {
        Self { version: 1, nodes }
    }

    pub fn count_targets(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: &str) -> Option<&Snode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Every node except `self_id`.
    pub fn others<'a>(&'a self, self_id: &'a str) -> impl Iterator<Item = &'a Snode> + 'a {
        self.nodes.iter().filter(move |n| n.id != self_id)
    }

    /// Owner of `uname`.
    pub fn hrw_node(&self, uname: &str) -> Result<&Snode, ClusterError> {
        self.nodes
            .iter()
            .max_by(|a, b| {
                hrw_weight(&a.id, uname)
                    .cmp(&hrw_weight(&b.id, uname))
                    .then_with(|| b.id.cmp(&a.id))
            })
            .ok_or_else(|| ClusterError::NoSuchNode(format!("no targets to own {}", uname)))
    }
}

fn hrw_weight(node_id: &str, uname: &str) -> u64 {
    let mut hasher = Md5::new();
    hasher.update(node_id.as_bytes());
    hasher.update(uname.as_bytes());
    let digest = hasher.finalize();
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(word)
}

/// Read access to the current cluster map.
pub trait ClusterView: Send + Sync {
    fn smap(&self) -> Arc<Smap>;
}

/// A cluster map that changes only when replaced explicitly.
pub struct StaticView {
    smap: RwLock<Arc<Smap>>,
}

impl StaticView {
    pub fn new(smap: Smap) -> Self {
        Self {
            smap: RwLock::new(Arc::new(smap)),
        }
    }

    /// Install a new map, bumping its version past the current one.
    pub fn replace(&self, mut smap: Smap) {
        let mut current = self.smap.write().unwrap_or_else(PoisonError::into_inner);
        smap.version = current.version + 1;
        *current = Arc::new(smap);
    }
}

impl ClusterView for StaticView {
    fn smap(&self) -> Arc<Smap> {
        Arc::clone(&self.smap.read().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn three() -> Smap {
        Smap::new(vec![
            Snode::new("t1", "http://t1"),
            Snode::new("t2", "http://t2"),
            Snode::new("t3", "http://t3"),
        ])
    }

    #[test]
    fn test_hrw_is_stable_and_spread() {
        let smap = three();
        let mut owners: HashMap<String, usize> = HashMap::new();
        for i in 0..300 {
            let uname = format!("ais/b/obj-{}", i);
            let owner = smap.hrw_node(&uname).unwrap();
            assert_eq!(owner, smap.hrw_node(&uname).unwrap());
            *owners.entry(owner.id.clone()).or_default() += 1;
        }
        assert_eq!(owners.len(), 3);
        assert!(owners.values().all(|&n| n > 50));
    }

    #[test]
    fn test_hrw_minimal_disruption() {
        let smap = three();
        let reduced = Smap::new(smap.others("t3").cloned().collect());
        for i in 0..100 {
            let uname = format!("ais/b/obj-{}", i);
            let before = smap.hrw_node(&uname).unwrap();
            if before.id != "t3" {
                assert_eq!(reduced.hrw_node(&uname).unwrap().id, before.id);
            }
        }
    }

    #[test]
    fn test_empty_map() {
        assert!(matches!(
            Smap::default().hrw_node("ais/b/o"),
            Err(ClusterError::NoSuchNode(_))
        ));
    }

    #[test]
    fn test_static_view_replace() {
        let view = StaticView::new(three());
        assert_eq!(view.smap().count_targets(), 3);
        view.replace(Smap::new(vec![Snode::new("t1", "")]));
        assert_eq!(view.smap().count_targets(), 1);
        assert_eq!(view.smap().version, 2);
        assert_eq!(view.smap().others("t1").count(), 0);
    }
}
