// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Expansion of a message's object selection into the source objects this
//! node owns.

use std::sync::Arc;

use xcopy_cluster::{ObjectStore, Smap};
use xcopy_types::{Bck, ObjSelection, TransCpyListRangeMsg};

use crate::error::XactError;

/// One source object to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) name: String,
    /// Named by the caller rather than generated or listed. A missing
    /// explicit object is an error; a missing generated one is skipped.
    pub(crate) explicit: bool,
}

/// Source object names of `msg` whose owner in `smap` is `node_id`.
pub(crate) async fn candidates(
    store: &Arc<dyn ObjectStore>,
    smap: &Smap,
    node_id: &str,
    from_bck: &Bck,
    msg: &TransCpyListRangeMsg,
) -> Result<Vec<Candidate>, XactError> {
    let (names, explicit): (Vec<String>, bool) = match &msg.selection {
        ObjSelection::List { objnames } => (objnames.clone(), true),
        ObjSelection::Range(tmpl) => (tmpl.names().collect(), false),
        ObjSelection::Prefix { prefix } => (store.list(from_bck, prefix).await?, false),
    };

    let mut owned = Vec::with_capacity(names.len());
    for name in names {
        let owner = smap.hrw_node(&from_bck.make_uname(&name))?;
        if owner.id == node_id {
            owned.push(Candidate { name, explicit });
        }
    }
    Ok(owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use xcopy_cluster::{FsStore, PutParams, Snode};
    use xcopy_types::RangeTemplate;

    async fn store_with(dir: &TempDir, bck: &Bck, names: &[&str]) -> Arc<dyn ObjectStore> {
        let store = FsStore::new("t1", dir.path()).await.unwrap();
        for name in names {
            store
                .put(bck, name, Box::new(&b"x"[..]), PutParams::default())
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    fn names(c: &[Candidate]) -> Vec<&str> {
        c.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_single_node_owns_everything() {
        let dir = TempDir::new().unwrap();
        let src = Bck::ais("src");
        let store = store_with(&dir, &src, &["img/1.jpg", "img/2.jpg", "doc.txt"]).await;
        let smap = Smap::new(vec![Snode::new("t1", "mem://t1")]);
        let dst = Bck::ais("dst");

        let list = TransCpyListRangeMsg::list(["b", "a"], dst.clone());
        let got = candidates(&store, &smap, "t1", &src, &list).await.unwrap();
        assert_eq!(names(&got), vec!["b", "a"]);
        assert!(got.iter().all(|c| c.explicit));

        let prefix = TransCpyListRangeMsg::new(
            ObjSelection::Prefix {
                prefix: "img/".to_string(),
            },
            dst.clone(),
        );
        let got = candidates(&store, &smap, "t1", &src, &prefix).await.unwrap();
        assert_eq!(names(&got), vec!["img/1.jpg", "img/2.jpg"]);
        assert!(got.iter().all(|c| !c.explicit));

        let range = TransCpyListRangeMsg::new(
            ObjSelection::Range(RangeTemplate::parse("f-{1..3}.bin").unwrap()),
            dst,
        );
        let got = candidates(&store, &smap, "t1", &src, &range).await.unwrap();
        assert_eq!(names(&got), vec!["f-1.bin", "f-2.bin", "f-3.bin"]);
    }

    #[tokio::test]
    async fn test_nodes_split_ownership() {
        let dir = TempDir::new().unwrap();
        let src = Bck::ais("src");
        let store = store_with(&dir, &src, &[]).await;
        let smap = Smap::new(vec![
            Snode::new("t1", "mem://t1"),
            Snode::new("t2", "mem://t2"),
            Snode::new("t3", "mem://t3"),
        ]);
        let all: Vec<String> = (0..50).map(|i| format!("obj-{}", i)).collect();
        let msg = TransCpyListRangeMsg::list(all.clone(), Bck::ais("dst"));

        let mut seen = Vec::new();
        for node in ["t1", "t2", "t3"] {
            let got = candidates(&store, &smap, node, &src, &msg).await.unwrap();
            seen.extend(got.into_iter().map(|c| c.name));
        }
        seen.sort();
        let mut expected = all;
        expected.sort();
        // Every name is owned by exactly one node.
        assert_eq!(seen, expected);
    }
}
