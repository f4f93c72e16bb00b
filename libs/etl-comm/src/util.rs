// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Path, query and size helpers shared by the strategies

use std::sync::Arc;

use url::form_urlencoded;
use xcopy_cluster::{Lom, ObjectStore};
use xcopy_types::Bck;

use crate::error::EtlError;

/// Query parameter carrying the cluster request id
pub const QPARAM_UUID: &str = "uuid";

/// Query parameter carrying the coordinating proxy id
pub const QPARAM_PROXY_ID: &str = "pid";

/// Query parameter carrying the request's unix timestamp
pub const QPARAM_UNIX_TIME: &str = "utm";

const CONTROL_PARAMS: [&str; 3] = [QPARAM_UUID, QPARAM_PROXY_ID, QPARAM_UNIX_TIME];

/// Drop cluster-control parameters from a raw query string. Forwarding
/// them to a transform backend loops requests back into the cluster.
///
/// Remaining parameters are re-encoded sorted by key.
pub fn prune_query(raw: &str) -> String {
    let mut kept: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
        .filter(|(k, _)| !CONTROL_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort_by(|a, b| a.0.cmp(&b.0));
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(kept)
        .finish()
}

/// Path under which a transform backend serves `obj`: the escaped
/// bucket-scoped uname as a single segment.
pub fn transformer_path(bck: &Bck, obj: &str) -> String {
    format!("/{}", urlencoding::encode(&bck.make_uname(obj)))
}

pub fn join_path(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Size of a stored object for accounting. A remote-backed object that is
/// not resident counts as zero.
pub async fn determine_size(
    store: &Arc<dyn ObjectStore>,
    bck: &Bck,
    obj: &str,
) -> Result<i64, EtlError> {
    let mut lom = Lom::new(Arc::clone(store), bck, obj)?;
    match lom.load(true).await {
        Ok(_) => Ok(lom.size_bytes()),
        Err(e) if e.is_not_found() && bck.is_remote() => Ok(0),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use xcopy_types::Provider;

    #[test]
    fn test_prune_query() {
        assert_eq!(
            prune_query("uuid=abc&width=10&pid=p1&utm=1700000000&fmt=png"),
            "fmt=png&width=10"
        );
        assert_eq!(prune_query("uuid=1&pid=2"), "");
        assert_eq!(prune_query(""), "");
        assert_eq!(prune_query("q=a+b%26c"), "q=a+b%26c");
    }

    #[test]
    fn test_transformer_path() {
        let bck = Bck::new("imgs", Provider::Aws);
        assert_eq!(transformer_path(&bck, "a/b c.jpg"), "/aws%2Fimgs%2Fa%2Fb%20c.jpg");
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("http://etl:80/", "/x"), "http://etl:80/x");
        assert_eq!(join_path("http://etl:80", "x"), "http://etl:80/x");
    }
}
