// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

// Allow expect/unwrap in tests - they provide clear panic messages on failure
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! Communicator tests against mock HTTP backends and local processes.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use etl_comm::{CommEnv, Communicator, EtlDataProvider, EtlError, make_communicator};
use http::header::{CONTENT_LENGTH, LOCATION};
use http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};
use xcopy_cluster::{DataProvider, FsStore, InMemoryBackend, ObjectStore, PutParams};
use xcopy_types::{Bck, CommStats, CommType, EtlDescriptor, Provider, SIZE_UNKNOWN};

// ============================================================================
// Test Infrastructure
// ============================================================================

/// Responds with the request body.
struct Echo;

impl Respond for Echo {
    fn respond(&self, req: &wiremock::Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(req.body.clone())
    }
}

struct TestContext {
    store: Arc<FsStore>,
    backend: Arc<InMemoryBackend>,
    _temp_dir: TempDir,
}

impl TestContext {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let backend = Arc::new(InMemoryBackend::new());
        let store = FsStore::new("t1", temp_dir.path())
            .await
            .expect("failed to open store")
            .with_backend(backend.clone());
        Self {
            store: Arc::new(store),
            backend,
            _temp_dir: temp_dir,
        }
    }

    async fn put(&self, bck: &Bck, obj: &str, data: &'static [u8]) {
        self.store
            .put(bck, obj, Box::new(data), PutParams::default())
            .await
            .expect("failed to put object");
    }

    fn comm(&self, comm_type: CommType, uri: &str, command: &[&str]) -> Arc<dyn Communicator> {
        let desc = EtlDescriptor {
            id: "etl-test".to_string(),
            svc_name: String::new(),
            pod_name: String::new(),
            comm_type,
            uri: uri.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        };
        let env = CommEnv::new(self.store.clone(), Duration::from_secs(5));
        make_communicator(&desc, env).expect("failed to create communicator")
    }
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(resp: http::Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn payload() -> &'static [u8] {
    &[7u8; 100]
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn test_push_offline_echo() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/"))
        .and(header("content-length", "100"))
        .and(header("content-type", "application/octet-stream"))
        .respond_with(Echo)
        .expect(1)
        .mount(&mock)
        .await;

    let bck = Bck::ais("src");
    ctx.put(&bck, "a.bin", payload()).await;
    let comm = ctx.comm(CommType::Push, &mock.uri(), &[]);

    let mut reader = comm
        .offline_transform(&bck, "a.bin", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(reader.size(), 100);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, payload());

    // The object is counted once its reader is closed.
    assert_eq!(comm.stats().obj_count, 0);
    reader.close();
    assert_eq!(
        comm.stats(),
        CommStats {
            obj_count: 1,
            in_bytes: 100,
            out_bytes: 100,
        }
    );
}

#[tokio::test]
async fn test_push_online_streams_response() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(Echo)
        .mount(&mock)
        .await;

    let bck = Bck::ais("src");
    ctx.put(&bck, "a.bin", b"live read").await;
    let comm = ctx.comm(CommType::Push, &mock.uri(), &[]);

    let resp = comm
        .online_transform(get_request("/v1/objects/src/a.bin"), &bck, "a.bin")
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[CONTENT_LENGTH], "9");
    assert_eq!(body_bytes(resp).await, b"live read");

    let stats = comm.stats();
    assert_eq!(stats.obj_count, 1);
    assert_eq!(stats.in_bytes, 9);
    assert_eq!(stats.out_bytes, 9);
}

#[tokio::test]
async fn test_push_fetches_remote_object_once() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(Echo)
        .mount(&mock)
        .await;

    let bck = Bck::new("remote", Provider::Aws);
    ctx.backend.insert(&bck, "cold.txt", &b"from the cloud"[..]).await;
    let comm = ctx.comm(CommType::Push, &mock.uri(), &[]);

    let mut reader = comm
        .offline_transform(&bck, "cold.txt", Duration::ZERO)
        .await
        .unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"from the cloud");
    assert_eq!(ctx.backend.gets(), 1);

    // Now resident; no further fetch.
    drop(reader);
    comm.offline_transform(&bck, "cold.txt", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(ctx.backend.gets(), 1);
}

#[tokio::test]
async fn test_push_missing_object() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    let comm = ctx.comm(CommType::Push, &mock.uri(), &[]);

    let err = comm
        .offline_transform(&Bck::ais("src"), "nope", Duration::ZERO)
        .await
        .err()
        .unwrap();
    assert!(err.is_not_found());
    assert_eq!(comm.stats(), CommStats::default());
}

#[tokio::test]
async fn test_push_status_classification() {
    let ctx = TestContext::new().await;
    let bck = Bck::ais("src");
    ctx.put(&bck, "a.bin", b"x").await;

    let failing = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&failing)
        .await;
    let err = ctx
        .comm(CommType::Push, &failing.uri(), &[])
        .offline_transform(&bck, "a.bin", Duration::ZERO)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EtlError::BackendUnavailable { .. }), "{err}");

    let confused = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&confused)
        .await;
    let err = ctx
        .comm(CommType::Push, &confused.uri(), &[])
        .offline_transform(&bck, "a.bin", Duration::ZERO)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EtlError::ProtocolMismatch { .. }), "{err}");
}

#[tokio::test]
async fn test_push_deadline() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock)
        .await;

    let bck = Bck::ais("src");
    ctx.put(&bck, "slow.bin", b"x").await;
    let comm = ctx.comm(CommType::Push, &mock.uri(), &[]);

    let err = comm
        .offline_transform(&bck, "slow.bin", Duration::from_millis(100))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EtlError::BackendUnavailable { .. }));
    assert!(err.to_string().contains("deadline exceeded"));
}

#[tokio::test]
async fn test_unreachable_backend() {
    let ctx = TestContext::new().await;
    let bck = Bck::ais("src");
    ctx.put(&bck, "a.bin", b"x").await;

    // Nothing listens on port 1.
    let err = ctx
        .comm(CommType::Push, "http://127.0.0.1:1", &[])
        .offline_transform(&bck, "a.bin", Duration::ZERO)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EtlError::BackendUnavailable { .. }));
}

// ============================================================================
// Redirect
// ============================================================================

#[tokio::test]
async fn test_redirect_online_location() {
    let ctx = TestContext::new().await;
    let bck = Bck::ais("src");
    ctx.put(&bck, "dir/a.txt", b"12345").await;
    let comm = ctx.comm(CommType::Redirect, "http://etl-svc:8000/", &[]);

    let resp = comm
        .online_transform(get_request("/v1/objects/src/dir/a.txt"), &bck, "dir/a.txt")
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        resp.headers()[LOCATION],
        "http://etl-svc:8000/ais%2Fsrc%2Fdir%2Fa.txt"
    );
    assert_eq!(comm.stats().in_bytes, 5);
    assert_eq!(comm.stats().obj_count, 0);
}

#[tokio::test]
async fn test_redirect_offline_pulls_from_backend() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ais%2Fsrc%2Fa.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"TRANSFORMED".to_vec()))
        .expect(1)
        .mount(&mock)
        .await;

    let bck = Bck::ais("src");
    ctx.put(&bck, "a.txt", b"transformed").await;
    let comm = ctx.comm(CommType::Redirect, &mock.uri(), &[]);

    let mut reader = comm
        .offline_transform(&bck, "a.txt", Duration::from_secs(5))
        .await
        .unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    drop(reader);
    assert_eq!(out, b"TRANSFORMED");
    assert_eq!(
        comm.stats(),
        CommStats {
            obj_count: 1,
            in_bytes: 11,
            out_bytes: 11,
        }
    );
}

#[tokio::test]
async fn test_redirect_remote_object_not_resident() {
    let ctx = TestContext::new().await;
    let bck = Bck::new("remote", Provider::Gcp);
    let comm = ctx.comm(CommType::Redirect, "http://etl-svc:8000", &[]);

    let resp = comm
        .online_transform(get_request("/v1/objects/remote/x"), &bck, "x")
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(comm.stats().in_bytes, 0);
    assert_eq!(ctx.backend.gets(), 0);
}

#[tokio::test]
async fn test_redirect_backend_not_found() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock)
        .await;

    let bck = Bck::ais("src");
    ctx.put(&bck, "a.txt", b"x").await;
    let err = ctx
        .comm(CommType::Redirect, &mock.uri(), &[])
        .offline_transform(&bck, "a.txt", Duration::ZERO)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EtlError::ProtocolMismatch { .. }));
}

// ============================================================================
// Reverse proxy
// ============================================================================

#[tokio::test]
async fn test_revproxy_forwards_pruned_query() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ais%2Fsrc%2Fa.txt"))
        .and(query_param("fmt", "json"))
        .and(query_param_is_missing("uuid"))
        .and(query_param_is_missing("pid"))
        .and(header("user-agent", "curl/8"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"proxied".to_vec()))
        .expect(1)
        .mount(&mock)
        .await;

    let bck = Bck::ais("src");
    ctx.put(&bck, "a.txt", b"abc").await;
    // The configured path is replaced by the object's transformer path.
    let comm = ctx.comm(CommType::RevProxy, &format!("{}/base", mock.uri()), &[]);

    let req = Request::builder()
        .uri("/v1/objects/src/a.txt?uuid=42&pid=p1&fmt=json")
        .header("user-agent", "curl/8")
        .body(Body::empty())
        .unwrap();
    let resp = comm.online_transform(req, &bck, "a.txt").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, b"proxied");

    let stats = comm.stats();
    assert_eq!(stats.in_bytes, 3);
    assert_eq!(stats.out_bytes, 7);
}

#[tokio::test]
async fn test_revproxy_relays_backend_status() {
    let ctx = TestContext::new().await;
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock)
        .await;

    let bck = Bck::ais("src");
    ctx.put(&bck, "a.txt", b"abc").await;
    let comm = ctx.comm(CommType::RevProxy, &mock.uri(), &[]);

    let resp = comm
        .online_transform(get_request("/v1/objects/src/a.txt"), &bck, "a.txt")
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// ============================================================================
// Exec
// ============================================================================

#[tokio::test]
async fn test_exec_inline() {
    let ctx = TestContext::new().await;
    let bck = Bck::ais("src");
    ctx.put(&bck, "a.txt", b"hello exec").await;
    let comm = ctx.comm(CommType::Exec, "", &["tr", "a-z", "A-Z"]);

    let resp = comm
        .online_transform(get_request("/v1/objects/src/a.txt"), &bck, "a.txt")
        .await
        .unwrap();
    assert_eq!(body_bytes(resp).await, b"HELLO EXEC");
    assert_eq!(
        comm.stats(),
        CommStats {
            obj_count: 1,
            in_bytes: 10,
            out_bytes: 10,
        }
    );
}

#[tokio::test]
async fn test_exec_batch_through_data_provider() {
    let ctx = TestContext::new().await;
    let bck = Bck::ais("src");
    ctx.put(&bck, "a.bin", payload()).await;
    let comm = ctx.comm(CommType::Exec, "", &["cat"]);
    let dp = EtlDataProvider::new(comm.clone());

    let mut src = dp.reader(&bck, "a.bin", Duration::from_secs(5)).await.unwrap();
    assert_eq!(src.attrs.size, SIZE_UNKNOWN);
    let mut out = Vec::new();
    src.reader.read_to_end(&mut out).await.unwrap();
    drop(src);
    assert_eq!(out, payload());

    let stats = comm.stats();
    assert_eq!(stats.obj_count, 1);
    assert_eq!(stats.in_bytes, 100);
    assert_eq!(stats.out_bytes, 100);
}

#[tokio::test]
async fn test_exec_failure_reaches_reader() {
    let ctx = TestContext::new().await;
    let bck = Bck::ais("src");
    ctx.put(&bck, "a.txt", b"input").await;

    let comm = ctx.comm(CommType::Exec, "", &["sh", "-c", "echo boom >&2; exit 3"]);
    let err = comm
        .online_transform(get_request("/v1/objects/src/a.txt"), &bck, "a.txt")
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EtlError::Exec { .. }));
    assert!(err.to_string().contains("boom"), "{err}");
    // Inline transforms count the object even when they fail.
    assert_eq!(comm.stats().obj_count, 1);

    let mut reader = comm
        .offline_transform(&bck, "a.txt", Duration::ZERO)
        .await
        .unwrap();
    let mut out = Vec::new();
    assert!(reader.read_to_end(&mut out).await.is_err());
    drop(reader);
    // The failed batch read is not counted as an object.
    assert_eq!(comm.stats().obj_count, 1);
}

#[tokio::test]
async fn test_exec_batch_deadline_not_counted() {
    let ctx = TestContext::new().await;
    let bck = Bck::ais("src");
    ctx.put(&bck, "a.txt", b"input").await;

    let comm = ctx.comm(CommType::Exec, "", &["sh", "-c", "sleep 2; cat"]);
    let mut reader = comm
        .offline_transform(&bck, "a.txt", Duration::from_millis(50))
        .await
        .unwrap();
    let mut out = Vec::new();
    let err = reader.read_to_end(&mut out).await.unwrap_err();
    assert!(err.to_string().contains("deadline exceeded"), "{err}");
    drop(reader);

    let stats = comm.stats();
    assert_eq!(stats.obj_count, 0);
    assert_eq!(stats.out_bytes, 0);
}

#[tokio::test]
async fn test_exec_missing_object_fails_up_front() {
    let ctx = TestContext::new().await;
    let comm = ctx.comm(CommType::Exec, "", &["cat"]);
    let err = comm
        .offline_transform(&Bck::ais("src"), "nope", Duration::ZERO)
        .await
        .err()
        .unwrap();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_invalid_descriptors() {
    let ctx = TestContext::new().await;
    let env = CommEnv::new(ctx.store.clone(), Duration::ZERO);
    let mut desc = EtlDescriptor {
        id: "bad".to_string(),
        svc_name: String::new(),
        pod_name: String::new(),
        comm_type: CommType::Push,
        uri: String::new(),
        command: vec![],
    };
    assert!(matches!(
        make_communicator(&desc, env.clone()),
        Err(EtlError::Descriptor(_))
    ));

    desc.uri = "not a uri".to_string();
    assert!(matches!(
        make_communicator(&desc, env.clone()),
        Err(EtlError::InvalidUri { .. })
    ));

    desc.comm_type = CommType::Exec;
    assert!(matches!(
        make_communicator(&desc, env),
        Err(EtlError::Descriptor(_))
    ));
}
