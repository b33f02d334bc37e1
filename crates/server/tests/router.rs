//! Drive HTTP requests straight through the router

use hyper::{Body, Method, Request, Response, StatusCode};
use remcache_cache::{BlobstoreConfig, CacheConfig, NoopObserver, PrometheusObserver};
use remcache_core::{Digest, DigestFunction};
use remcache_server::{AppState, Router};
use serde_json::{json, Value};
use std::net::IpAddr;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _spool: TempDir,
    router: Router,
}

async fn harness() -> Harness {
    let spool = TempDir::new().unwrap();
    let mut config = CacheConfig::default();
    config.blobstore = BlobstoreConfig::Memory;
    config.bytestream.spool_dir = spool.path().to_path_buf();
    config.bytestream.read_chunk_size = 3;

    let metrics = Arc::new(PrometheusObserver::new().unwrap());
    let state = AppState::with_observer(&config, metrics.clone(), Some(metrics))
        .await
        .unwrap();
    Harness {
        _spool: spool,
        router: Router::new(Arc::new(state)),
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Body) -> Response<Body> {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    router.route(req, IpAddr::from([127, 0, 0, 1])).await
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn digest_json(digest: &Digest) -> Value {
    json!({ "hash": digest.hash, "sizeBytes": digest.size_bytes.to_string() })
}

#[tokio::test]
async fn test_health_and_unknown_route() {
    let h = harness().await;
    let ok = send(&h.router, Method::GET, "/health", Body::empty()).await;
    assert_eq!(ok.status(), StatusCode::OK);

    let missing = send(&h.router, Method::GET, "/nope", Body::empty()).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_update_then_find_missing_and_read() {
    let h = harness().await;
    let stored = DigestFunction::Sha256.compute(b"hello");
    let absent = DigestFunction::Sha256.compute(b"absent");
    let empty = DigestFunction::Sha256.empty_digest();

    let update = json!({
        "requests": [{ "digest": digest_json(&stored), "data": "aGVsbG8=" }]
    });
    let response = send(
        &h.router,
        Method::POST,
        "/v2/team/blobs:batchUpdate",
        Body::from(update.to_string()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["responses"][0]["status"]["code"], 0);

    let query = json!({
        "blobDigests": [digest_json(&stored), digest_json(&absent), digest_json(&empty)]
    });
    let response = send(
        &h.router,
        Method::POST,
        "/v2/team/blobs:findMissing",
        Body::from(query.to_string()),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["missingBlobDigests"], json!([digest_json(&absent)]));

    let read = json!({ "digests": [digest_json(&stored), digest_json(&absent)] });
    let response = send(
        &h.router,
        Method::POST,
        "/v2/team/blobs:batchRead",
        Body::from(read.to_string()),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["responses"][0]["data"], "aGVsbG8=");
    assert_eq!(body["responses"][1]["status"]["code"], 5);
}

#[tokio::test]
async fn test_batch_update_reports_mismatch_per_item() {
    let h = harness().await;
    let declared = DigestFunction::Sha256.compute(b"declared");
    let update = json!({
        "requests": [{ "digest": digest_json(&declared), "data": "aGVsbG8=" }]
    });

    let response = send(
        &h.router,
        Method::POST,
        "/v2/blobs:batchUpdate",
        Body::from(update.to_string()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["responses"][0]["status"]["code"], 3);
}

#[tokio::test]
async fn test_action_result_round_trip_and_missing_reference() {
    let h = harness().await;
    let action = DigestFunction::Sha256.compute(b"action");
    let output = DigestFunction::Sha256.compute(b"hello");
    let uri = format!("/v2/ci/actionResults/{}/{}", action.hash, action.size_bytes);
    let record = json!({
        "outputFiles": [{ "path": "out.txt", "digest": digest_json(&output) }],
        "exitCode": 0
    });

    let response = send(&h.router, Method::PUT, &uri, Body::from(record.to_string())).await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    let body = json_body(response).await;
    assert_eq!(body["code"], "failed_precondition");
    assert_eq!(body["missingDigests"][0]["hash"], output.hash);

    let update = json!({ "requests": [{ "digest": digest_json(&output), "data": "aGVsbG8=" }] });
    send(
        &h.router,
        Method::POST,
        "/v2/ci/blobs:batchUpdate",
        Body::from(update.to_string()),
    )
    .await;

    let response = send(&h.router, Method::PUT, &uri, Body::from(record.to_string())).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&h.router, Method::GET, &uri, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["outputFiles"][0]["path"], "out.txt");

    let other = format!("/v2/other/actionResults/{}/{}", action.hash, action.size_bytes);
    let response = send(&h.router, Method::GET, &other, Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bytestream_write_status_and_read() {
    let h = harness().await;
    let data = b"resumable upload";
    let digest = DigestFunction::Sha256.compute(data);
    let resource = format!("uploads/abc/blobs/{}/{}", digest.hash, digest.size_bytes);

    let response = send(
        &h.router,
        Method::POST,
        &format!("/bytestream/write/{resource}?offset=0"),
        Body::from(&data[..9]),
    )
    .await;
    assert_eq!(json_body(response).await["committedSize"], "9");

    let response = send(
        &h.router,
        Method::POST,
        &format!("/bytestream/write/{resource}?offset=4"),
        Body::from(&data[4..]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(json_body(response).await["committedSize"], 9);

    let response = send(
        &h.router,
        Method::GET,
        &format!("/bytestream/status/{resource}"),
        Body::empty(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["committedSize"], "9");
    assert_eq!(body["complete"], false);

    let response = send(
        &h.router,
        Method::POST,
        &format!("/bytestream/write/{resource}?offset=9&finish=true"),
        Body::from(&data[9..]),
    )
    .await;
    assert_eq!(json_body(response).await["complete"], true);

    let response = send(
        &h.router,
        Method::GET,
        &format!("/bytestream/read/blobs/{}/{}?offset=10", digest.hash, digest.size_bytes),
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(&bytes[..], &data[10..]);
}

#[tokio::test]
async fn test_unknown_upload_status_is_zero() {
    let h = harness().await;
    let digest = DigestFunction::Sha256.compute(b"nobody");
    let response = send(
        &h.router,
        Method::GET,
        &format!("/bytestream/status/uploads/x/blobs/{}/{}", digest.hash, digest.size_bytes),
        Body::empty(),
    )
    .await;
    let body = json_body(response).await;
    assert_eq!(body["committedSize"], "0");
    assert_eq!(body["complete"], false);
}

#[tokio::test]
async fn test_invalid_instance_and_digest_are_bad_requests() {
    let h = harness().await;
    let response = send(
        &h.router,
        Method::POST,
        "/v2/blobs/blobs:findMissing",
        Body::from("{}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&h.router, Method::GET, "/v2/actionResults/XYZ/3", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_capabilities_and_metrics() {
    let h = harness().await;
    let response = send(&h.router, Method::GET, "/v2/capabilities", Body::empty()).await;
    let body = json_body(response).await;
    assert_eq!(body["cacheCapabilities"]["digestFunctions"][0], "SHA256");

    let digest = DigestFunction::Sha256.compute(b"counted");
    let query = json!({ "blobDigests": [digest_json(&digest)] });
    send(
        &h.router,
        Method::POST,
        "/v2/blobs:findMissing",
        Body::from(query.to_string()),
    )
    .await;

    let response = send(&h.router, Method::GET, "/metrics", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let text = String::from_utf8(text.to_vec()).unwrap();
    assert!(text.contains("remcache_remote_cache_events"));
}

#[tokio::test]
async fn test_metrics_disabled_is_not_found() {
    let spool = TempDir::new().unwrap();
    let mut config = CacheConfig::default();
    config.blobstore = BlobstoreConfig::Memory;
    config.bytestream.spool_dir = spool.path().to_path_buf();
    let state = AppState::with_observer(&config, Arc::new(NoopObserver), None)
        .await
        .unwrap();
    let router = Router::new(Arc::new(state));

    let response = send(&router, Method::GET, "/metrics", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_chunk_is_refused_before_buffering() {
    let h = harness().await;
    let digest = DigestFunction::Sha256.compute(b"abc");
    let resource = format!("uploads/big/blobs/{}/{}", digest.hash, digest.size_bytes);

    let response = send(
        &h.router,
        Method::POST,
        &format!("/bytestream/write/{resource}?offset=0"),
        Body::from(vec![b'x'; 4096]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &h.router,
        Method::GET,
        &format!("/bytestream/status/{resource}"),
        Body::empty(),
    )
    .await;
    assert_eq!(json_body(response).await["committedSize"], "0");
}

#[tokio::test]
async fn test_oversized_json_body_is_refused() {
    let h = harness().await;
    let req = Request::builder()
        .method(Method::POST)
        .uri("/v2/blobs:batchUpdate")
        .header(hyper::header::CONTENT_LENGTH, "1000000000")
        .body(Body::from("{}"))
        .unwrap();

    let response = h.router.route(req, IpAddr::from([127, 0, 0, 1])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "invalid_argument");
}
