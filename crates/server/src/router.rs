//! Request routing
//!
//! Paths follow the REAPI v2 HTTP/JSON transcoding shape. The instance name
//! is everything between `/v2/` and the operation segment, so a request for
//! the default instance simply omits it.

use crate::response::HttpResponse;
use crate::state::AppState;
use crate::wire::{
    BatchReadBlobsRequest, BatchReadBlobsResponse, BatchReadResult, BatchUpdateBlobsRequest,
    BatchUpdateBlobsResponse, BatchUpdateResult, FindMissingBlobsRequest, FindMissingBlobsResponse,
    ServerCapabilities, Status, WriteStatusResponse,
};
use bytes::{Bytes, BytesMut};
use hyper::body::HttpBody;
use hyper::header::CONTENT_LENGTH;
use hyper::{Body, Method, Request, Response};
use remcache_cache::UploadResource;
use remcache_core::{ActionResult, Digest, Error, ErrorCode, InstanceName, Result};
use serde::de::DeserializeOwned;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

const ACTION_RESULTS_SEGMENT: &str = "actionResults";

/// Room for JSON framing and digests around the base64 payload of a batch
const JSON_ENVELOPE_ALLOWANCE: u64 = 1024 * 1024;

pub struct Router {
    state: Arc<AppState>,
}

impl Router {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Route a request and turn any error into its HTTP response
    pub async fn route(&self, req: Request<Body>, client_ip: IpAddr) -> Response<Body> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = match self.dispatch(req).await {
            Ok(response) => response,
            Err(e) => {
                match e.code() {
                    ErrorCode::NotFound | ErrorCode::OutOfRange => {
                        debug!(%method, %path, error = %e, "request failed");
                    }
                    ErrorCode::Unavailable
                    | ErrorCode::DataLoss
                    | ErrorCode::Unknown
                    | ErrorCode::Internal => {
                        error!(%method, %path, error = %e, "request failed");
                    }
                    _ => warn!(%method, %path, error = %e, "request rejected"),
                }
                HttpResponse::from_error(&e)
            }
        };

        debug!(
            %method,
            %path,
            client = %client_ip,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "handled request"
        );
        response
    }

    async fn dispatch(&self, req: Request<Body>) -> Result<Response<Body>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match (&method, path.as_str()) {
            (&Method::GET, "/health") => return Ok(HttpResponse::ok_text("ok\n".to_string())),
            (&Method::GET, "/metrics") => return self.handle_metrics(&path),
            _ => {}
        }

        if let Some(rest) = path.strip_prefix("/v2/") {
            return self.route_v2(&method, rest, req).await;
        }
        if let Some(resource) = path.strip_prefix("/bytestream/read/") {
            return match method {
                Method::GET => self.handle_read(resource, req.uri().query()).await,
                _ => Ok(HttpResponse::method_not_allowed()),
            };
        }
        if let Some(resource) = path.strip_prefix("/bytestream/write/") {
            let resource = resource.to_string();
            return match method {
                Method::POST => self.handle_write(&resource, req).await,
                Method::DELETE => self.handle_cancel(&resource).await,
                _ => Ok(HttpResponse::method_not_allowed()),
            };
        }
        if let Some(resource) = path.strip_prefix("/bytestream/status/") {
            return match method {
                Method::GET => self.handle_status(resource).await,
                _ => Ok(HttpResponse::method_not_allowed()),
            };
        }

        Ok(HttpResponse::not_found(&path))
    }

    async fn route_v2(
        &self,
        method: &Method,
        rest: &str,
        req: Request<Body>,
    ) -> Result<Response<Body>> {
        if let Some(instance) = instance_before(rest, "blobs:findMissing") {
            let instance = InstanceName::new(instance)?;
            return match *method {
                Method::POST => self.handle_find_missing(&instance, req).await,
                _ => Ok(HttpResponse::method_not_allowed()),
            };
        }
        if let Some(instance) = instance_before(rest, "blobs:batchUpdate") {
            let instance = InstanceName::new(instance)?;
            return match *method {
                Method::POST => self.handle_batch_update(&instance, req).await,
                _ => Ok(HttpResponse::method_not_allowed()),
            };
        }
        if let Some(instance) = instance_before(rest, "blobs:batchRead") {
            let instance = InstanceName::new(instance)?;
            return match *method {
                Method::POST => self.handle_batch_read(&instance, req).await,
                _ => Ok(HttpResponse::method_not_allowed()),
            };
        }
        if let Some(instance) = instance_before(rest, "capabilities") {
            InstanceName::new(instance)?;
            return match *method {
                Method::GET => Ok(HttpResponse::ok_json(&ServerCapabilities::new(
                    self.state.digest_function,
                    self.state.max_batch_total_size_bytes,
                ))),
                _ => Ok(HttpResponse::method_not_allowed()),
            };
        }
        if let Some((instance, hash, size)) = split_action_result(rest) {
            let instance = InstanceName::new(instance)?;
            let size = size
                .parse::<i64>()
                .map_err(|e| Error::invalid_digest(format!("{hash}/{size}"), format!("bad size: {e}")))?;
            let action = self.state.digest_function.parse(hash, size)?;
            return match *method {
                Method::GET => self.handle_get_action_result(&instance, &action).await,
                Method::PUT => self.handle_update_action_result(&instance, &action, req).await,
                _ => Ok(HttpResponse::method_not_allowed()),
            };
        }

        Ok(HttpResponse::not_found(&format!("/v2/{rest}")))
    }

    fn handle_metrics(&self, path: &str) -> Result<Response<Body>> {
        match &self.state.metrics {
            Some(metrics) => Ok(HttpResponse::ok_text(metrics.metrics_text()?)),
            None => Ok(HttpResponse::not_found(path)),
        }
    }

    async fn handle_find_missing(
        &self,
        instance: &InstanceName,
        req: Request<Body>,
    ) -> Result<Response<Body>> {
        let request: FindMissingBlobsRequest = self.read_json(req).await?;
        let missing = self
            .state
            .engine
            .cas
            .find_missing(instance, &request.blob_digests)
            .await?;
        Ok(HttpResponse::ok_json(&FindMissingBlobsResponse {
            missing_blob_digests: missing,
        }))
    }

    async fn handle_batch_update(
        &self,
        instance: &InstanceName,
        req: Request<Body>,
    ) -> Result<Response<Body>> {
        let request: BatchUpdateBlobsRequest = self.read_json(req).await?;
        let items = request
            .requests
            .into_iter()
            .map(|item| (item.digest, item.data))
            .collect();

        let results = self.state.engine.cas.batch_update(instance, items).await?;
        let responses = results
            .into_iter()
            .map(|(digest, result)| BatchUpdateResult {
                status: Status::from_result(&result),
                digest,
            })
            .collect();
        Ok(HttpResponse::ok_json(&BatchUpdateBlobsResponse { responses }))
    }

    async fn handle_batch_read(
        &self,
        instance: &InstanceName,
        req: Request<Body>,
    ) -> Result<Response<Body>> {
        let request: BatchReadBlobsRequest = self.read_json(req).await?;
        let results = self
            .state
            .engine
            .cas
            .batch_read(instance, request.digests)
            .await?;

        let responses = results
            .into_iter()
            .map(|(digest, result)| {
                let status = Status::from_result(&result);
                BatchReadResult {
                    digest,
                    data: result.unwrap_or_default(),
                    status,
                }
            })
            .collect();
        Ok(HttpResponse::ok_json(&BatchReadBlobsResponse { responses }))
    }

    async fn handle_get_action_result(
        &self,
        instance: &InstanceName,
        action: &Digest,
    ) -> Result<Response<Body>> {
        let result = self
            .state
            .engine
            .action_cache
            .get_result(instance, action)
            .await?;
        Ok(HttpResponse::ok_json(&result))
    }

    async fn handle_update_action_result(
        &self,
        instance: &InstanceName,
        action: &Digest,
        req: Request<Body>,
    ) -> Result<Response<Body>> {
        let result: ActionResult = self.read_json(req).await?;
        let stored = self
            .state
            .engine
            .action_cache
            .set_result(instance, action, result)
            .await?;
        Ok(HttpResponse::ok_json(&stored))
    }

    async fn handle_read(&self, resource: &str, query: Option<&str>) -> Result<Response<Body>> {
        let offset = query_i64(query, "offset")?;
        let limit = query_i64(query, "limit")?;

        let chunks = self
            .state
            .engine
            .bytestream
            .read(resource, offset, limit)
            .await?;
        Ok(HttpResponse::ok_octets(Body::wrap_stream(chunks)))
    }

    async fn handle_write(&self, resource: &str, req: Request<Body>) -> Result<Response<Body>> {
        let query = req.uri().query().map(str::to_string);
        let offset = query_i64(query.as_deref(), "offset")?;
        let finish = query_bool(query.as_deref(), "finish")?;

        // A chunk can never carry more than what is left of the declared size
        let upload = UploadResource::parse(resource, self.state.digest_function)?;
        let size = upload.digest.size_bytes;
        let remaining = (size - offset.clamp(0, size)) as u64;
        let data = read_body(req, remaining, "chunk").await?;

        let status = self
            .state
            .engine
            .bytestream
            .write(resource, offset, &data, finish)
            .await?;
        Ok(HttpResponse::ok_json(&WriteStatusResponse::from(status)))
    }

    async fn handle_cancel(&self, resource: &str) -> Result<Response<Body>> {
        let existed = self.state.engine.bytestream.cancel(resource).await?;
        Ok(HttpResponse::ok_json(&serde_json::json!({ "cancelled": existed })))
    }

    async fn handle_status(&self, resource: &str) -> Result<Response<Body>> {
        let status = self
            .state
            .engine
            .bytestream
            .query_write_status(resource)
            .await?;
        Ok(HttpResponse::ok_json(&WriteStatusResponse::from(status)))
    }
}

/// Instance prefix of `rest` when it ends in the operation `suffix`
fn instance_before<'a>(rest: &'a str, suffix: &str) -> Option<&'a str> {
    if rest == suffix {
        return Some("");
    }
    rest.strip_suffix(suffix)?.strip_suffix('/')
}

/// `[instance/]actionResults/<hash>/<size>` split into its parts
fn split_action_result(rest: &str) -> Option<(&str, &str, &str)> {
    let (instance, tail) = if let Some(tail) = rest.strip_prefix("actionResults/") {
        ("", tail)
    } else {
        let at = rest.find(&format!("/{ACTION_RESULTS_SEGMENT}/"))?;
        (&rest[..at], &rest[at + ACTION_RESULTS_SEGMENT.len() + 2..])
    };

    let (hash, size) = tail.split_once('/')?;
    if size.contains('/') {
        return None;
    }
    Some((instance, hash, size))
}

impl Router {
    /// Largest JSON body accepted: a full batch in base64 plus its envelope
    fn json_body_limit(&self) -> u64 {
        self.state
            .max_batch_total_size_bytes
            .saturating_mul(4)
            .div_ceil(3)
            .saturating_add(JSON_ENVELOPE_ALLOWANCE)
    }

    async fn read_json<T: DeserializeOwned>(&self, req: Request<Body>) -> Result<T> {
        let body = read_body(req, self.json_body_limit(), "request").await?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::invalid_argument(format!("malformed request body: {e}")))
    }
}

/// Collect a request body, refusing it as soon as it is known to exceed
/// `limit` bytes
async fn read_body(req: Request<Body>, limit: u64, what: &str) -> Result<Bytes> {
    let too_large = |len: u64| {
        Error::invalid_argument(format!("{what} body of {len} bytes exceeds the {limit} byte limit"))
    };

    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared {
        if len > limit {
            return Err(too_large(len));
        }
    }

    let mut body = req.into_body();
    let mut buf = BytesMut::with_capacity(declared.unwrap_or(0) as usize);
    while let Some(chunk) = body.data().await {
        let chunk = chunk
            .map_err(|e| Error::invalid_argument(format!("failed to read {what} body: {e}")))?;
        let len = (buf.len() + chunk.len()) as u64;
        if len > limit {
            return Err(too_large(len));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn query_i64(query: Option<&str>, name: &str) -> Result<i64> {
    match query_param(query, name) {
        Some(raw) => raw
            .parse()
            .map_err(|e| Error::invalid_argument(format!("invalid {name} '{raw}': {e}"))),
        None => Ok(0),
    }
}

fn query_bool(query: Option<&str>, name: &str) -> Result<bool> {
    match query_param(query, name).as_deref() {
        None | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") | Some("") => Ok(true),
        Some(other) => Err(Error::invalid_argument(format!("invalid {name} '{other}'"))),
    }
}
