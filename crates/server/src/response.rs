//! HTTP response helpers
//!
//! Every handler ends in one of these so status codes, content types and
//! error bodies stay consistent across routes.

use crate::wire::ErrorBody;
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};
use remcache_core::{Error, ErrorCode};
use serde::Serialize;
use tracing::error;

pub struct HttpResponse;

impl HttpResponse {
    /// JSON body with status 200
    pub fn ok_json(body: &impl Serialize) -> Response<Body> {
        match serde_json::to_vec(body) {
            Ok(json) => Self::build(StatusCode::OK, "application/json", Body::from(json)),
            Err(e) => {
                error!(error = %e, "failed to encode response");
                Self::internal_error("failed to encode response")
            }
        }
    }

    pub fn ok_text(body: String) -> Response<Body> {
        Self::build(StatusCode::OK, "text/plain; charset=utf-8", Body::from(body))
    }

    /// Raw bytes or a chunk stream
    pub fn ok_octets(body: Body) -> Response<Body> {
        Self::build(StatusCode::OK, "application/octet-stream", body)
    }

    /// Map a cache error onto an HTTP status and JSON error body
    pub fn from_error(err: &Error) -> Response<Body> {
        let status = http_status(err.code());
        match serde_json::to_vec(&ErrorBody::from(err)) {
            Ok(json) => Self::build(status, "application/json", Body::from(json)),
            Err(_) => Self::build(status, "text/plain; charset=utf-8", Body::from(err.to_string())),
        }
    }

    /// No route matched the request path
    pub fn not_found(path: &str) -> Response<Body> {
        let body = ErrorBody {
            code: ErrorCode::NotFound.as_str().to_string(),
            message: format!("no route for '{path}'"),
            committed_size: None,
            missing_digests: Vec::new(),
        };
        let mut response = Self::ok_json(&body);
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
    }

    pub fn method_not_allowed() -> Response<Body> {
        Self::build(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain; charset=utf-8",
            Body::from("Method Not Allowed"),
        )
    }

    pub fn internal_error(message: &str) -> Response<Body> {
        Self::build(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain; charset=utf-8",
            Body::from(message.to_string()),
        )
    }

    fn build(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
        let mut response = Response::new(body);
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

/// HTTP status for each transport-neutral error code
pub fn http_status(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Ok => StatusCode::OK,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        ErrorCode::DataLoss => StatusCode::CONFLICT,
        ErrorCode::OutOfRange => StatusCode::RANGE_NOT_SATISFIABLE,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCode::Unknown | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
