//! RFC 7807 problem model, request-ID propagation, and the response-writer
//! capability-preserving wrapper (C1).
//!
//! Every failure response produced by this service has media type
//! `application/problem+json`. Canonical fields always win over any
//! caller-supplied extensions; `instance` is the request path with the
//! query string stripped, and `requestId` mirrors the `X-Request-Id`
//! response header.

use std::collections::BTreeMap;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The request ID attached to every inbound request via extensions, set by
/// [`request_id_middleware`] before the handler runs.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// RFC 7807 problem body. `extensions` holds any additional fields a caller
/// wants to surface; canonical fields are never overridden by them.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub instance: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "retryAfterSeconds", skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl Problem {
    pub fn new(
        status: StatusCode,
        problem_type: impl Into<String>,
        title: impl Into<String>,
        code: impl Into<String>,
        instance: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            problem_type: problem_type.into(),
            title: title.into(),
            status: status.as_u16(),
            code: code.into(),
            detail: None,
            instance: instance.into(),
            request_id: request_id.into(),
            retry_after_seconds: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Insert a caller extension, refusing to clobber a canonical field.
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if !is_canonical_field(&key) {
            self.extensions.insert(key, value);
        }
        self
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

fn is_canonical_field(key: &str) -> bool {
    matches!(
        key,
        "type" | "title" | "status" | "detail" | "instance" | "code" | "requestId"
    )
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = self.request_id.clone();
        let retry_after = self.retry_after_seconds;
        let mut response = (status, axum::Json(self)).into_response();
        response.headers_mut().insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-request-id"), value);
        }
        if let Some(seconds) = retry_after {
            response.headers_mut().insert(
                HeaderName::from_static("retry-after"),
                HeaderValue::from(seconds),
            );
        }
        response
    }
}

/// Strips the query string from a request's path, per §4.1 ("`instance` is
/// the request path, query stripped").
pub fn instance_path(uri: &axum::http::Uri) -> String {
    uri.path().to_string()
}

/// Extracts or generates the request ID and makes it available to handlers
/// via request extensions, then mirrors it onto the response header. This is
/// the first middleware in the stack (§4.1, §6: "Every response carries the
/// request-ID header").
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string);
    let request_id = incoming.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }

    response
}
