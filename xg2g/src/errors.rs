//! The error-kind taxonomy (§7) and its mapping onto RFC 7807 problems.
//!
//! Every fallible operation in this crate returns `AppResult<T>`. Handlers
//! convert the terminal `AppError` into a [`Problem`] using
//! [`AppError::into_problem`], which is the only place HTTP status codes are
//! chosen for errors.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;

use crate::problem::{Problem, RequestId};

pub type AppResult<T> = Result<T, AppError>;

/// A denial/error code string as used in problem bodies and metric labels.
/// Always a short, stable, upper-snake token (e.g. `NO_TUNERS`).
pub type Code = &'static str;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {detail}")]
    InvalidInput { code: Code, detail: String },

    #[error("token missing")]
    TokenMissing { code: Code, detail: String },

    #[error("token invalid")]
    TokenInvalid { code: Code, detail: String },

    #[error("forbidden: {detail}")]
    Forbidden { code: Code, detail: String },

    #[error("not found: {detail}")]
    NotFound { code: Code, detail: String },

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("gone: {detail}")]
    Gone {
        code: Code,
        detail: String,
        problem_type: &'static str,
    },

    #[error("range not satisfiable")]
    UnsatisfiableRange,

    #[error("unsupported: {detail}")]
    Unsupported { code: Code, detail: String },

    #[error("internal error")]
    Internal(#[source] anyhow::Error),

    #[error("bad gateway: {detail}")]
    BadGateway { code: Code, detail: String },

    #[error("unavailable: {detail}")]
    Unavailable {
        code: Code,
        detail: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("gateway timeout: {detail}")]
    GatewayTimeout { code: Code, detail: String },
}

impl AppError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            AppError::TokenMissing { .. } | AppError::TokenInvalid { .. } => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Gone { .. } => StatusCode::GONE,
            AppError::UnsatisfiableRange => StatusCode::RANGE_NOT_SATISFIABLE,
            AppError::Unsupported { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            AppError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidInput { code, .. }
            | AppError::TokenMissing { code, .. }
            | AppError::TokenInvalid { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Gone { code, .. }
            | AppError::Unsupported { code, .. }
            | AppError::BadGateway { code, .. }
            | AppError::Unavailable { code, .. }
            | AppError::GatewayTimeout { code, .. } => code,
            AppError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            AppError::UnsatisfiableRange => "RANGE_NOT_SATISFIABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Never leaks the internal `anyhow`/`thiserror` chain into a client
    /// facing `detail` for internal-class errors; the full error is logged
    /// separately by the caller via `tracing::error!`.
    pub fn detail(&self) -> Option<String> {
        match self {
            AppError::InvalidInput { detail, .. }
            | AppError::TokenMissing { detail, .. }
            | AppError::TokenInvalid { detail, .. }
            | AppError::Forbidden { detail, .. }
            | AppError::NotFound { detail, .. }
            | AppError::Gone { detail, .. }
            | AppError::Unsupported { detail, .. }
            | AppError::BadGateway { detail, .. }
            | AppError::Unavailable { detail, .. }
            | AppError::GatewayTimeout { detail, .. } => Some(detail.clone()),
            AppError::MethodNotAllowed
            | AppError::UnsatisfiableRange
            | AppError::Internal(_) => None,
        }
    }

    fn problem_type(&self) -> &'static str {
        match self {
            AppError::Gone { problem_type, .. } => problem_type,
            AppError::InvalidInput { .. } => "urn:xg2g:error:input:invalid",
            AppError::TokenMissing { .. } => "urn:xg2g:error:auth:token_missing",
            AppError::TokenInvalid { .. } => "urn:xg2g:error:auth:token_invalid",
            AppError::Forbidden { .. } => "urn:xg2g:error:auth:forbidden",
            AppError::NotFound { .. } => "urn:xg2g:error:resource:not_found",
            AppError::MethodNotAllowed => "urn:xg2g:error:router:method_not_allowed",
            AppError::UnsatisfiableRange => "urn:xg2g:error:hls:range_not_satisfiable",
            AppError::Unsupported { .. } => "urn:xg2g:error:resource:unsupported",
            AppError::Internal(_) => "urn:xg2g:error:internal",
            AppError::BadGateway { .. } => "urn:xg2g:error:upstream:bad_gateway",
            AppError::Unavailable { .. } => "urn:xg2g:error:control_plane:unavailable",
            AppError::GatewayTimeout { .. } => "urn:xg2g:error:upstream:timeout",
        }
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            AppError::Unavailable {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            _ => None,
        }
    }

    /// Render into the RFC 7807 problem carried by C1. `instance` is the
    /// request path (query stripped); `request_id` is shared with the
    /// `X-Request-Id` response header.
    pub fn into_problem(self, instance: &str, request_id: &str) -> Problem {
        let status = self.status();
        let code = self.code();
        let problem_type = self.problem_type();
        let detail = self.detail();

        if let AppError::Internal(ref e) = self {
            tracing::error!(error = %e, request_id, "internal error");
        }

        let mut problem = Problem::new(status, problem_type, title_for(status), code, instance, request_id);
        if let Some(detail) = detail {
            problem = problem.with_detail(detail);
        }
        if let Some(seconds) = self.retry_after_seconds() {
            problem = problem.with_retry_after(seconds);
        }
        problem
    }

    /// Converts straight into a response for middleware that only has a
    /// `Request` to pull `instance`/`requestId` from (no handler-level
    /// `Extension` extractors available in that position).
    pub fn respond(self, request: &Request) -> Response {
        use axum::response::IntoResponse;

        let instance = request.uri().path();
        let request_id = request
            .extensions()
            .get::<RequestId>()
            .map(RequestId::as_str)
            .unwrap_or("");
        self.into_problem(instance, request_id).into_response()
    }
}

fn title_for(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "Bad Request",
        StatusCode::UNAUTHORIZED => "Unauthorized",
        StatusCode::FORBIDDEN => "Forbidden",
        StatusCode::NOT_FOUND => "Not Found",
        StatusCode::METHOD_NOT_ALLOWED => "Method Not Allowed",
        StatusCode::GONE => "Gone",
        StatusCode::RANGE_NOT_SATISFIABLE => "Range Not Satisfiable",
        StatusCode::UNPROCESSABLE_ENTITY => "Unsupported",
        StatusCode::BAD_GATEWAY => "Bad Gateway",
        StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
        StatusCode::GATEWAY_TIMEOUT => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_full_maps_to_503_with_stable_code() {
        let err = AppError::Unavailable {
            code: "SESSIONS_FULL",
            detail: "max sessions reached".into(),
            retry_after_seconds: Some(5),
        };
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "SESSIONS_FULL");
        assert_eq!(err.retry_after_seconds(), Some(5));
    }

    #[test]
    fn sessions_full_problem_carries_retry_after() {
        let err = AppError::Unavailable {
            code: "SESSIONS_FULL",
            detail: "max sessions reached".into(),
            retry_after_seconds: Some(5),
        };
        let problem = err.into_problem("/api/v3/intents", "req-1");
        assert_eq!(problem.retry_after_seconds, Some(5));
    }

    #[test]
    fn internal_errors_never_leak_detail() {
        let err = AppError::internal(anyhow::anyhow!("db connection string: secret"));
        assert!(err.detail().is_none());
        let problem = err.into_problem("/api/v3/streams", "req-1");
        assert!(problem.detail.is_none());
    }
}
