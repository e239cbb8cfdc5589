//! Authentication (C2): Bearer/cookie/legacy-header token extraction and
//! constant-time token→principal lookup. Attaches the resolved [`Principal`]
//! to request extensions for C3 to read.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub scopes: Vec<String>,
}

impl Principal {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Paths requiring the cookie source specifically; a bearer token alone is
/// rejected with 401 (§4.2).
pub fn requires_cookie_source(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    // /api/v3/recordings/{id}/stream.mp4 | {id}/{name}.m3u8
    if segments.len() >= 4 && segments[0] == "api" && segments[1] == "v3" && segments[2] == "recordings" {
        let last = segments[segments.len() - 1];
        if last == "stream.mp4" || last.ends_with(".m3u8") {
            return true;
        }
    }
    // /api/v3/sessions/{id}/hls/{filename}
    if segments.len() >= 5
        && segments[0] == "api"
        && segments[1] == "v3"
        && segments[2] == "sessions"
        && segments[4] == "hls"
    {
        return true;
    }
    false
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn extract_legacy(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Looks up `presented` against every configured token using constant-time
/// comparison, so lookup cost does not leak which prefix matched.
fn constant_time_lookup<'a>(
    tokens: &'a std::collections::HashMap<String, crate::config::TokenPrincipal>,
    presented: &str,
) -> Option<&'a crate::config::TokenPrincipal> {
    let mut found = None;
    for (candidate, principal) in tokens {
        let matches = candidate.as_bytes().ct_eq(presented.as_bytes()).into();
        if matches {
            found = Some(principal);
        }
    }
    found
}

pub async fn auth_middleware(
    State(config): State<Arc<Config>>,
    cookies: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let cookie_only = requires_cookie_source(&path);

    if config.auth.tokens.is_empty() {
        return AppError::TokenMissing {
            code: "NO_TOKENS_CONFIGURED",
            detail: "server has no configured tokens; failing closed".into(),
        }
        .respond(&request);
    }

    let presented = if let Some(cookie) = cookies.get(&config.auth.cookie_name) {
        Some(cookie.value().to_string())
    } else if cookie_only {
        None
    } else if let Some(bearer) = extract_bearer(request.headers()) {
        Some(bearer)
    } else if !config.api_disable_legacy_token_sources {
        extract_legacy(request.headers())
    } else {
        None
    };

    let Some(presented) = presented else {
        return AppError::TokenMissing {
            code: "TOKEN_MISSING",
            detail: if cookie_only {
                "this endpoint requires a session cookie".into()
            } else {
                "no token presented".into()
            },
        }
        .respond(&request);
    };

    let principal = match constant_time_lookup(&config.auth.tokens, &presented) {
        Some(principal) => principal,
        None => {
            return AppError::TokenInvalid {
                code: "TOKEN_INVALID",
                detail: "token does not match any configured principal".into(),
            }
            .respond(&request)
        }
    };

    request.extensions_mut().insert(Principal {
        id: principal.principal_id.clone(),
        scopes: principal.scopes.clone(),
    });

    next.run(request).await
}
