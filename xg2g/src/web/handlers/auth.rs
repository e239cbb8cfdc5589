//! `POST /api/v3/auth/session`: exchanges a Bearer token for a session
//! cookie (§4.2).

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, Uri};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::auth::{extract_bearer, Principal};
use crate::errors::AppError;
use crate::problem::{Problem, RequestId};
use crate::web::state::AppState;

pub async fn create_session(
    State(state): State<AppState>,
    Extension(_principal): Extension<Principal>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, &'static str), Problem> {
    let to_problem = |err: AppError| err.into_problem(uri.path(), &request_id);

    // The auth middleware already validated the caller (cookie, bearer, or
    // legacy header); this endpoint specifically requires the bearer form
    // so its value can become the new cookie's value.
    let token = extract_bearer(&headers)
        .ok_or_else(|| AppError::TokenMissing {
            code: "TOKEN_MISSING",
            detail: "session exchange requires a Bearer token".into(),
        })
        .map_err(to_problem)?;

    let cookie = Cookie::build((state.config.auth.cookie_name.clone(), token))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/api/v3/")
        .max_age(time::Duration::hours(24))
        .secure(state.config.force_https)
        .build();

    Ok((jar.add(cookie), "{}"))
}
