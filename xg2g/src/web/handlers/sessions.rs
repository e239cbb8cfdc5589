//! Session read API handlers (C9): `GET /streams`, `GET /sessions/{id}`,
//! `DELETE /streams/{id}`.

use axum::extract::{Extension, Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::errors::AppError;
use crate::eventbus::{BusEvent, EventBus, SessionStopEvent};
use crate::models::is_safe_id;
use crate::problem::{Problem, RequestId};
use crate::session_store::SessionStore;
use crate::sessions::{sort_active, to_response, SessionResponse};
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamsQuery {
    #[serde(default, rename = "includeClientIp")]
    include_client_ip: bool,
}

/// `GET /streams`: never returns `null` for an empty fleet (§4.7).
pub async fn list_streams(
    State(state): State<AppState>,
    Query(query): Query<StreamsQuery>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
) -> Result<Json<Vec<SessionResponse>>, Problem> {
    let mut sessions = state
        .store
        .list_active()
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!(e.to_string())).into_problem(uri.path(), &request_id))?;

    sort_active(&mut sessions);
    let now = Utc::now();
    let responses = sessions
        .iter()
        .map(|s| to_response(s, now, query.include_client_ip))
        .collect();
    Ok(Json(responses))
}

/// `GET /sessions/{id}`.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamsQuery>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
) -> Result<Json<SessionResponse>, Problem> {
    let to_problem = |err: AppError| err.into_problem(uri.path(), &request_id);

    if !is_safe_id(&id) {
        return Err(AppError::InvalidInput { code: "INVALID_INPUT", detail: "sessionId has an unsafe shape".into() }).map_err(to_problem);
    }

    let session = state
        .store
        .get(&id)
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!(e.to_string())))
        .map_err(to_problem)?
        .ok_or_else(|| AppError::NotFound { code: "NOT_FOUND", detail: "session does not exist".into() })
        .map_err(to_problem)?;

    if session.state.is_terminal() {
        return Err(AppError::Gone {
            code: "SESSION_GONE",
            detail: "session has reached a terminal state".into(),
            problem_type: "urn:xg2g:error:session:gone",
        })
        .map_err(to_problem);
    }

    Ok(Json(to_response(&session, Utc::now(), query.include_client_ip)))
}

/// `DELETE /streams/{id}`: a direct stop, distinct from the idempotent
/// `stream.stop` intent — no serviceRef, no idempotency fold, just a
/// transition to `Draining` plus the usual event-bus notification.
pub async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
) -> Result<StatusCode, Problem> {
    let to_problem = |err: AppError| err.into_problem(uri.path(), &request_id);

    if !is_safe_id(&id) {
        return Err(AppError::InvalidInput { code: "INVALID_INPUT", detail: "sessionId has an unsafe shape".into() }).map_err(to_problem);
    }

    let updated = state
        .store
        .update_session(&id, Box::new(|s| s.state = crate::models::SessionState::Draining))
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!(e.to_string())))
        .map_err(to_problem)?;

    if updated.is_none() {
        return Err(AppError::NotFound { code: "NOT_FOUND", detail: "session does not exist".into() }).map_err(to_problem);
    }

    state
        .bus
        .publish(
            "session.stop",
            BusEvent::SessionStop(SessionStopEvent {
                session_id: id,
                requested_at_unix: Utc::now().timestamp(),
            }),
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}
