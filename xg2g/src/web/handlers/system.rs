//! System info/health and the router's 404 fallback.

use std::time::Duration;

use axum::extract::{Extension, State};
use axum::http::Uri;
use axum::Json;
use serde::Serialize;

use crate::admission::StateCollector;
use crate::errors::AppError;
use crate::problem::{Problem, RequestId};
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    #[serde(rename = "buildVersion")]
    build_version: &'static str,
    #[serde(rename = "engineEnabled")]
    engine_enabled: bool,
    #[serde(rename = "tunerSlotCount")]
    tuner_slot_count: usize,
}

pub async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        build_version: env!("CARGO_PKG_VERSION"),
        engine_enabled: state.config.engine.enabled,
        tuner_slot_count: state.config.engine.tuner_slots.len(),
    })
}

#[derive(Debug, Serialize)]
pub struct SystemHealth {
    status: &'static str,
    #[serde(rename = "sessionsActive")]
    sessions_active: i64,
    #[serde(rename = "tunerSlotsAvailable")]
    tuner_slots_available: i64,
}

/// §6: `STATE_UNKNOWN` collector failures surface as 503 here too, the same
/// fail-closed rule C5's admission decision applies to requests.
pub async fn system_health(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
) -> Result<Json<SystemHealth>, Problem> {
    let collector = StateCollector::new(
        state.store.clone(),
        state.config.engine.tuner_slots.len(),
        Duration::from_millis(500),
    );
    let snapshot = collector.snapshot().await;

    if snapshot.is_unknown() || !state.config.engine.enabled {
        return Err(AppError::Unavailable {
            code: "STATE_UNKNOWN",
            detail: "runtime state could not be collected".into(),
            retry_after_seconds: None,
        }
        .into_problem(uri.path(), &request_id));
    }

    Ok(Json(SystemHealth {
        status: "ok",
        sessions_active: snapshot.sessions_active,
        tuner_slots_available: snapshot.tuner_slots_available,
    }))
}

pub async fn not_found(Extension(RequestId(request_id)): Extension<RequestId>, uri: Uri) -> Problem {
    AppError::NotFound {
        code: "NOT_FOUND",
        detail: format!("no route for {}", uri.path()),
    }
    .into_problem(uri.path(), &request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::extract::State as AxumState;

    #[tokio::test]
    async fn system_info_reports_configured_tuner_slot_count() {
        let mut config = Config::default();
        config.engine.tuner_slots = vec![0, 1, 2];
        let state = AppState::build(config).await.unwrap();
        let Json(info) = system_info(AxumState(state)).await;
        assert_eq!(info.tuner_slot_count, 3);
    }

    #[tokio::test]
    async fn system_health_reports_ok_with_no_active_sessions() {
        let state = AppState::build(Config::default()).await.unwrap();
        let Json(health) = system_health(
            AxumState(state),
            Extension(RequestId("req-1".into())),
            "/api/v3/system/health".parse().unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.sessions_active, 0);
    }

    #[tokio::test]
    async fn system_health_is_unavailable_when_engine_disabled() {
        let mut config = Config::default();
        config.engine.enabled = false;
        let state = AppState::build(config).await.unwrap();
        let err = system_health(
            AxumState(state),
            Extension(RequestId("req-1".into())),
            "/api/v3/system/health".parse().unwrap(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "STATE_UNKNOWN");
    }
}
