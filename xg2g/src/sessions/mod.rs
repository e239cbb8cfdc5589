//! Session read API (C9): lifecycle-truth classification and the DTOs served
//! by `GET /sessions/{id}` and `GET /streams`.

use chrono::Utc;
use serde::Serialize;

use crate::models::{Mode, PipelineState, SessionRecord, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleTruth {
    Buffering,
    Stalled,
    Idle,
    Active,
}

/// §4.7.1: classify a `Serving` session's liveness from access and segment
/// timestamps. Sessions whose `pipelineState` isn't `Serving` are not
/// classified here — callers should surface raw `state`/`pipelineState`
/// instead. `Priming` takes priority over the timestamp checks below so a
/// session still filling its buffer reports BUFFERING, not STALLED.
pub fn classify_lifecycle(session: &SessionRecord, now: chrono::DateTime<Utc>) -> Option<LifecycleTruth> {
    if session.pipeline_state != PipelineState::Serving {
        return None;
    }
    if session.state == SessionState::Priming {
        return Some(LifecycleTruth::Buffering);
    }
    if let Some(latest) = session.latest_segment_at {
        if (now - latest).num_seconds() > 12 {
            return Some(LifecycleTruth::Stalled);
        }
    }
    if let Some(last_access) = session.last_playlist_access_at {
        if (now - last_access).num_seconds() > 30 {
            return Some(LifecycleTruth::Idle);
        }
    }
    Some(LifecycleTruth::Active)
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub state: SessionState,
    #[serde(rename = "pipelineState")]
    pub pipeline_state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    #[serde(rename = "durationSeconds", skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    #[serde(rename = "seekableStart", skip_serializing_if = "Option::is_none")]
    pub seekable_start: Option<i64>,
    #[serde(rename = "seekableEnd", skip_serializing_if = "Option::is_none")]
    pub seekable_end: Option<i64>,
    #[serde(rename = "liveEdgeSeconds", skip_serializing_if = "Option::is_none")]
    pub live_edge_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "reasonDetail", skip_serializing_if = "Option::is_none")]
    pub reason_detail: Option<String>,
    #[serde(rename = "clientIp", skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

/// Builds the sparse response DTO per §4.7. `include_client_ip` gates
/// exposure of `contextData.client_ip` (default omitted).
pub fn to_response(session: &SessionRecord, now: chrono::DateTime<Utc>, include_client_ip: bool) -> SessionResponse {
    let mode = session.mode();

    let (duration_seconds, seekable_start, seekable_end, live_edge_seconds) = match mode {
        Some(Mode::Recording) => {
            let duration = session.duration_seconds();
            (duration, duration.map(|_| 0), duration, None)
        }
        Some(Mode::Live) => {
            let duration = if session.profile.dvr_window_sec > 0 {
                Some(session.profile.dvr_window_sec)
            } else {
                None
            };
            let live_edge = Some((now.timestamp() - session.created_at_unix).max(0));
            let seekable_end = live_edge;
            let seekable_start = match (duration, live_edge) {
                (Some(d), Some(edge)) => Some((edge - d).max(0)),
                _ => None,
            };
            (duration, seekable_start, seekable_end, live_edge)
        }
        None => (None, None, None, None),
    };

    SessionResponse {
        session_id: session.session_id.clone(),
        state: session.state,
        pipeline_state: session.pipeline_state,
        mode: mode.map(Mode::as_str),
        duration_seconds,
        seekable_start,
        seekable_end,
        live_edge_seconds,
        reason: session.reason.clone(),
        reason_detail: session.reason_detail.clone(),
        client_ip: if include_client_ip {
            session.client_ip().map(str::to_string)
        } else {
            None
        },
    }
}

/// §4.7: descending `createdAtUnix`, ties broken by ascending `sessionID`.
pub fn sort_active(sessions: &mut [SessionRecord]) {
    sessions.sort_by(|a, b| {
        b.created_at_unix
            .cmp(&a.created_at_unix)
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
}
