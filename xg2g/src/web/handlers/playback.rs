//! `GET /api/v3/recordings/{id}/stream-info` and `POST /api/v3/live/stream-info`
//! (C11): composes C10's media truth with playlist segment truth for
//! recordings, or mints a fresh attestation token for a live preview.

use axum::extract::{Extension, Path, Query, State};
use axum::http::Uri;
use axum::Json;
use serde::Deserialize;

use crate::errors::AppError;
use crate::hls_resolver::decode_recording_id;
use crate::playback_info::{compose, extract_segment_truth, PlaybackInfo};
use crate::problem::{Problem, RequestId};
use crate::web::state::AppState;

const PLAYLIST_FILENAME: &str = "playlist.m3u8";

#[derive(Debug, Deserialize)]
pub struct StreamInfoQuery {
    #[serde(default, rename = "resumePositionSeconds")]
    resume_position_seconds: Option<f64>,
}

pub async fn recording_stream_info(
    State(state): State<AppState>,
    Path(recording_id): Path<String>,
    Query(query): Query<StreamInfoQuery>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
) -> Result<Json<PlaybackInfo>, Problem> {
    let to_problem = |err: AppError| err.into_problem(uri.path(), &request_id);

    let service_ref = decode_recording_id(&recording_id).map_err(to_problem)?;
    let media = state
        .resolver
        .resolve(&service_ref, "stream-info")
        .await
        .map_err(to_problem)?;

    let playlist_path = format!("{recording_id}/{PLAYLIST_FILENAME}");
    let has_playlist = state
        .recordings_manager
        .exists(&playlist_path)
        .await
        .unwrap_or(false);

    let segments = if has_playlist {
        let text = state
            .recordings_manager
            .read_to_string(&playlist_path)
            .await
            .map_err(|e| AppError::internal(anyhow::anyhow!(e)))
            .map_err(to_problem)?;
        Some(extract_segment_truth(&text).map_err(to_problem)?)
    } else {
        None
    };

    let info = compose(
        &recording_id,
        &request_id,
        &media,
        segments.as_ref(),
        query.resume_position_seconds,
        None,
    );
    Ok(Json(info))
}

/// Client-declared decode/resolution limits for `POST /live/stream-info`.
/// Rejected wholesale as `INVALID_CAPABILITIES` if a declared resolution is
/// nonsensical; the resolver doesn't otherwise act on these yet.
#[derive(Debug, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, rename = "supportsHls")]
    pub supports_hls: Option<bool>,
    #[serde(default, rename = "maxResolutionHeight")]
    pub max_resolution_height: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct LiveStreamInfoRequest {
    #[serde(rename = "serviceRef")]
    pub service_ref: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default, rename = "clientCapabilities")]
    pub client_capabilities: Option<ClientCapabilities>,
}

/// `POST /api/v3/live/stream-info`: the live-preview counterpart to
/// [`recording_stream_info`]. Resolves media truth for the service and mints
/// a fresh `playbackDecisionToken` the caller then attaches to its
/// subsequent `stream.start` intent (§4.3, §4.6 step 2).
pub async fn live_stream_info(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
    Json(body): Json<LiveStreamInfoRequest>,
) -> Result<Json<PlaybackInfo>, Problem> {
    let to_problem = |err: AppError| err.into_problem(uri.path(), &request_id);

    let service_ref = body.service_ref.trim();
    if service_ref.is_empty() {
        return Err(to_problem(AppError::InvalidInput {
            code: "INVALID_INPUT",
            detail: "serviceRef must not be empty".into(),
        }));
    }

    let mode = body.mode.as_deref().unwrap_or("LIVE");
    if !mode.eq_ignore_ascii_case("LIVE") {
        return Err(to_problem(AppError::InvalidInput {
            code: "INVALID_INPUT",
            detail: "POST /live/stream-info only serves LIVE mode".into(),
        }));
    }

    if let Some(caps) = &body.client_capabilities {
        if caps.max_resolution_height == Some(0) {
            return Err(to_problem(AppError::InvalidInput {
                code: "INVALID_CAPABILITIES",
                detail: "maxResolutionHeight must be greater than zero".into(),
            }));
        }
    }

    let media = state
        .resolver
        .resolve(service_ref, "live-stream-info")
        .await
        .map_err(to_problem)?;

    let now = chrono::Utc::now().timestamp();
    let claims = crate::models::PlaybackDecisionClaims {
        sub: None,
        service_ref: service_ref.to_string(),
        mode: "LIVE".to_string(),
        kid: None,
        request_id: Some(request_id.clone()),
        iat: now,
        exp: now + state.config.playback_decision.rotation_window.as_secs() as i64,
    };
    let token = state.keyring.sign(&claims).map_err(|_| {
        to_problem(AppError::Unavailable {
            code: "ATTESTATION_UNAVAILABLE",
            detail: "unable to mint a playback decision token".into(),
            retry_after_seconds: Some(5),
        })
    })?;

    let info = compose(service_ref, &request_id, &media, None, None, Some(token));
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::extract::State as AxumState;

    fn request(service_ref: &str) -> LiveStreamInfoRequest {
        LiveStreamInfoRequest {
            service_ref: service_ref.to_string(),
            mode: None,
            client_capabilities: None,
        }
    }

    #[tokio::test]
    async fn live_stream_info_rejects_empty_service_ref() {
        let state = AppState::build(Config::default()).await.unwrap();
        let err = live_stream_info(
            AxumState(state),
            Extension(RequestId("req-1".into())),
            "/api/v3/live/stream-info".parse().unwrap(),
            Json(request("  ")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "INVALID_INPUT");
    }

    #[tokio::test]
    async fn live_stream_info_rejects_non_live_mode() {
        let state = AppState::build(Config::default()).await.unwrap();
        let mut body = request("1:0:1:445D:453:1:C00000:0:0:0:");
        body.mode = Some("RECORDING".into());
        let err = live_stream_info(
            AxumState(state),
            Extension(RequestId("req-1".into())),
            "/api/v3/live/stream-info".parse().unwrap(),
            Json(body),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "INVALID_INPUT");
    }

    #[tokio::test]
    async fn live_stream_info_rejects_zero_max_resolution() {
        let state = AppState::build(Config::default()).await.unwrap();
        let mut body = request("1:0:1:445D:453:1:C00000:0:0:0:");
        body.client_capabilities = Some(ClientCapabilities {
            supports_hls: Some(true),
            max_resolution_height: Some(0),
        });
        let err = live_stream_info(
            AxumState(state),
            Extension(RequestId("req-1".into())),
            "/api/v3/live/stream-info".parse().unwrap(),
            Json(body),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "INVALID_CAPABILITIES");
    }
}
