//! HLS artifact serving handlers (C14): session working-directory artifacts
//! and finished-recording artifacts, both delegating to
//! [`crate::hls_serving::serve_artifact`] over their own sandboxed root.

use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;

use crate::errors::AppError;
use crate::hls_resolver::{decode_recording_id, Readiness};
use crate::hls_serving::serve_artifact;
use crate::problem::{Problem, RequestId};
use crate::web::state::AppState;

const PLAYLIST_FILENAME: &str = "playlist.m3u8";
const PREPARING_RETRY_AFTER_SECONDS: u64 = 2;

fn range_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok())
}

/// `GET /api/v3/sessions/{id}/hls/{filename}`.
pub async fn serve_session_artifact(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, Problem> {
    let relative_path = format!("{id}/{filename}");
    serve_artifact(&state.hls_manager, &id, &filename, &relative_path, range_header(&headers))
        .await
        .map_err(|err| err.into_problem(uri.path(), &request_id))
}

/// `GET /api/v3/recordings/{id}/playlist.m3u8`: §6's own endpoint row with a
/// `503 PREPARING` failure mode distinct from the generic artifact route —
/// the recording's media truth (C10) must be resolved before the playlist
/// can be considered ready to serve. A cache miss triggers a background
/// `resolve` to warm the single-flight probe and returns `PREPARING`
/// immediately rather than blocking the request on it.
pub async fn serve_recording_playlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, Problem> {
    let to_problem = |err: AppError| err.into_problem(uri.path(), &request_id);

    let service_ref = decode_recording_id(&id).map_err(to_problem)?;

    match state.resolver.peek(&service_ref) {
        Readiness::Ready(_) => {}
        Readiness::Failed(err) => return Err(to_problem(err)),
        Readiness::Preparing => {
            let resolver = state.resolver.clone();
            tokio::spawn(async move {
                let _ = resolver.resolve(&service_ref, "playlist").await;
            });
            return Err(to_problem(AppError::Unavailable {
                code: "PREPARING",
                detail: "recording is not yet ready to serve".into(),
                retry_after_seconds: Some(PREPARING_RETRY_AFTER_SECONDS),
            }));
        }
    }

    let relative_path = format!("{id}/{PLAYLIST_FILENAME}");
    serve_artifact(&state.recordings_manager, &id, PLAYLIST_FILENAME, &relative_path, range_header(&headers))
        .await
        .map_err(to_problem)
}

/// `GET /api/v3/recordings/{id}/{filename}` (`stream.mp4` or `*.m3u8`).
pub async fn serve_recording_artifact(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, Problem> {
    let relative_path = format!("{id}/{filename}");
    serve_artifact(&state.recordings_manager, &id, &filename, &relative_path, range_header(&headers))
        .await
        .map_err(|err| err.into_problem(uri.path(), &request_id))
}
