//! Router & route registration (C12): the route table, with scope
//! attachment, authentication, and request-ID middleware wired around every
//! handler. Construction is fallible: [`AppState::build`] already failed if
//! any operation lacks a scope policy entry; this module additionally
//! panics at startup (not at request time) if a route here names an
//! operation the policy never heard of, since that is a programming error
//! rather than a runtime condition.

use axum::{
    extract::Extension,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::authz::{scope_middleware, OperationId};
use crate::problem::request_id_middleware;
use crate::web::handlers;
use crate::web::state::AppState;

pub fn build(state: AppState) -> Router {
    let policy = state.scope_policy.clone();

    let op_layer = |operation: &'static str| {
        assert!(
            policy.required_scopes(operation).is_some(),
            "operation {operation} has no scope policy entry"
        );
        (
            Extension(OperationId(operation)),
            middleware::from_fn_with_state(policy.clone(), scope_middleware),
        )
    };

    let router = Router::new()
        .route(
            "/api/v3/auth/session",
            post(handlers::auth::create_session).layer(op_layer("CreateAuthSession")),
        )
        .route(
            "/api/v3/intents",
            post(handlers::intents::create_intent).layer(op_layer("CreateIntent")),
        )
        .route(
            "/api/v3/streams",
            get(handlers::sessions::list_streams).layer(op_layer("GetStreams")),
        )
        .route(
            "/api/v3/streams/{id}",
            delete(handlers::sessions::stop_stream).layer(op_layer("StopSession")),
        )
        .route(
            "/api/v3/sessions/{id}",
            get(handlers::sessions::get_session).layer(op_layer("GetSession")),
        )
        .route(
            "/api/v3/sessions/{id}/hls/{filename}",
            get(handlers::hls::serve_session_artifact).layer(op_layer("ServeHlsArtifact")),
        )
        .route(
            "/api/v3/recordings/{id}/stream-info",
            get(handlers::playback::recording_stream_info).layer(op_layer("GetPlaybackInfo")),
        )
        .route(
            "/api/v3/live/stream-info",
            post(handlers::playback::live_stream_info).layer(op_layer("GetLiveStreamInfo")),
        )
        .route(
            "/api/v3/recordings/{id}/playlist.m3u8",
            get(handlers::hls::serve_recording_playlist).layer(op_layer("GetRecordingPlaylist")),
        )
        .route(
            "/api/v3/recordings/{id}/{filename}",
            get(handlers::hls::serve_recording_artifact).layer(op_layer("ServeRecordingArtifact")),
        )
        .route(
            "/api/v3/system/info",
            get(handlers::system::system_info).layer(op_layer("GetSystemInfo")),
        )
        .route(
            "/api/v3/system/health",
            get(handlers::system::system_health),
        )
        .fallback(handlers::system::not_found)
        .with_state(state.clone());

    router
        .layer(middleware::from_fn_with_state(state.config.clone(), crate::auth::auth_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
