//! Integration tests for the six literal end-to-end scenarios in spec §8,
//! driven through the real `axum::Router` (auth, request-ID and scope
//! middleware included) via `axum-test`, not through direct handler calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode};
use axum_test::cookie::Cookie;
use axum_test::TestServer;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{json, Value};
use tempfile::TempDir;

use xg2g::config::{AuthConfig, Config, TokenPrincipal};
use xg2g::eventbus::EventBus;
use xg2g::hls_resolver::{Probe, ProbeError, ProbeInfo};
use xg2g::models::{PipelineState, PlaybackDecisionClaims, Profile, SessionRecord, SessionState};
use xg2g::router;
use xg2g::session_store::SessionStore;
use xg2g::web::state::{AppState, UnconfiguredProbe};

const TEST_TOKEN: &str = "test-token";
const SERVICE_REF: &str = "1:0:1:445D:453:1:C00000:0:0:0:";

/// A probe that always succeeds with a fixed duration, for the scenarios
/// (5, 6) that need `GET /recordings/{id}/stream-info` to actually resolve
/// media truth rather than hit `UnconfiguredProbe`'s always-`NotFound` stub.
struct FixedProbe {
    duration_seconds: f64,
}

#[async_trait]
impl Probe for FixedProbe {
    async fn probe(&self, _service_ref: &str) -> Result<ProbeInfo, ProbeError> {
        Ok(ProbeInfo {
            container: "mp4".into(),
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            duration_seconds: self.duration_seconds,
            local_path: None,
        })
    }
}

fn base_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.hls.root = tmp.path().to_path_buf();
    config.playback_decision.secret = "test-secret".into();

    let mut tokens = HashMap::new();
    tokens.insert(
        TEST_TOKEN.to_string(),
        TokenPrincipal {
            principal_id: "user-1".into(),
            scopes: vec!["v3:write".into(), "v3:read".into()],
        },
    );
    config.auth = AuthConfig { tokens, cookie_name: "xg2g_session".into() };
    config
}

async fn server_for(config: Config, probe: Arc<dyn Probe>) -> (TestServer, AppState) {
    let state = AppState::build_with_probe(config, probe)
        .await
        .expect("app state should build");
    let app = router::build(state.clone());
    let server = TestServer::new(app).expect("test server should start");
    (server, state)
}

fn sign_live_token(state: &AppState, service_ref: &str, request_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = PlaybackDecisionClaims {
        sub: None,
        service_ref: service_ref.to_string(),
        mode: "LIVE".to_string(),
        kid: None,
        request_id: Some(request_id.to_string()),
        iat: now,
        exp: now + 600,
    };
    state.keyring.sign(&claims).expect("signing should succeed")
}

fn occupying_session(id: &str) -> SessionRecord {
    SessionRecord {
        session_id: id.to_string(),
        correlation_id: None,
        service_ref: "filler".to_string(),
        profile: Profile::default(),
        context_data: HashMap::new(),
        created_at_unix: 0,
        updated_at_unix: 0,
        last_access_unix: 0,
        playlist_published_at: None,
        latest_segment_at: None,
        last_playlist_access_at: None,
        fallback_at_unix: None,
        fallback_reason: None,
        state: SessionState::Ready,
        pipeline_state: PipelineState::Serving,
        reason: None,
        reason_detail: None,
    }
}

fn live_start_body(correlation_id: &str, token: &str) -> Value {
    json!({
        "type": "stream.start",
        "serviceRef": SERVICE_REF,
        "correlationId": correlation_id,
        "params": {"mode": "LIVE"},
        "playbackDecisionToken": token,
    })
}

/// Scenario 1: idempotent start.
#[tokio::test]
async fn idempotent_start_returns_202_twice_with_one_session_and_one_event() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(&tmp);
    let (server, state) = server_for(config, Arc::new(UnconfiguredProbe)).await;

    let mut sub = state.bus.subscribe("session.start").await;
    let token = sign_live_token(&state, SERVICE_REF, "corr-intent-001");
    let body = live_start_body("corr-intent-001", &token);

    let first = server
        .post("/api/v3/intents")
        .authorization_bearer(TEST_TOKEN)
        .json(&body)
        .await;
    assert_eq!(first.status_code(), StatusCode::ACCEPTED);
    let first_json: Value = first.json();
    assert_eq!(first_json["status"], "accepted");
    let session_id = first_json["sessionId"].as_str().unwrap().to_string();

    let second = server
        .post("/api/v3/intents")
        .authorization_bearer(TEST_TOKEN)
        .json(&body)
        .await;
    assert_eq!(second.status_code(), StatusCode::ACCEPTED);
    let second_json: Value = second.json();
    assert_eq!(second_json["status"], "idempotent_replay");
    assert_eq!(second_json["sessionId"], session_id);

    let active = state.store.list_active().await.unwrap();
    assert_eq!(active.iter().filter(|s| s.session_id == session_id).count(), 1);

    assert!(sub.receiver.try_recv().is_ok(), "expected exactly one session.start event");
    assert!(sub.receiver.try_recv().is_err(), "expected no second session.start event");
}

/// Scenario 2: admission denies with no tuners configured.
#[tokio::test]
async fn no_tuners_denies_admission_with_no_session_created() {
    let tmp = TempDir::new().unwrap();
    let mut config = base_config(&tmp);
    config.engine.tuner_slots = Vec::new();
    let (server, state) = server_for(config, Arc::new(UnconfiguredProbe)).await;

    let token = sign_live_token(&state, SERVICE_REF, "corr-intent-002");
    let body = live_start_body("corr-intent-002", &token);

    let response = server
        .post("/api/v3/intents")
        .authorization_bearer(TEST_TOKEN)
        .json(&body)
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
    let problem: Value = response.json();
    assert_eq!(problem["code"], "NO_TUNERS");

    let active = state.store.list_active().await.unwrap();
    assert!(active.is_empty());
}

/// Scenario 3: admission denies with sessions full, carrying `Retry-After: 5`.
#[tokio::test]
async fn sessions_full_denies_admission_with_retry_after_5() {
    let tmp = TempDir::new().unwrap();
    let mut config = base_config(&tmp);
    config.engine.tuner_slots = (0..20).collect();
    config.limits.max_sessions = 10;
    let (server, state) = server_for(config, Arc::new(UnconfiguredProbe)).await;

    for i in 0..10 {
        state.store.put(occupying_session(&format!("filler-{i}"))).await.unwrap();
    }

    let token = sign_live_token(&state, SERVICE_REF, "corr-intent-003");
    let body = live_start_body("corr-intent-003", &token);

    let response = server
        .post("/api/v3/intents")
        .authorization_bearer(TEST_TOKEN)
        .json(&body)
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let problem: Value = response.json();
    assert_eq!(problem["code"], "SESSIONS_FULL");
    assert_eq!(response.headers().get("retry-after").unwrap(), "5");
}

/// Scenario 4: ranged read of a session artifact. This route requires a
/// session cookie (not a bearer token) per `auth::requires_cookie_source`.
#[tokio::test]
async fn range_request_on_init_mp4_returns_206_with_content_range() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(&tmp);
    let (server, state) = server_for(config, Arc::new(UnconfiguredProbe)).await;

    state.hls_manager.write("sess-1/init.mp4", b"abcdef").await.unwrap();

    let response = server
        .get("/api/v3/sessions/sess-1/hls/init.mp4")
        .add_cookie(Cookie::new("xg2g_session", TEST_TOKEN))
        .add_header(axum::http::header::RANGE, HeaderValue::from_static("bytes=0-1"))
        .await;

    assert_eq!(response.status_code(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers().get("content-range").unwrap(), "bytes 0-1/6");
    assert_eq!(response.text(), "ab");
}

/// Scenario 5: a VOD playlist (EXTM3U, two 10s segments, EXT-X-ENDLIST,
/// no PDT) is seekable with a 20s DVR window and no start time.
#[tokio::test]
async fn vod_playlist_without_pdt_is_seekable_with_total_duration() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(&tmp);
    let probe: Arc<dyn Probe> = Arc::new(FixedProbe { duration_seconds: 20.0 });
    let (server, state) = server_for(config, probe).await;

    let service_ref = "rec-vod-1";
    let recording_id = URL_SAFE_NO_PAD.encode(service_ref.as_bytes());
    let playlist = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nseg0.ts\n#EXTINF:10.0,\nseg1.ts\n#EXT-X-ENDLIST\n";
    state
        .recordings_manager
        .write(format!("{recording_id}/playlist.m3u8"), playlist)
        .await
        .unwrap();

    let response = server
        .get(&format!("/api/v3/recordings/{recording_id}/stream-info"))
        .authorization_bearer(TEST_TOKEN)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let info: Value = response.json();
    assert_eq!(info["isSeekable"], true);
    assert_eq!(info["dvrWindowSeconds"], 20.0);
    assert!(info["startUnix"].is_null());
}

/// Scenario 6: the same playlist shape without EXT-X-ENDLIST and missing
/// PDT on the second segment is not seekable.
#[tokio::test]
async fn live_playlist_without_endlist_and_missing_pdt_is_not_seekable() {
    let tmp = TempDir::new().unwrap();
    let config = base_config(&tmp);
    let probe: Arc<dyn Probe> = Arc::new(FixedProbe { duration_seconds: 20.0 });
    let (server, state) = server_for(config, probe).await;

    let service_ref = "rec-live-1";
    let recording_id = URL_SAFE_NO_PAD.encode(service_ref.as_bytes());
    let playlist = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00Z\n#EXTINF:10.0,\nseg0.ts\n#EXTINF:10.0,\nseg1.ts\n";
    state
        .recordings_manager
        .write(format!("{recording_id}/playlist.m3u8"), playlist)
        .await
        .unwrap();

    let response = server
        .get(&format!("/api/v3/recordings/{recording_id}/stream-info"))
        .authorization_bearer(TEST_TOKEN)
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let info: Value = response.json();
    assert_eq!(info["isSeekable"], false);
    assert!(info["startUnix"].is_null());
    assert!(info["liveEdgeUnix"].is_null());
}
