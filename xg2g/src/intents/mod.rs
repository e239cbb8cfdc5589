//! Intent handler (C8): orchestrates C2–C7 for `stream.start`/`stream.stop`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;

use crate::admission::{decide, StateCollector};
use crate::attestation::{verify, Keyring};
use crate::auth::Principal;
use crate::config::Config;
use crate::errors::AppError;
use crate::eventbus::{BusEvent, EventBus, SessionStartEvent, SessionStopEvent};
use crate::models::{Mode, PipelineState, Profile, SessionRecord, SessionState};
use crate::session_store::SessionStore;

/// Outcome of a cheap reachability probe against the intent's source,
/// before resources are committed. The probe implementation itself is an
/// external collaborator (the receiver client); only this outcome contract
/// lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightOutcome {
    Ok,
    Unreachable,
    Timeout,
    Unauthorized,
    Forbidden,
    NotFound,
    BadGateway,
    Internal,
}

#[async_trait]
pub trait PreflightProvider: Send + Sync + 'static {
    async fn check(&self, service_ref: &str) -> PreflightOutcome;
}

/// Always succeeds; the default when no external receiver is wired up
/// (local dev, unit tests).
pub struct AlwaysOkPreflight;

#[async_trait]
impl PreflightProvider for AlwaysOkPreflight {
    async fn check(&self, _service_ref: &str) -> PreflightOutcome {
        PreflightOutcome::Ok
    }
}

fn preflight_error(outcome: PreflightOutcome) -> AppError {
    match outcome {
        PreflightOutcome::Ok => unreachable!("Ok is not an error outcome"),
        PreflightOutcome::Unreachable => AppError::BadGateway {
            code: "PREFLIGHT_UNREACHABLE",
            detail: "source is unreachable".into(),
        },
        PreflightOutcome::Timeout => AppError::GatewayTimeout {
            code: "PREFLIGHT_TIMEOUT",
            detail: "source did not respond in time".into(),
        },
        PreflightOutcome::Unauthorized => AppError::TokenInvalid {
            code: "PREFLIGHT_UNAUTHORIZED",
            detail: "source rejected credentials".into(),
        },
        PreflightOutcome::Forbidden => AppError::Forbidden {
            code: "PREFLIGHT_FORBIDDEN",
            detail: "source denied access".into(),
        },
        PreflightOutcome::NotFound => AppError::NotFound {
            code: "PREFLIGHT_NOT_FOUND",
            detail: "source does not exist".into(),
        },
        PreflightOutcome::BadGateway => AppError::BadGateway {
            code: "PREFLIGHT_BAD_GATEWAY",
            detail: "source returned an invalid response".into(),
        },
        PreflightOutcome::Internal => AppError::internal(anyhow::anyhow!("preflight internal error")),
    }
}

/// Scheme/host/port allowlist with a simple DNS-rebind guard: literal IPs in
/// private/loopback ranges are rejected outright rather than resolved.
pub fn validate_outbound(config: &crate::config::OutboundPolicy, raw_url: &str) -> Result<(), AppError> {
    if !config.enabled {
        return Ok(());
    }
    let url = Url::parse(raw_url)
        .map_err(|_| AppError::InvalidInput { code: "INVALID_INPUT", detail: "serviceRef is not a valid URL".into() })?;

    if !config.allow_schemes.iter().any(|s| s == url.scheme()) {
        return Err(AppError::Forbidden { code: "OUTBOUND_SCHEME_DENIED", detail: format!("scheme {} not allowed", url.scheme()) });
    }
    let host = url.host_str().ok_or_else(|| AppError::InvalidInput {
        code: "INVALID_INPUT",
        detail: "URL has no host".into(),
    })?;
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        if ip.is_loopback() || is_private(&ip) {
            return Err(AppError::Forbidden {
                code: "OUTBOUND_HOST_DENIED",
                detail: "target resolves to a private or loopback address".into(),
            });
        }
    }
    if !config.allow_hosts.is_empty() && !config.allow_hosts.iter().any(|h| h == host) {
        return Err(AppError::Forbidden { code: "OUTBOUND_HOST_DENIED", detail: format!("host {host} not allowlisted") });
    }
    if let Some(port) = url.port() {
        if !config.allow_ports.is_empty() && !config.allow_ports.contains(&port) {
            return Err(AppError::Forbidden { code: "OUTBOUND_PORT_DENIED", detail: format!("port {port} not allowlisted") });
        }
    }
    Ok(())
}

fn is_private(ip: &std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
        std::net::IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
    }
}

#[derive(Debug, Deserialize)]
pub struct IntentRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "serviceRef")]
    pub service_ref: String,
    #[serde(default)]
    pub params: IntentParams,
    #[serde(rename = "correlationId", default)]
    pub correlation_id: Option<String>,
    #[serde(rename = "playbackDecisionToken", default)]
    pub playback_decision_token: Option<String>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IntentParams {
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub status: &'static str,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

pub struct IntentHandler<S: SessionStore, B: EventBus> {
    config: Arc<Config>,
    store: Arc<S>,
    bus: Arc<B>,
    keyring: Arc<Keyring>,
    preflight: Arc<dyn PreflightProvider>,
    collector: StateCollector<S>,
}

impl<S: SessionStore, B: EventBus> IntentHandler<S, B> {
    pub fn new(
        config: Arc<Config>,
        store: Arc<S>,
        bus: Arc<B>,
        keyring: Arc<Keyring>,
        preflight: Arc<dyn PreflightProvider>,
    ) -> Self {
        let collector = StateCollector::new(
            store.clone(),
            config.engine.tuner_slots.len(),
            Duration::from_millis(500),
        );
        Self {
            config,
            store,
            bus,
            keyring,
            preflight,
            collector,
        }
    }

    pub async fn handle(&self, principal: &Principal, req: IntentRequest) -> Result<IntentResponse, AppError> {
        // 1. Parse & validate.
        if req.service_ref.trim().is_empty() {
            return Err(AppError::InvalidInput { code: "INVALID_INPUT", detail: "serviceRef must not be empty".into() });
        }
        let service_ref = req.service_ref.trim().to_string();
        if service_ref.starts_with("http://") || service_ref.starts_with("https://") {
            validate_outbound(&self.config.network.outbound, &service_ref)?;
        }

        match req.kind.as_str() {
            "stream.start" => self.handle_start(principal, req, service_ref).await,
            "stream.stop" => self.handle_stop(req).await,
            other => Err(AppError::InvalidInput {
                code: "INVALID_INPUT",
                detail: format!("unknown intent type: {other}"),
            }),
        }
    }

    async fn handle_start(
        &self,
        principal: &Principal,
        req: IntentRequest,
        service_ref: String,
    ) -> Result<IntentResponse, AppError> {
        let mode = req
            .params
            .mode
            .as_deref()
            .and_then(Mode::parse)
            .unwrap_or(Mode::Live);

        // 2. Attestation: required for stream.start in LIVE mode.
        if mode == Mode::Live {
            let token = req.playback_decision_token.as_deref().ok_or_else(|| AppError::TokenMissing {
                code: "TOKEN_MISSING",
                detail: "playbackDecisionToken is required for LIVE stream.start".into(),
            })?;
            verify(&self.keyring, token, &service_ref, mode.as_str())?;
        }

        // 3. Preflight.
        let outcome = self.preflight.check(&service_ref).await;
        if outcome != PreflightOutcome::Ok {
            return Err(preflight_error(outcome));
        }

        // 4. Admission.
        let snapshot = self.collector.snapshot().await;
        let profile = Profile::default();
        let decision = decide(&self.config, profile.transcodes_video, snapshot);
        if !decision.allow {
            return Err(AppError::Unavailable {
                code: decision.code,
                detail: format!("admission denied: {}", decision.code),
                retry_after_seconds: Some(decision.retry_after_seconds),
            });
        }

        // 5. Lease across configured tuner slots.
        let session_id = uuid::Uuid::new_v4().to_string();
        let mut acquired_key = None;
        for slot in &self.config.engine.tuner_slots {
            let key = format!("tuner-slot:{slot}");
            let (_, acquired) = self
                .store
                .try_acquire_lease(&key, &session_id, self.config.limits.lease_ttl)
                .await
                .map_err(|e| AppError::internal(anyhow::anyhow!(e.to_string())))?;
            if acquired {
                acquired_key = Some(key);
                break;
            }
        }
        let Some(lease_key) = acquired_key else {
            return Err(AppError::Unavailable {
                code: "NO_TUNERS",
                detail: "every configured tuner slot is leased".into(),
                retry_after_seconds: None,
            });
        };

        // 6. Idempotent persist.
        let now = Utc::now();
        let mut context_data = std::collections::HashMap::new();
        context_data.insert("mode".to_string(), serde_json::json!(mode.as_str()));
        let session = SessionRecord {
            session_id: session_id.clone(),
            correlation_id: req.correlation_id.clone(),
            service_ref: service_ref.clone(),
            profile,
            context_data,
            created_at_unix: now.timestamp(),
            updated_at_unix: now.timestamp(),
            last_access_unix: now.timestamp(),
            playlist_published_at: None,
            latest_segment_at: None,
            last_playlist_access_at: None,
            fallback_at_unix: None,
            fallback_reason: None,
            state: SessionState::Starting,
            pipeline_state: PipelineState::Unknown,
            reason: None,
            reason_detail: None,
        };

        let idempotency_key = idempotency_key(&principal.id, &service_ref, mode.as_str(), req.correlation_id.as_deref());
        let (stored_id, replayed) = self
            .store
            .put_session_with_idempotency(session, idempotency_key, Duration::from_secs(300))
            .await
            .map_err(|e| AppError::internal(anyhow::anyhow!(e.to_string())))?;

        if replayed {
            let _ = self.store.release_lease(&lease_key, &session_id).await;
            return Ok(IntentResponse {
                session_id: stored_id,
                status: "idempotent_replay",
                correlation_id: req.correlation_id,
            });
        }

        // 7. Publish.
        self.bus
            .publish(
                "session.start",
                BusEvent::SessionStart(SessionStartEvent {
                    session_id: stored_id.clone(),
                    service_ref,
                    correlation_id: req.correlation_id.clone(),
                    requested_at_unix: now.timestamp(),
                }),
            )
            .await;

        // 8. Respond.
        Ok(IntentResponse {
            session_id: stored_id,
            status: "accepted",
            correlation_id: req.correlation_id,
        })
    }

    async fn handle_stop(&self, req: IntentRequest) -> Result<IntentResponse, AppError> {
        let session_id = req.session_id.ok_or_else(|| AppError::InvalidInput {
            code: "INVALID_INPUT",
            detail: "sessionId is required for stream.stop".into(),
        })?;
        if !crate::models::is_safe_id(&session_id) {
            return Err(AppError::InvalidInput { code: "INVALID_INPUT", detail: "sessionId has an unsafe shape".into() });
        }

        let updated = self
            .store
            .update_session(&session_id, Box::new(|s| s.state = SessionState::Draining))
            .await
            .map_err(|e| AppError::internal(anyhow::anyhow!(e.to_string())))?;

        let Some(_session) = updated else {
            return Err(AppError::NotFound { code: "NOT_FOUND", detail: "session does not exist".into() });
        };

        self.bus
            .publish(
                "session.stop",
                BusEvent::SessionStop(SessionStopEvent {
                    session_id: session_id.clone(),
                    requested_at_unix: Utc::now().timestamp(),
                }),
            )
            .await;

        Ok(IntentResponse {
            session_id,
            status: "accepted",
            correlation_id: req.correlation_id,
        })
    }
}

/// `hash(principal|serviceRef|mode|correlationId?)` per §4.6 step 6.
fn idempotency_key(principal_id: &str, service_ref: &str, mode: &str, correlation_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(principal_id.as_bytes());
    hasher.update(b"|");
    hasher.update(service_ref.as_bytes());
    hasher.update(b"|");
    hasher.update(mode.as_bytes());
    hasher.update(b"|");
    hasher.update(correlation_id.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}
