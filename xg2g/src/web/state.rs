//! Application state: the wiring point for every component (C1–C14).

use std::sync::Arc;

use async_trait::async_trait;
use sandboxed_file_manager::SandboxedManager;

use crate::attestation::Keyring;
use crate::authz::ScopePolicy;
use crate::config::Config;
use crate::eventbus::InMemoryEventBus;
use crate::hls_resolver::{HlsResolver, NullLibraryStore, Probe, ProbeError, ProbeInfo};
use crate::intents::{AlwaysOkPreflight, IntentHandler};
use crate::metrics::Counters;
use crate::session_store::InMemorySessionStore;
use crate::slo::SloTracker;

pub type Store = InMemorySessionStore;
pub type Bus = InMemoryEventBus;

/// ffprobe invocation is an external collaborator (§ non-goals); this stub
/// always reports the recording absent so the resolver's cache and
/// single-flight machinery can be exercised end-to-end without a real
/// transcoder attached.
pub struct UnconfiguredProbe;

#[async_trait]
impl Probe for UnconfiguredProbe {
    async fn probe(&self, service_ref: &str) -> Result<ProbeInfo, ProbeError> {
        Err(ProbeError::NotFound(format!("no probe backend configured for {service_ref}")))
    }
}

/// Object-safe so production (`UnconfiguredProbe`, eventually a real ffprobe
/// backend) and tests (a fixed-response stub) are swappable without a
/// generic parameter threaded through `AppState` (§9: "pass as values").
#[async_trait]
impl Probe for Arc<dyn Probe> {
    async fn probe(&self, service_ref: &str) -> Result<ProbeInfo, ProbeError> {
        (**self).probe(service_ref).await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub bus: Arc<Bus>,
    pub keyring: Arc<Keyring>,
    pub intents: Arc<IntentHandler<Store, Bus>>,
    pub resolver: Arc<HlsResolver<Arc<dyn Probe>>>,
    pub scope_policy: Arc<ScopePolicy>,
    pub slo: Arc<SloTracker>,
    pub metrics: Arc<Counters>,
    pub hls_manager: Arc<SandboxedManager>,
    pub recordings_manager: Arc<SandboxedManager>,
}

impl AppState {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        Self::build_with_probe(config, Arc::new(UnconfiguredProbe)).await
    }

    /// Same wiring as [`AppState::build`], but with the resolver's probe
    /// backend supplied by the caller — the seam integration tests use to
    /// exercise the real router against a probe that actually succeeds,
    /// rather than `UnconfiguredProbe`'s always-`NotFound` stub.
    pub async fn build_with_probe(config: Config, probe: Arc<dyn Probe>) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let store = InMemorySessionStore::new();
        let bus = InMemoryEventBus::new();
        let keyring = Arc::new(Keyring::from_config(&config.playback_decision));

        let intents = Arc::new(IntentHandler::new(
            config.clone(),
            store.clone(),
            bus.clone(),
            keyring.clone(),
            Arc::new(AlwaysOkPreflight),
        ));

        let resolver = Arc::new(HlsResolver::new(
            probe,
            Arc::new(NullLibraryStore),
            config.hls.library_roots.clone(),
        ));

        let entries = crate::authz::default_policy_entries();
        let ops: Vec<&'static str> = entries.iter().map(|(op, _)| *op).collect();
        let scope_policy = Arc::new(
            ScopePolicy::build(&entries, &ops)
                .map_err(|missing| anyhow::anyhow!("unmapped operations in scope policy: {missing:?}"))?,
        );

        let hls_manager = Arc::new(
            SandboxedManager::builder()
                .base_directory(config.hls.root.join("sessions"))
                .build()
                .await?,
        );
        let recordings_manager = Arc::new(
            SandboxedManager::builder()
                .base_directory(config.hls.root.join("recordings"))
                .build()
                .await?,
        );

        Ok(Self {
            config,
            store,
            bus,
            keyring,
            intents,
            resolver,
            scope_policy,
            slo: Arc::new(SloTracker::new()),
            metrics: Arc::new(Counters::new()),
            hls_manager,
            recordings_manager,
        })
    }
}
