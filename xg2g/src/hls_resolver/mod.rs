//! HLS artifact / duration resolver (C10): the priority ladder over
//! in-memory cache, library-store persistence, and a single-flight ffprobe.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::{DurationConfidence, DurationSource, MediaTruth};

const TRANSIENT_TTL: Duration = Duration::from_secs(2 * 60);
const NOT_FOUND_TTL: Duration = Duration::from_secs(60 * 60);
const CORRUPT_TTL: Duration = Duration::from_secs(120 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    NotFound,
    Corrupt,
}

impl FailureKind {
    fn ttl(self) -> Duration {
        match self {
            FailureKind::Transient => TRANSIENT_TTL,
            FailureKind::NotFound => NOT_FOUND_TTL,
            FailureKind::Corrupt => CORRUPT_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeInfo {
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub duration_seconds: f64,
    pub local_path: Option<PathBuf>,
}

/// Non-blocking snapshot of a `service_ref`'s resolution state, for callers
/// that must distinguish "not ready yet" (keep polling) from a real failure
/// without joining the single-flight probe themselves (§6's `playlist.m3u8`
/// `503 PREPARING` row).
pub enum Readiness {
    Ready(MediaTruth),
    Preparing,
    Failed(AppError),
}

#[derive(Debug, Clone)]
pub enum ProbeError {
    Transient(String),
    NotFound(String),
    Corrupt(String),
}

impl ProbeError {
    fn kind(&self) -> FailureKind {
        match self {
            ProbeError::Transient(_) => FailureKind::Transient,
            ProbeError::NotFound(_) => FailureKind::NotFound,
            ProbeError::Corrupt(_) => FailureKind::Corrupt,
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn probe(&self, service_ref: &str) -> Result<ProbeInfo, ProbeError>;
}

#[async_trait]
pub trait LibraryStore: Send + Sync + 'static {
    async fn get_duration(&self, path: &Path) -> Option<f64>;
    async fn put_duration(&self, path: &Path, duration: f64);
}

#[derive(Default)]
pub struct NullLibraryStore;

#[async_trait]
impl LibraryStore for NullLibraryStore {
    async fn get_duration(&self, _path: &Path) -> Option<f64> {
        None
    }
    async fn put_duration(&self, _path: &Path, _duration: f64) {}
}

struct NegativeEntry {
    kind: FailureKind,
    failed_at: Instant,
}

enum CacheEntry {
    Ready(MediaTruth),
    Failed(NegativeEntry),
}

type FlightResult = Arc<Result<MediaTruth, ProbeError>>;

struct Flight {
    waiters: AtomicUsize,
    token: CancellationToken,
    tx: watch::Sender<Option<FlightResult>>,
}

pub struct HlsResolver<P: Probe> {
    cache: DashMap<String, CacheEntry>,
    flights: DashMap<String, Arc<Flight>>,
    probe: Arc<P>,
    library_store: Arc<dyn LibraryStore>,
    library_roots: Vec<PathBuf>,
}

/// Decodes `recordingID` (base64url of the receiver's `serviceRef` bytes),
/// owned exclusively by this component (§4.8: handlers must not pre-decode).
pub fn decode_recording_id(recording_id: &str) -> Result<String, AppError> {
    if recording_id.is_empty() {
        return Err(AppError::InvalidInput {
            code: "INVALID_INPUT",
            detail: "recordingID must not be empty".into(),
        });
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(recording_id)
        .map_err(|_| AppError::InvalidInput { code: "INVALID_INPUT", detail: "recordingID is not valid base64url".into() })?;
    String::from_utf8(bytes).map_err(|_| AppError::InvalidInput {
        code: "INVALID_INPUT",
        detail: "recordingID does not decode to valid UTF-8".into(),
    })
}

impl<P: Probe> HlsResolver<P> {
    pub fn new(probe: Arc<P>, library_store: Arc<dyn LibraryStore>, library_roots: Vec<PathBuf>) -> Self {
        Self {
            cache: DashMap::new(),
            flights: DashMap::new(),
            probe,
            library_store,
            library_roots,
        }
    }

    /// Resolves `service_ref`'s media truth, per the priority ladder in §4.8.
    /// `intent` distinguishes concurrent callers that want the same
    /// `service_ref` for different purposes (e.g. stream-info vs preflight),
    /// each joining its own single flight.
    pub async fn resolve(&self, service_ref: &str, intent: &str) -> Result<MediaTruth, AppError> {
        let flight_key = format!("{service_ref}|{intent}");

        if let Some(truth) = self.cache_hit(service_ref) {
            return Ok(truth);
        }

        let (flight, is_leader) = self.join_or_start_flight(flight_key.clone(), service_ref.to_string());
        flight.waiters.fetch_add(1, Ordering::SeqCst);

        let result = self.await_flight(&flight).await;

        let remaining = flight.waiters.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            flight.token.cancel();
            self.flights.remove(&flight_key);
        }
        let _ = is_leader;

        match result {
            Ok(truth) => {
                self.write_through(service_ref, &truth, None).await;
                Ok(truth)
            }
            Err(probe_err) => {
                self.record_failure(service_ref, &probe_err);
                Err(probe_error_to_app_error(probe_err))
            }
        }
    }

    /// Checks the cache and negative cache only, without joining or starting
    /// a probe flight. Callers that get back `Preparing` should `resolve` in
    /// the background to warm the cache and return a `PREPARING` response
    /// immediately rather than block the request on the probe.
    pub fn peek(&self, service_ref: &str) -> Readiness {
        if let Some(truth) = self.cache_hit(service_ref) {
            return Readiness::Ready(truth);
        }
        if let Some(err) = self.negative_cache_hit(service_ref) {
            return Readiness::Failed(probe_error_to_app_error(err));
        }
        Readiness::Preparing
    }

    fn cache_hit(&self, service_ref: &str) -> Option<MediaTruth> {
        match self.cache.get(service_ref)?.value() {
            CacheEntry::Ready(truth) => Some(truth.clone()),
            CacheEntry::Failed(_) => None,
        }
    }

    /// Returns `Some(error)` if a still-valid negative cache entry exists.
    fn negative_cache_hit(&self, service_ref: &str) -> Option<ProbeError> {
        let entry = self.cache.get(service_ref)?;
        match entry.value() {
            CacheEntry::Failed(neg) if neg.failed_at.elapsed() < neg.kind.ttl() => Some(match neg.kind {
                FailureKind::Transient => ProbeError::Transient("cached".into()),
                FailureKind::NotFound => ProbeError::NotFound("cached".into()),
                FailureKind::Corrupt => ProbeError::Corrupt("cached".into()),
            }),
            _ => None,
        }
    }

    fn join_or_start_flight(&self, flight_key: String, service_ref: String) -> (Arc<Flight>, bool) {
        if let Some(existing) = self.flights.get(&flight_key) {
            return (existing.clone(), false);
        }

        let (tx, _rx) = watch::channel(None);
        let flight = Arc::new(Flight {
            waiters: AtomicUsize::new(0),
            token: CancellationToken::new(),
            tx,
        });

        let entry = self
            .flights
            .entry(flight_key)
            .or_insert_with(|| flight.clone());
        let is_leader = Arc::ptr_eq(&entry, &flight);

        if is_leader {
            if let Some(cached) = self.negative_cache_hit(&service_ref) {
                let _ = entry.tx.send(Some(Arc::new(Err(cached))));
            } else {
                self.spawn_probe(service_ref, entry.clone());
            }
        }

        (entry.clone(), is_leader)
    }

    fn spawn_probe(&self, service_ref: String, flight: Arc<Flight>) {
        let probe = self.probe.clone();
        let token = flight.token.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(service_ref, "hls resolver: single-flight probe cancelled, no waiters remain");
                    return;
                }
                result = probe.probe(&service_ref) => result,
            };
            let truth = outcome.and_then(probe_info_to_truth);
            let _ = flight.tx.send(Some(Arc::new(truth)));
        });
    }

    async fn await_flight(&self, flight: &Arc<Flight>) -> Result<MediaTruth, ProbeError> {
        let mut rx = flight.tx.subscribe();
        loop {
            if let Some(result) = rx.borrow().clone() {
                return (*result).clone();
            }
            if rx.changed().await.is_err() {
                return Err(ProbeError::Transient("probe task ended without a result".into()));
            }
        }
    }

    fn record_failure(&self, service_ref: &str, err: &ProbeError) {
        self.cache.insert(
            service_ref.to_string(),
            CacheEntry::Failed(NegativeEntry {
                kind: err.kind(),
                failed_at: Instant::now(),
            }),
        );
    }

    /// Write-through on probe success: updates the in-memory cache and, when
    /// the local path falls under a configured library root (longest-prefix
    /// match), persists duration to the library store.
    async fn write_through(&self, service_ref: &str, truth: &MediaTruth, local_path: Option<&Path>) {
        self.cache.insert(service_ref.to_string(), CacheEntry::Ready(truth.clone()));

        if let Some(path) = local_path {
            if let Some(root) = self.longest_matching_root(path) {
                debug!(root = %root.display(), "hls resolver: persisting duration to library store");
                self.library_store.put_duration(path, truth.duration).await;
            }
        }
    }

    fn longest_matching_root<'a>(&'a self, path: &Path) -> Option<&'a PathBuf> {
        self.library_roots
            .iter()
            .filter(|root| path.starts_with(root))
            .max_by_key(|root| root.as_os_str().len())
    }
}

fn probe_info_to_truth(info: ProbeInfo) -> Result<MediaTruth, ProbeError> {
    let duration = info.duration_seconds.round();
    if duration <= 0.0 {
        return Err(ProbeError::Corrupt("probe reported non-positive duration".into()));
    }
    Ok(MediaTruth {
        container: info.container,
        video_codec: info.video_codec,
        audio_codec: info.audio_codec,
        duration,
        duration_source: DurationSource::Metadata,
        duration_confidence: DurationConfidence::High,
        duration_reasons: Vec::new(),
    })
}

fn probe_error_to_app_error(err: ProbeError) -> AppError {
    match err {
        ProbeError::Transient(detail) => AppError::BadGateway { code: "PROBE_TRANSIENT", detail },
        ProbeError::NotFound(detail) => AppError::NotFound { code: "PROBE_NOT_FOUND", detail },
        ProbeError::Corrupt(detail) => AppError::Unsupported { code: "PROBE_CORRUPT", detail },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingProbe {
        calls: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl Probe for CountingProbe {
        async fn probe(&self, _service_ref: &str) -> Result<ProbeInfo, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(ProbeInfo {
                container: "mp4".into(),
                video_codec: "h264".into(),
                audio_codec: "aac".into(),
                duration_seconds: 42.0,
                local_path: None,
            })
        }
    }

    fn resolver_with(probe: CountingProbe) -> HlsResolver<CountingProbe> {
        HlsResolver::new(Arc::new(probe), Arc::new(NullLibraryStore), Vec::new())
    }

    #[test]
    fn decode_recording_id_rejects_empty() {
        assert!(decode_recording_id("").is_err());
    }

    #[test]
    fn decode_recording_id_round_trips() {
        let encoded = URL_SAFE_NO_PAD.encode(b"1:0:1:445D:453:1:C00000:0:0:0:");
        let decoded = decode_recording_id(&encoded).unwrap();
        assert_eq!(decoded, "1:0:1:445D:453:1:C00000:0:0:0:");
    }

    #[tokio::test]
    async fn concurrent_callers_join_a_single_probe() {
        let resolver = Arc::new(resolver_with(CountingProbe {
            calls: AtomicU32::new(0),
            delay: Duration::from_millis(50),
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve("ref-1", "stream-info").await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(resolver.probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_hit_avoids_a_second_probe() {
        let resolver = resolver_with(CountingProbe { calls: AtomicU32::new(0), delay: Duration::from_millis(1) });
        resolver.resolve("ref-1", "stream-info").await.unwrap();
        resolver.resolve("ref-1", "stream-info").await.unwrap();
        assert_eq!(resolver.probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn corrupt_failure_is_negatively_cached() {
        struct CorruptProbe(AtomicU32);
        #[async_trait]
        impl Probe for CorruptProbe {
            async fn probe(&self, _service_ref: &str) -> Result<ProbeInfo, ProbeError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(ProbeError::Corrupt("zero duration".into()))
            }
        }
        let resolver = HlsResolver::new(Arc::new(CorruptProbe(AtomicU32::new(0))), Arc::new(NullLibraryStore), Vec::new());

        let first = resolver.resolve("ref-1", "stream-info").await;
        assert!(first.is_err());
        let second = resolver.resolve("ref-1", "stream-info").await;
        assert!(second.is_err());
        assert_eq!(resolver.probe.0.load(Ordering::SeqCst), 1, "second call should hit the negative cache, not re-probe");
    }

    #[tokio::test]
    async fn peek_reports_preparing_before_any_resolve() {
        let resolver = resolver_with(CountingProbe { calls: AtomicU32::new(0), delay: Duration::from_millis(50) });
        assert!(matches!(resolver.peek("ref-1"), Readiness::Preparing));
    }

    #[tokio::test]
    async fn peek_reports_ready_after_resolve() {
        let resolver = resolver_with(CountingProbe { calls: AtomicU32::new(0), delay: Duration::from_millis(1) });
        resolver.resolve("ref-1", "stream-info").await.unwrap();
        assert!(matches!(resolver.peek("ref-1"), Readiness::Ready(_)));
    }

    #[test]
    fn longest_prefix_root_wins() {
        let resolver = resolver_with(CountingProbe { calls: AtomicU32::new(0), delay: Duration::from_millis(1) });
        let roots = vec![PathBuf::from("/media"), PathBuf::from("/media/movies")];
        let resolver = HlsResolver { library_roots: roots, ..resolver };
        let matched = resolver.longest_matching_root(Path::new("/media/movies/foo.mp4")).unwrap();
        assert_eq!(matched, &PathBuf::from("/media/movies"));
    }
}
