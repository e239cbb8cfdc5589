//! Live-playback SLO tracker (C13): per-session TTFF and rebuffer
//! observations, keyed by session ID, lock-free via `dashmap`.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

const MAJOR_REBUFFER_THRESHOLD: Duration = Duration::from_secs(24);
const MINOR_REBUFFER_THRESHOLD: Duration = Duration::from_secs(12);
const IDLE_PRUNE_AFTER: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Live,
    Recording,
}

impl Schema {
    fn label(self) -> &'static str {
        match self {
            Schema::Live => "live",
            Schema::Recording => "recording",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Hls,
    NativeHls,
    HlsJs,
    Mp4,
    Unknown,
}

impl PlaybackMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "hls" => PlaybackMode::Hls,
            "native_hls" => PlaybackMode::NativeHls,
            "hlsjs" => PlaybackMode::HlsJs,
            "mp4" => PlaybackMode::Mp4,
            _ => PlaybackMode::Unknown,
        }
    }

    fn label(self) -> &'static str {
        match self {
            PlaybackMode::Hls => "hls",
            PlaybackMode::NativeHls => "native_hls",
            PlaybackMode::HlsJs => "hlsjs",
            PlaybackMode::Mp4 => "mp4",
            PlaybackMode::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionMeta {
    pub schema: Schema,
    pub mode: PlaybackMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebufferSeverity {
    Minor,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Failed,
    Abandoned,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Failed => "failed",
            Outcome::Abandoned => "abandoned",
        }
    }
}

struct Entry {
    meta: SessionMeta,
    started_at: Instant,
    first_media: Option<Instant>,
    last_media: Option<Instant>,
    last_touched: Instant,
}

#[derive(Default)]
pub struct SloTracker {
    sessions: DashMap<String, Entry>,
    counters: crate::metrics::Counters,
}

impl SloTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// First call records `startedAt`; repeated calls are idempotent.
    pub fn start(&self, session_id: &str, meta: SessionMeta) {
        let now = Instant::now();
        let inserted = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Entry {
                meta,
                started_at: now,
                first_media: None,
                last_media: None,
                last_touched: now,
            });
        if inserted.started_at == now {
            self.counters
                .increment("playback_start_total", &[meta.schema.label(), meta.mode.label()]);
        }
    }

    pub fn mark_media_success(&self, session_id: &str) -> Option<RebufferSeverity> {
        let now = Instant::now();
        let mut entry = self.sessions.get_mut(session_id)?;
        entry.last_touched = now;

        if entry.first_media.is_none() {
            entry.first_media = Some(now);
            entry.last_media = Some(now);
            let ttff = now.duration_since(entry.started_at);
            self.counters.observe(
                "playback_ttff_seconds",
                &[entry.meta.schema.label(), entry.meta.mode.label(), "ok"],
                ttff.as_secs_f64(),
            );
            return None;
        }

        let severity = entry.last_media.map(|last| {
            let gap = now.duration_since(last);
            if gap >= MAJOR_REBUFFER_THRESHOLD {
                Some(RebufferSeverity::Major)
            } else if gap >= MINOR_REBUFFER_THRESHOLD {
                Some(RebufferSeverity::Minor)
            } else {
                None
            }
        }).flatten();

        entry.last_media = Some(now);

        if let Some(severity) = severity {
            let label = match severity {
                RebufferSeverity::Major => "major",
                RebufferSeverity::Minor => "minor",
            };
            self.counters
                .increment("playback_rebuffer_total", &[entry.meta.schema.label(), entry.meta.mode.label(), label]);
        }
        severity
    }

    /// Final resolution: removes the session, observing TTFF with the given
    /// outcome if media was never successfully delivered.
    pub fn mark_outcome(&self, session_id: &str, outcome: Outcome) {
        if let Some((_, entry)) = self.sessions.remove(session_id) {
            if entry.first_media.is_none() {
                let ttff = Instant::now().duration_since(entry.started_at);
                self.counters.observe(
                    "playback_ttff_seconds",
                    &[entry.meta.schema.label(), entry.meta.mode.label(), outcome.label()],
                    ttff.as_secs_f64(),
                );
            }
        }
    }

    /// Removes sessions untouched for longer than the idle window.
    pub fn prune_idle(&self) {
        let now = Instant::now();
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| now.duration_since(e.last_touched) > IDLE_PRUNE_AFTER)
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            debug!(session_id = %key, "slo tracker: pruning idle session");
            self.sessions.remove(&key);
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}
