//! Shared domain value types (§3 DATA MODEL).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `sessionID` must match this alphabet: no path separators, no `.`
/// sequences — it is embedded directly into on-disk HLS paths.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !id.contains("..")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Live,
    Recording,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LIVE" => Some(Mode::Live),
            "RECORDING" => Some(Mode::Recording),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "LIVE",
            Mode::Recording => "RECORDING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    Idle,
    Starting,
    Priming,
    Ready,
    Draining,
    Stopping,
    Stopped,
    Failed,
    Cancelled,
}

impl SessionState {
    /// Terminal states are absorbing (§3 invariants).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Stopped | SessionState::Failed | SessionState::Cancelled
        )
    }

    /// A session occupies a resource slot while it is anywhere between
    /// admission and drain (§4.5 state collector).
    pub fn is_resource_occupying(&self) -> bool {
        !self.is_terminal() && !matches!(self, SessionState::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum PipelineState {
    #[default]
    Unknown,
    Preparing,
    Serving,
    Draining,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub deinterlace: bool,
    #[serde(default)]
    pub hwaccel: Option<String>,
    #[serde(default)]
    pub crf: Option<u8>,
    #[serde(default)]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub dvr_window_sec: i64,
    /// Whether this profile asks the pipeline to transcode video, relevant
    /// to the admission controller's `TRANSCODES_FULL` check (§4.5).
    #[serde(default)]
    pub transcodes_video: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            codec: None,
            container: None,
            deinterlace: false,
            hwaccel: None,
            crf: None,
            max_width: None,
            preset: None,
            dvr_window_sec: 0,
            transcodes_video: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub service_ref: String,
    pub profile: Profile,
    #[serde(default)]
    pub context_data: HashMap<String, Value>,

    pub created_at_unix: i64,
    pub updated_at_unix: i64,
    pub last_access_unix: i64,
    #[serde(default)]
    pub playlist_published_at: Option<i64>,
    #[serde(default)]
    pub latest_segment_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_playlist_access_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fallback_at_unix: Option<i64>,
    #[serde(default)]
    pub fallback_reason: Option<String>,

    pub state: SessionState,
    #[serde(default)]
    pub pipeline_state: PipelineState,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reason_detail: Option<String>,
}

impl SessionRecord {
    pub fn mode(&self) -> Option<Mode> {
        self.context_data
            .get("mode")
            .and_then(Value::as_str)
            .and_then(Mode::parse)
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.context_data.get("client_ip").and_then(Value::as_str)
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.context_data
            .get("duration_seconds")
            .and_then(Value::as_i64)
    }
}

/// Admission snapshot (§3, §4.5). `-1` in any field means "unknown, fail
/// closed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeState {
    pub tuner_slots_available: i64,
    pub sessions_active: i64,
    pub transcodes_active: i64,
}

impl RuntimeState {
    pub const UNKNOWN: RuntimeState = RuntimeState {
        tuner_slots_available: -1,
        sessions_active: -1,
        transcodes_active: -1,
    };

    pub fn is_unknown(&self) -> bool {
        self.tuner_slots_available < 0 || self.sessions_active < 0 || self.transcodes_active < 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allow: bool,
    pub code: &'static str,
    pub retry_after_seconds: u64,
}

impl AdmissionDecision {
    pub fn allowed() -> Self {
        Self {
            allow: true,
            code: "OK",
            retry_after_seconds: 0,
        }
    }

    pub fn denied(code: &'static str, retry_after_seconds: u64) -> Self {
        Self {
            allow: false,
            code,
            retry_after_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackDecisionClaims {
    #[serde(default)]
    pub sub: Option<String>,
    pub service_ref: String,
    pub mode: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct PlaybackArtifact {
    pub data: Option<Vec<u8>>,
    pub abs_path: Option<std::path::PathBuf>,
    pub content_type: &'static str,
    pub cache_control: &'static str,
    pub mod_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSource {
    Metadata,
    Cache,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationConfidence {
    High,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaTruth {
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub duration: f64,
    pub duration_source: DurationSource,
    pub duration_confidence: DurationConfidence,
    pub duration_reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentTruth {
    pub is_vod: bool,
    pub has_pdt: bool,
    pub first_pdt: Option<DateTime<Utc>>,
    pub last_pdt: Option<DateTime<Utc>>,
    pub last_duration: f64,
    pub total_duration: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_id_rejects_traversal_and_dots() {
        assert!(is_safe_id("a1b2c3"));
        assert!(!is_safe_id("../etc/passwd"));
        assert!(!is_safe_id("foo..bar"));
        assert!(!is_safe_id(""));
        assert!(!is_safe_id("has/slash"));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        assert!(SessionState::Stopped.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Ready.is_terminal());
    }
}
