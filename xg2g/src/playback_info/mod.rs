//! Recording playback-info composer (C11): resolves media truth via C10,
//! extracts segment truth from the HLS playlist, and applies the
//! seekability policy.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{DurationConfidence, DurationSource, MediaTruth, SegmentTruth};

/// Parses `EXTM3U`/`EXTINF`/`EXT-X-PROGRAM-DATE-TIME`/`EXT-X-ENDLIST` out of
/// playlist text. Any parse error fails closed: callers must treat `Err` as
/// non-seekable with unix fields cleared (§4.9 step 2).
pub fn extract_segment_truth(playlist_text: &str) -> Result<SegmentTruth, AppError> {
    use m3u8_rs::Playlist;

    let bytes = playlist_text.as_bytes();
    let playlist = m3u8_rs::parse_playlist_res(bytes).map_err(|_| AppError::Unsupported {
        code: "PLAYLIST_PARSE_FAILED",
        detail: "playlist did not parse as a valid m3u8 media playlist".into(),
    })?;

    let media = match playlist {
        Playlist::MediaPlaylist(media) => media,
        Playlist::MasterPlaylist(_) => {
            return Err(AppError::Unsupported {
                code: "PLAYLIST_PARSE_FAILED",
                detail: "expected a media playlist, got a master playlist".into(),
            })
        }
    };

    let mut first_pdt = None;
    let mut last_pdt = None;
    let mut total_duration = 0.0;
    let mut last_duration = 0.0;

    for segment in &media.segments {
        total_duration += segment.duration as f64;
        last_duration = segment.duration as f64;
        if let Some(pdt) = &segment.program_date_time {
            let ts: DateTime<Utc> = DateTime::from(pdt.date_time);
            if first_pdt.is_none() {
                first_pdt = Some(ts);
            }
            last_pdt = Some(ts);
        }
    }

    let has_pdt = first_pdt.is_some() && last_pdt.is_some();

    Ok(SegmentTruth {
        is_vod: media.end_list,
        has_pdt,
        first_pdt,
        last_pdt,
        last_duration,
        total_duration,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybackInfo {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "isSeekable")]
    pub is_seekable: bool,
    #[serde(rename = "dvrWindowSeconds", skip_serializing_if = "Option::is_none")]
    pub dvr_window_seconds: Option<f64>,
    #[serde(rename = "startUnix", skip_serializing_if = "Option::is_none")]
    pub start_unix: Option<i64>,
    #[serde(rename = "liveEdgeUnix", skip_serializing_if = "Option::is_none")]
    pub live_edge_unix: Option<i64>,
    #[serde(rename = "durationSource")]
    pub duration_source: DurationSource,
    #[serde(rename = "durationConfidence")]
    pub duration_confidence: DurationConfidence,
    #[serde(rename = "durationReasons")]
    pub duration_reasons: Vec<String>,
    #[serde(rename = "playbackDecisionToken", skip_serializing_if = "Option::is_none")]
    pub playback_decision_token: Option<String>,
}

/// Builds the composed `PlaybackInfo` per §4.9 steps 3–5. `playback_decision_token`
/// is only set by the live preview path (C11 has no token to mint for recordings).
pub fn compose(
    recording_id: &str,
    request_id: &str,
    media: &MediaTruth,
    segments: Option<&SegmentTruth>,
    resume_position_seconds: Option<f64>,
    playback_decision_token: Option<String>,
) -> PlaybackInfo {
    let mut duration_reasons = media.duration_reasons.clone();

    let (is_seekable, dvr_window_seconds, start_unix, live_edge_unix) = match segments {
        None => (false, None, None, None),
        Some(seg) if seg.is_vod => (true, Some(seg.total_duration), None, None),
        Some(seg) if seg.has_pdt => {
            if let (Some(first), Some(last)) = (seg.first_pdt, seg.last_pdt) {
                if last >= first {
                    let live_edge = last + chrono::Duration::milliseconds((seg.last_duration * 1000.0) as i64);
                    let window = (live_edge - first).num_seconds() as f64;
                    if window > 0.0 {
                        (true, Some(window), Some(first.timestamp()), Some(live_edge.timestamp()))
                    } else {
                        (false, None, None, None)
                    }
                } else {
                    (false, None, None, None)
                }
            } else {
                (false, None, None, None)
            }
        }
        Some(_) => (false, None, None, None),
    };

    if let Some(resume) = resume_position_seconds {
        if media.duration > 0.0 && resume > media.duration {
            duration_reasons.push("RESUME_CLAMPED_TO_DURATION".to_string());
        }
    }
    if !is_seekable && media.duration <= 0.0 {
        duration_reasons.push("DURATION_UNKNOWN_DENIED_SEEK".to_string());
    }

    PlaybackInfo {
        session_id: format!("rec:{recording_id}"),
        request_id: request_id.to_string(),
        is_seekable,
        dvr_window_seconds,
        start_unix,
        live_edge_unix,
        duration_source: media.duration_source,
        duration_confidence: media.duration_confidence,
        duration_reasons,
        playback_decision_token,
    }
}

#[allow(dead_code)]
fn default_media_truth() -> MediaTruth {
    MediaTruth {
        container: "mp4".to_string(),
        video_codec: "h264".to_string(),
        audio_codec: "aac".to_string(),
        duration: 0.0,
        duration_source: DurationSource::Heuristic,
        duration_confidence: DurationConfidence::Low,
        duration_reasons: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOD_NO_PDT: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nseg0.ts\n#EXTINF:10.0,\nseg1.ts\n#EXT-X-ENDLIST\n";

    #[test]
    fn vod_playlist_without_pdt_is_seekable_with_total_duration() {
        let segments = extract_segment_truth(VOD_NO_PDT).unwrap();
        assert!(segments.is_vod);
        assert!(!segments.has_pdt);

        let media = MediaTruth {
            container: "mp4".into(),
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            duration: 20.0,
            duration_source: DurationSource::Metadata,
            duration_confidence: DurationConfidence::High,
            duration_reasons: Vec::new(),
        };
        let info = compose("rec-1", "req-1", &media, Some(&segments), None, None);
        assert!(info.is_seekable);
        assert_eq!(info.dvr_window_seconds, Some(20.0));
        assert!(info.start_unix.is_none());
    }

    #[test]
    fn live_playlist_without_endlist_and_missing_pdt_is_not_seekable() {
        let playlist = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00Z\n#EXTINF:10.0,\nseg0.ts\n#EXTINF:10.0,\nseg1.ts\n";
        let segments = extract_segment_truth(playlist).unwrap();
        assert!(!segments.is_vod);

        let media = default_media_truth();
        let info = compose("rec-1", "req-1", &media, Some(&segments), None, None);
        assert!(!info.is_seekable);
        assert!(info.start_unix.is_none());
        assert!(info.live_edge_unix.is_none());
    }

    #[test]
    fn unparseable_playlist_fails_closed() {
        let err = extract_segment_truth("not a playlist at all").unwrap_err();
        assert_eq!(err.code(), "PLAYLIST_PARSE_FAILED");
    }

    #[test]
    fn resume_past_duration_is_clamped_and_reasoned() {
        let media = MediaTruth {
            container: "mp4".into(),
            video_codec: "h264".into(),
            audio_codec: "aac".into(),
            duration: 100.0,
            duration_source: DurationSource::Metadata,
            duration_confidence: DurationConfidence::High,
            duration_reasons: Vec::new(),
        };
        let info = compose("rec-1", "req-1", &media, None, Some(150.0), None);
        assert!(info.duration_reasons.contains(&"RESUME_CLAMPED_TO_DURATION".to_string()));
    }
}
