//! HLS serving (C14): range-aware static serving of session/recording
//! artifacts, delegating path resolution to `sandboxed-file-manager`.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use sandboxed_file_manager::SandboxedManager;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::errors::AppError;
use crate::models::is_safe_id;

fn content_type_for(filename: &str) -> Result<&'static str, AppError> {
    if filename.ends_with(".m3u8") {
        Ok("application/vnd.apple.mpegurl")
    } else if filename.ends_with(".ts") {
        Ok("video/mp2t")
    } else if filename.ends_with(".mp4") || filename.ends_with(".m4s") {
        Ok("video/mp4")
    } else {
        Err(AppError::Unsupported {
            code: "UNSUPPORTED_ARTIFACT_TYPE",
            detail: format!("unrecognized artifact extension: {filename}"),
        })
    }
}

struct ByteRange {
    start: u64,
    end: u64,
}

/// Parses a single-range `Range: bytes=start-end` header. Multi-range
/// requests and anything malformed are rejected (§6: "416 on invalid
/// range").
fn parse_range(header: &str, total_len: u64) -> Result<ByteRange, AppError> {
    let spec = header
        .strip_prefix("bytes=")
        .ok_or(AppError::UnsatisfiableRange)?;
    if spec.contains(',') {
        return Err(AppError::UnsatisfiableRange);
    }
    let (start_s, end_s) = spec.split_once('-').ok_or(AppError::UnsatisfiableRange)?;

    let (start, end) = if start_s.is_empty() {
        // suffix range: last N bytes
        let suffix_len: u64 = end_s.parse().map_err(|_| AppError::UnsatisfiableRange)?;
        if suffix_len == 0 || suffix_len > total_len {
            return Err(AppError::UnsatisfiableRange);
        }
        (total_len - suffix_len, total_len - 1)
    } else {
        let start: u64 = start_s.parse().map_err(|_| AppError::UnsatisfiableRange)?;
        let end: u64 = if end_s.is_empty() {
            total_len.saturating_sub(1)
        } else {
            end_s.parse().map_err(|_| AppError::UnsatisfiableRange)?
        };
        (start, end)
    };

    if start > end || end >= total_len {
        return Err(AppError::UnsatisfiableRange);
    }
    Ok(ByteRange { start, end })
}

/// Serves `relative_path` (already validated to live under the manager's
/// sandbox) with HTTP range support. `session_or_recording_id` is checked
/// against the safe-ID alphabet before ever reaching the filesystem, per the
/// invariant in §3 that path components are the attacker's input.
pub async fn serve_artifact(
    manager: &SandboxedManager,
    session_or_recording_id: &str,
    filename: &str,
    relative_path: &str,
    range_header: Option<&str>,
) -> Result<Response, AppError> {
    if !is_safe_id(session_or_recording_id) {
        return Err(AppError::InvalidInput {
            code: "INVALID_INPUT",
            detail: "unsafe session or recording id".into(),
        });
    }
    let content_type = content_type_for(filename)?;

    if !manager
        .exists(relative_path)
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!(e)))?
    {
        return Err(AppError::NotFound {
            code: "NOT_FOUND",
            detail: "artifact does not exist".into(),
        });
    }

    let metadata = manager
        .metadata(relative_path)
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!(e)))?;
    let total_len = metadata.len();

    let mut file = manager
        .open(relative_path)
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!(e)))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let Some(range_header) = range_header else {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(total_len));
        let body = Body::from_stream(ReaderStream::new(file));
        return Ok((StatusCode::OK, headers, body).into_response());
    };

    let range = parse_range(range_header, total_len)?;
    let len = range.end - range.start + 1;

    file.seek(std::io::SeekFrom::Start(range.start))
        .await
        .map_err(|e| AppError::internal(anyhow::anyhow!(e)))?;

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&format!("bytes {}-{}/{}", range.start, range.end, total_len))
            .map_err(|e| AppError::internal(anyhow::anyhow!(e)))?,
    );

    // The platform-native efficient file-send path (§4.1): the ranged body is
    // streamed straight off the file handle, never buffered in full in memory.
    let body = Body::from_stream(ReaderStream::new(file.take(len)));
    Ok((StatusCode::PARTIAL_CONTENT, headers, body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_maps_known_extensions() {
        assert_eq!(content_type_for("index.m3u8").unwrap(), "application/vnd.apple.mpegurl");
        assert_eq!(content_type_for("seg_1.ts").unwrap(), "video/mp2t");
        assert_eq!(content_type_for("init.mp4").unwrap(), "video/mp4");
        assert_eq!(content_type_for("seg_1.m4s").unwrap(), "video/mp4");
        assert!(content_type_for("notes.txt").is_err());
    }

    #[test]
    fn parse_range_computes_inclusive_bounds() {
        let range = parse_range("bytes=0-1", 100).unwrap();
        assert_eq!(range.start, 0);
        assert_eq!(range.end, 1);
    }

    #[test]
    fn parse_range_rejects_out_of_bounds() {
        assert!(parse_range("bytes=0-200", 100).is_err());
    }

    #[test]
    fn parse_range_rejects_multi_range() {
        assert!(parse_range("bytes=0-1,2-3", 100).is_err());
    }

    #[test]
    fn parse_range_supports_suffix_form() {
        let range = parse_range("bytes=-10", 100).unwrap();
        assert_eq!(range.start, 90);
        assert_eq!(range.end, 99);
    }

    #[tokio::test]
    async fn serve_artifact_rejects_unsafe_id_before_touching_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SandboxedManager::builder()
            .base_directory(tmp.path())
            .build()
            .await
            .unwrap();
        let err = serve_artifact(&manager, "../etc", "init.mp4", "init.mp4", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn serve_artifact_returns_206_with_content_range() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = SandboxedManager::builder()
            .base_directory(tmp.path())
            .build()
            .await
            .unwrap();
        manager.write("init.mp4", b"abcdef").await.unwrap();

        let response = serve_artifact(&manager, "sess-1", "init.mp4", "init.mp4", Some("bytes=0-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes 0-1/6"
        );
    }
}
