use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};

fn fmt_ts(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Recording file for a segment starting at `start_ms`.
/// e.g. "recordings/bos_20260218_093000_000.mp4"
pub fn video_path(dir: &Path, start_ms: i64) -> PathBuf {
    dir.join(format!("bos_{}.mp4", fmt_ts(start_ms)))
}

/// Still image of a single processed frame.
/// e.g. "snapshots/schlieren_frame_20260218_093000_000.jpg"
pub fn snapshot_path(dir: &Path, at_ms: i64) -> PathBuf {
    dir.join(format!("schlieren_frame_{}.jpg", fmt_ts(at_ms)))
}
