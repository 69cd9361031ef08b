use schlieren_common::config::SnapshotConfig;
use schlieren_common::frame::{FrameError, PublishedFrame};
use std::path::PathBuf;
use tracing::info;

use crate::recorder::keys::snapshot_path;
use crate::sink::DisplayFeed;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("no processed frame available yet")]
    NoFrame,
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] FrameError),
    #[error("failed to write {0}: {1}")]
    Write(String, std::io::Error),
}

/// Save the processed half of `frame` as a JPEG under `config.dir`.
pub async fn save_snapshot(
    config: &SnapshotConfig,
    frame: &PublishedFrame,
) -> Result<PathBuf, SnapshotError> {
    let processed = frame.processed.clone();
    let quality = config.jpeg_quality;
    let jpeg = tokio::task::spawn_blocking(move || processed.encode_jpeg(quality))
        .await
        .map_err(|e| SnapshotError::Encode(FrameError::Encode(e.to_string())))??;

    tokio::fs::create_dir_all(&config.dir)
        .await
        .map_err(|e| SnapshotError::Write(config.dir.display().to_string(), e))?;

    let path = snapshot_path(&config.dir, chrono::Utc::now().timestamp_millis());
    tokio::fs::write(&path, &jpeg)
        .await
        .map_err(|e| SnapshotError::Write(path.display().to_string(), e))?;

    info!(path = %path.display(), seq = frame.seq, bytes = jpeg.len(), "snapshot saved");
    Ok(path)
}

/// Save whatever the display sink currently holds.
pub async fn save_latest(
    config: &SnapshotConfig,
    display: &DisplayFeed,
) -> Result<PathBuf, SnapshotError> {
    let latest = display.borrow().clone().ok_or(SnapshotError::NoFrame)?;
    save_snapshot(config, &latest).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use schlieren_common::frame::{Frame, Layout};
    use std::sync::Arc;
    use tokio::sync::watch;

    fn published() -> PublishedFrame {
        PublishedFrame {
            seq: 7,
            captured_at_ms: 0,
            raw: Frame::filled(16, 8, Layout::Rgb, 10),
            processed: Frame::filled(16, 8, Layout::Rgb, 200),
            differenced: true,
        }
    }

    #[tokio::test]
    async fn writes_decodable_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let config = SnapshotConfig {
            dir: dir.path().join("snaps"),
            jpeg_quality: 95,
        };
        let path = save_snapshot(&config, &published()).await.unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("schlieren_frame_") && name.ends_with(".jpg"), "{name}");
        let decoded = Frame::decode(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[tokio::test]
    async fn nothing_to_save_before_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let config = SnapshotConfig {
            dir: dir.path().to_path_buf(),
            jpeg_quality: 90,
        };
        let (tx, rx) = watch::channel(None);
        assert!(matches!(save_latest(&config, &rx).await, Err(SnapshotError::NoFrame)));

        tx.send_replace(Some(Arc::new(published())));
        assert!(save_latest(&config, &rx).await.is_ok());
    }
}
