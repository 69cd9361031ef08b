use schlieren_common::frame::TimestampedFrame;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{decode_blocking, FrameSource, SourceError};

/// Raster formats picked up from a sequence directory (lower-case).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Sorted image files in `dir`, filtered to [`IMAGE_EXTENSIONS`].
pub fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect();
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// A finite, file-backed source over a directory of still images.
///
/// Ends with [`SourceError::EndOfStream`] after the last image; a missing or
/// empty directory is a configuration error and is never retried.
pub struct ImageSequenceSource {
    dir: PathBuf,
    start_index: usize,
    pacing: Option<Duration>,
    images: Vec<PathBuf>,
    cursor: usize,
    ticker: Option<Interval>,
    seq: u64,
}

impl ImageSequenceSource {
    pub fn new(dir: impl Into<PathBuf>, start_index: usize, fps: Option<f64>) -> Self {
        let pacing = fps
            .filter(|f| f.is_finite() && *f > 0.0)
            .map(|f| Duration::from_secs_f64(1.0 / f));
        Self {
            dir: dir.into(),
            start_index,
            pacing,
            images: Vec::new(),
            cursor: 0,
            ticker: None,
            seq: 0,
        }
    }
}

impl FrameSource for ImageSequenceSource {
    fn describe(&self) -> String {
        format!("sequence:{}", self.dir.display())
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        let dir = self.dir.clone();
        let images = tokio::task::spawn_blocking(move || list_images(&dir))
            .await
            .map_err(|e| SourceError::Config(e.to_string()))?
            .map_err(|e| SourceError::Config(format!("{}: {e}", self.dir.display())))?;

        if images.is_empty() {
            return Err(SourceError::Config(format!(
                "no images found in {}",
                self.dir.display()
            )));
        }
        if self.start_index >= images.len() {
            return Err(SourceError::Config(format!(
                "start index {} exceeds the {} images in {}",
                self.start_index,
                images.len(),
                self.dir.display()
            )));
        }

        info!(
            dir = %self.dir.display(),
            total = images.len(),
            start_index = self.start_index,
            "opened image sequence"
        );

        self.cursor = self.start_index;
        self.images = images;
        self.seq = 0;
        self.ticker = self.pacing.map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<TimestampedFrame, SourceError> {
        if self.images.is_empty() {
            return Err(SourceError::NotOpen);
        }
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.tick().await;
        }

        while let Some(path) = self.images.get(self.cursor).cloned() {
            self.cursor += 1;
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read image, skipping");
                    continue;
                }
            };
            match decode_blocking(bytes).await? {
                Ok(frame) => {
                    let seq = self.seq;
                    self.seq += 1;
                    debug!(path = %path.display(), seq, "loaded sequence image");
                    return Ok(TimestampedFrame::new(frame, seq));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not decode image, skipping")
                }
            }
        }
        Err(SourceError::EndOfStream)
    }

    async fn close(&mut self) {
        self.ticker = None;
    }

    fn frame_count_hint(&self) -> Option<u64> {
        if self.images.is_empty() {
            None
        } else {
            Some(self.images.len().saturating_sub(self.start_index) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn write_png(dir: &Path, name: &str, value: u8) {
        let img = GrayImage::from_pixel(4, 3, Luma([value]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn lists_only_images_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 0);
        write_png(dir.path(), "a.png", 0);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("C.TIF"), "x").unwrap();

        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["C.TIF", "a.png", "b.png"]);
    }

    #[tokio::test]
    async fn yields_frames_then_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "frame_000.png", 10);
        write_png(dir.path(), "frame_001.png", 20);
        write_png(dir.path(), "frame_002.png", 30);

        let mut source = ImageSequenceSource::new(dir.path(), 1, None);
        source.open().await.unwrap();
        assert_eq!(source.frame_count_hint(), Some(2));

        let first = source.next_frame().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(first.frame.dimensions(), (4, 3));
        assert_eq!(first.frame.sample(0, 0, 0), 20);

        let second = source.next_frame().await.unwrap();
        assert_eq!(second.frame.sample(0, 0, 0), 30);

        assert!(matches!(
            source.next_frame().await,
            Err(SourceError::EndOfStream)
        ));
    }

    #[tokio::test]
    async fn skips_corrupt_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"not a png").unwrap();
        write_png(dir.path(), "b.png", 99);

        let mut source = ImageSequenceSource::new(dir.path(), 0, None);
        source.open().await.unwrap();
        let frame = source.next_frame().await.unwrap();
        assert_eq!(frame.frame.sample(0, 0, 0), 99);
    }

    #[tokio::test]
    async fn missing_directory_is_not_recoverable() {
        let mut source = ImageSequenceSource::new("/nonexistent/schlieren/frames", 0, None);
        let err = source.open().await.unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn start_index_past_end_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "a.png", 1);
        let mut source = ImageSequenceSource::new(dir.path(), 5, None);
        assert!(matches!(source.open().await, Err(SourceError::Config(_))));
    }
}
