//! Recording sink: writes every published frame, in order, to MP4 files
//! through an ffmpeg child process.
//!
//! A new file is started when the segment duration elapses or when the frame
//! size changes (the encoder's input size is fixed). Any encoder failure ends
//! the recording; the engine notices the closed queue and keeps the live view
//! running.

pub mod encoder;
pub mod keys;

use schlieren_common::config::{RecordStream, RecordingConfig};
use schlieren_common::frame::{Frame, PublishedFrame};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::sink::RecordingFeed;
use encoder::{EncoderError, FinishedVideo, VideoEncoder};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("cannot create output directory {0}: {1}")]
    OutputDir(String, std::io::Error),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
}

#[derive(Debug, Default)]
pub struct RecordingSummary {
    pub files: Vec<PathBuf>,
    pub frames: u64,
}

struct Segment {
    encoder: VideoEncoder,
    /// Monotonic deadline for rolling into the next file.
    deadline: Option<Instant>,
}

pub struct Recorder {
    config: RecordingConfig,
    segment: Option<Segment>,
    summary: RecordingSummary,
}

impl Recorder {
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            config,
            segment: None,
            summary: RecordingSummary::default(),
        }
    }

    /// Which of the two published frames this recorder writes.
    pub fn select<'a>(&self, published: &'a PublishedFrame) -> &'a Frame {
        match self.config.stream {
            RecordStream::Processed => &published.processed,
            RecordStream::Raw => &published.raw,
        }
    }

    /// Consume the feed until the engine closes it, then finalize.
    pub async fn run(mut self, mut feed: RecordingFeed) -> Result<RecordingSummary, RecorderError> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                RecorderError::OutputDir(self.config.output_dir.display().to_string(), e)
            })?;

        info!(
            dir = %self.config.output_dir.display(),
            stream = ?self.config.stream,
            fps = self.config.fps,
            segment_secs = self.config.segment_duration_secs,
            "recorder started"
        );

        while let Some(published) = feed.recv().await {
            if let Err(e) = self.write(&published).await {
                error!(error = %e, seq = published.seq, "recording failed, aborting");
                // Closing the queue detaches this sink from the engine.
                drop(feed);
                self.close_segment().await;
                return Err(e);
            }
        }

        self.close_segment().await;
        info!(
            files = self.summary.files.len(),
            frames = self.summary.frames,
            "recorder finished"
        );
        Ok(self.summary)
    }

    async fn write(&mut self, published: &PublishedFrame) -> Result<(), RecorderError> {
        let frame = self.select(published);
        let size = frame.dimensions();

        let roll = match &self.segment {
            None => false,
            Some(segment) if segment.encoder.dimensions() != size => {
                info!(
                    from = ?segment.encoder.dimensions(),
                    to = ?size,
                    "frame size changed, starting a new file"
                );
                true
            }
            Some(segment) => segment.deadline.is_some_and(|d| Instant::now() >= d),
        };
        if roll {
            self.close_segment().await;
        }

        if self.segment.is_none() {
            let path = keys::video_path(&self.config.output_dir, published.captured_at_ms);
            let encoder = VideoEncoder::start(&self.config, size.0, size.1, path).await?;
            let deadline = (self.config.segment_duration_secs > 0)
                .then(|| Instant::now() + Duration::from_secs(self.config.segment_duration_secs));
            self.segment = Some(Segment { encoder, deadline });
        }

        let frame = self.select(published);
        if let Some(segment) = self.segment.as_mut() {
            segment.encoder.push_frame(frame).await?;
            self.summary.frames += 1;
            if segment.encoder.frame_count() % 100 == 0 {
                debug!(
                    frames = segment.encoder.frame_count(),
                    path = %segment.encoder.output_path().display(),
                    "recording"
                );
            }
        }
        Ok(())
    }

    async fn close_segment(&mut self) {
        let Some(segment) = self.segment.take() else {
            return;
        };
        let path = segment.encoder.output_path().to_path_buf();
        match segment.encoder.finish().await {
            Ok(FinishedVideo { path, .. }) => self.summary.files.push(path),
            Err(e) => warn!(error = %e, path = %path.display(), "failed to finalize video file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schlieren_common::frame::Layout;

    #[test]
    fn selects_configured_stream() {
        let published = PublishedFrame {
            seq: 0,
            captured_at_ms: 0,
            raw: Frame::filled(2, 2, Layout::Rgb, 1),
            processed: Frame::filled(2, 2, Layout::Rgb, 2),
            differenced: true,
        };
        let processed = Recorder::new(RecordingConfig::default());
        assert_eq!(processed.select(&published).data()[0], 2);

        let raw = Recorder::new(RecordingConfig {
            stream: RecordStream::Raw,
            ..RecordingConfig::default()
        });
        assert_eq!(raw.select(&published).data()[0], 1);
    }

    #[tokio::test]
    async fn empty_feed_finishes_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = RecordingConfig {
            output_dir: dir.path().join("out"),
            ..RecordingConfig::default()
        };
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        drop(tx);
        let summary = Recorder::new(config).run(rx).await.unwrap();
        assert!(summary.files.is_empty());
        assert_eq!(summary.frames, 0);
        assert!(dir.path().join("out").is_dir());
    }
}
