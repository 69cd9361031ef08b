use schlieren_common::config::{SourceConfig, SourceKind};
use schlieren_common::frame::TimestampedFrame;

use std::time::Duration;

use crate::ffmpeg::FfmpegSource;
use crate::mjpeg::{MjpegSource, PollingSource};
use crate::sequence::ImageSequenceSource;
use crate::{FrameSource, SourceError};

const DEFAULT_POLL_FPS: f64 = 10.0;

/// Every source kind behind one concrete type, chosen from configuration.
pub enum AnySource {
    Mjpeg(MjpegSource),
    Polling(PollingSource),
    Ffmpeg(FfmpegSource),
    Sequence(ImageSequenceSource),
}

impl AnySource {
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        let read_timeout = Duration::from_millis(config.read_timeout_ms.max(1));
        let source = match config.kind {
            SourceKind::Mjpeg => AnySource::Mjpeg(MjpegSource::new(&config.input, read_timeout)?),
            SourceKind::Polling => AnySource::Polling(PollingSource::new(
                &config.input,
                config.fps.unwrap_or(DEFAULT_POLL_FPS),
                read_timeout,
            )?),
            SourceKind::Ffmpeg => {
                if config.input.trim().is_empty() {
                    return Err(SourceError::Config("ffmpeg input is empty".into()));
                }
                AnySource::Ffmpeg(FfmpegSource::new(
                    &config.input,
                    config.width,
                    config.height,
                    read_timeout,
                ))
            }
            SourceKind::Sequence => AnySource::Sequence(ImageSequenceSource::new(
                &config.input,
                config.start_index,
                config.fps,
            )),
        };
        Ok(source)
    }
}

impl FrameSource for AnySource {
    fn describe(&self) -> String {
        match self {
            AnySource::Mjpeg(s) => s.describe(),
            AnySource::Polling(s) => s.describe(),
            AnySource::Ffmpeg(s) => s.describe(),
            AnySource::Sequence(s) => s.describe(),
        }
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        match self {
            AnySource::Mjpeg(s) => s.open().await,
            AnySource::Polling(s) => s.open().await,
            AnySource::Ffmpeg(s) => s.open().await,
            AnySource::Sequence(s) => s.open().await,
        }
    }

    async fn next_frame(&mut self) -> Result<TimestampedFrame, SourceError> {
        match self {
            AnySource::Mjpeg(s) => s.next_frame().await,
            AnySource::Polling(s) => s.next_frame().await,
            AnySource::Ffmpeg(s) => s.next_frame().await,
            AnySource::Sequence(s) => s.next_frame().await,
        }
    }

    async fn close(&mut self) {
        match self {
            AnySource::Mjpeg(s) => s.close().await,
            AnySource::Polling(s) => s.close().await,
            AnySource::Ffmpeg(s) => s.close().await,
            AnySource::Sequence(s) => s.close().await,
        }
    }

    fn frame_count_hint(&self) -> Option<u64> {
        match self {
            AnySource::Mjpeg(s) => s.frame_count_hint(),
            AnySource::Polling(s) => s.frame_count_hint(),
            AnySource::Ffmpeg(s) => s.frame_count_hint(),
            AnySource::Sequence(s) => s.frame_count_hint(),
        }
    }
}
