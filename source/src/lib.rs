//! Frame sources for the schlieren engine.
//!
//! A source yields raw color frames one at a time:
//! - HTTP multipart MJPEG streams and single-JPEG polling endpoints
//! - anything ffmpeg decodes (camera devices, RTSP streams, video files)
//! - ordered directories of still images
//!
//! Sources never retry on their own. They report a recoverable
//! [`SourceError::Unavailable`] and leave reconnect timing to the caller's
//! [`StreamHandle`].

pub mod any;
pub mod ffmpeg;
pub mod handle;
pub mod mjpeg;
pub mod sequence;

use schlieren_common::frame::{Frame, FrameError, TimestampedFrame};
use std::future::Future;

pub use any::AnySource;
pub use handle::{Backoff, StreamHandle};

/// A pull-based producer of frames.
///
/// `open` may be called again after a transient failure; implementations must
/// release any previous connection first.
pub trait FrameSource: Send {
    /// Short identifier for logs and status messages.
    fn describe(&self) -> String;

    fn open(&mut self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Block until the next frame, the end of a finite source, or a failure.
    fn next_frame(&mut self) -> impl Future<Output = Result<TimestampedFrame, SourceError>> + Send;

    fn close(&mut self) -> impl Future<Output = ()> + Send;

    /// Total number of frames for finite sources, when known up front.
    fn frame_count_hint(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transient: the connection dropped or could not be established.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// A finite source has delivered its last frame.
    #[error("end of stream")]
    EndOfStream,
    #[error("source is not open")]
    NotOpen,
    /// The source can never succeed as configured (missing directory, bad URL).
    #[error("invalid source: {0}")]
    Config(String),
}

/// Decode an encoded still on the blocking pool. The outer error is a
/// failed decode task; the inner one an undecodable image.
pub(crate) async fn decode_blocking(
    bytes: Vec<u8>,
) -> Result<Result<Frame, FrameError>, SourceError> {
    tokio::task::spawn_blocking(move || Frame::decode(&bytes))
        .await
        .map_err(|e| SourceError::Unavailable(e.to_string()))
}

impl SourceError {
    /// Whether the engine should back off and call `open` again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::NotOpen)
    }
}
