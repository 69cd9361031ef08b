//! Decoding through an `ffmpeg` child process.
//!
//! Covers every input ffmpeg understands: V4L2 camera devices, RTSP/RTMP/UDP
//! network streams and recorded video files. Frames arrive on the child's
//! stdout as packed RGB24, one `width * height * 3` block per frame.

use schlieren_common::frame::{Frame, TimestampedFrame};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::{FrameSource, SourceError};

const LIVE_SCHEMES: &[&str] = &[
    "rtsp://", "rtsps://", "rtmp://", "udp://", "tcp://", "srt://", "http://", "https://",
];

/// Network streams and capture devices never end; a closed pipe means the
/// connection dropped. Anything else is treated as a finite file.
pub fn is_live_input(input: &str) -> bool {
    LIVE_SCHEMES.iter().any(|s| input.starts_with(s)) || is_device(input)
}

fn is_device(input: &str) -> bool {
    input.starts_with("/dev/video")
}

fn input_options(input: &str) -> Vec<String> {
    if input.starts_with("rtsp://") || input.starts_with("rtsps://") {
        vec!["-rtsp_transport".into(), "tcp".into()]
    } else if is_device(input) {
        vec!["-f".into(), "v4l2".into()]
    } else {
        Vec::new()
    }
}

/// Arguments for `ffprobe` reporting the first video stream as `WxH`.
pub fn size_query_args(input: &str) -> Vec<String> {
    let mut args: Vec<String> = ["-v", "error", "-select_streams", "v:0"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(input_options(input));
    args.extend(
        [
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
            input,
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args
}

/// Parse `ffprobe -of csv=p=0:s=x` output such as `1920x1080`.
pub fn parse_frame_size(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.trim_end_matches('x').split('x');
    let width = parts.next()?.trim().parse().ok()?;
    let height = parts.next()?.trim().parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

/// Arguments for the decoding `ffmpeg` process. `scale` forces an output size.
pub fn decode_args(input: &str, scale: Option<(u32, u32)>) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    args.extend(input_options(input));
    args.push("-i".into());
    args.push(input.into());
    if let Some((w, h)) = scale {
        args.push("-vf".into());
        args.push(format!("scale={w}:{h}"));
    }
    args.extend(
        ["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

/// Fill `buf` from the decoder's pipe, giving up after `limit` when set.
async fn read_frame<R>(
    reader: &mut R,
    buf: &mut [u8],
    limit: Option<Duration>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let read = reader.read_exact(buf);
    let filled = match limit {
        None => read.await,
        Some(limit) => tokio::time::timeout(limit, read).await.map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no frame data for {} ms", limit.as_millis()),
            )
        })?,
    };
    filled.map(|_| ())
}

pub struct FfmpegSource {
    input: String,
    live: bool,
    configured_size: Option<(u32, u32)>,
    size: Option<(u32, u32)>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    read_timeout: Duration,
    seq: u64,
}

impl FfmpegSource {
    /// `read_timeout` bounds the wait for each frame of a live input; files
    /// are read without a limit.
    pub fn new(
        input: &str,
        width: Option<u32>,
        height: Option<u32>,
        read_timeout: Duration,
    ) -> Self {
        let configured_size = match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        };
        Self {
            input: input.to_string(),
            live: is_live_input(input),
            configured_size,
            size: None,
            child: None,
            stdout: None,
            read_timeout,
            seq: 0,
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Failure class for this input: live inputs retry, files do not.
    fn failure(&self, message: String) -> SourceError {
        if self.live {
            SourceError::Unavailable(message)
        } else {
            SourceError::Config(message)
        }
    }

    async fn query_size(&self) -> Result<(u32, u32), SourceError> {
        let output = Command::new("ffprobe")
            .args(size_query_args(&self.input))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SourceError::Config(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(format!("ffprobe failed: {}", stderr.trim())));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_frame_size(&stdout)
            .ok_or_else(|| self.failure(format!("no video stream in {}", self.input)))
    }
}

impl FrameSource for FfmpegSource {
    fn describe(&self) -> String {
        format!("ffmpeg:{}", self.input)
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        self.close().await;

        let size = match self.configured_size {
            Some(size) => size,
            None => self.query_size().await?,
        };

        let mut child = Command::new("ffmpeg")
            .args(decode_args(&self.input, self.configured_size))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SourceError::Config(format!("failed to spawn ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::Config("could not get ffmpeg stdout handle".into()))?;

        info!(
            input = self.input,
            width = size.0,
            height = size.1,
            live = self.live,
            "ffmpeg decoder started"
        );

        self.size = Some(size);
        self.child = Some(child);
        self.stdout = Some(stdout);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<TimestampedFrame, SourceError> {
        let (width, height) = self.size.ok_or(SourceError::NotOpen)?;
        let stdout = self.stdout.as_mut().ok_or(SourceError::NotOpen)?;

        let mut buf = vec![0u8; width as usize * height as usize * 3];
        let limit = self.live.then_some(self.read_timeout);
        match read_frame(stdout, &mut buf, limit).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return if self.live {
                    Err(SourceError::Unavailable("ffmpeg stream ended".into()))
                } else {
                    debug!(input = self.input, frames = self.seq, "video file exhausted");
                    Err(SourceError::EndOfStream)
                };
            }
            Err(e) => return Err(SourceError::Unavailable(e.to_string())),
        }

        let frame = Frame::rgb(width, height, buf)
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let seq = self.seq;
        self.seq += 1;
        Ok(TimestampedFrame::new(frame, seq))
    }

    async fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, input = self.input, "failed to stop ffmpeg decoder");
            }
        }
    }
}
