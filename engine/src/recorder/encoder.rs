use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, error, info, warn};

use schlieren_common::config::RecordingConfig;
use schlieren_common::frame::Frame;

/// One MP4 file being written by an `ffmpeg` child that reads packed RGB24
/// frames on stdin.
pub struct VideoEncoder {
    child: Child,
    stdin: ChildStdin,
    output_path: PathBuf,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[derive(Debug)]
pub struct FinishedVideo {
    pub path: PathBuf,
    pub frame_count: u64,
    pub bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("failed to spawn ffmpeg: {0}")]
    Spawn(String),
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(String),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(String),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
    #[error("frame is {got:?}, encoder was opened for {expected:?}")]
    FrameSize { got: (u32, u32), expected: (u32, u32) },
}

pub fn video_codec(codec: &str) -> &'static str {
    match codec {
        "h265" | "hevc" | "libx265" => "libx265",
        _ => "libx264",
    }
}

/// Arguments for encoding `width x height` RGB24 frames from stdin into `output`.
pub fn encode_args(
    config: &RecordingConfig,
    width: u32,
    height: u32,
    output: &Path,
) -> Vec<String> {
    let fps = if config.fps.is_finite() && config.fps > 0.0 {
        config.fps
    } else {
        30.0
    };
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{width}x{height}"),
        "-r".into(),
        fps.to_string(),
        "-i".into(),
        "pipe:0".into(),
        "-c:v".into(),
        video_codec(&config.codec).into(),
        "-preset".into(),
        config.preset.clone(),
        "-crf".into(),
        config.crf.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
    ];
    // yuv420p needs even dimensions.
    if width % 2 == 1 || height % 2 == 1 {
        args.push("-vf".into());
        args.push("pad=ceil(iw/2)*2:ceil(ih/2)*2".into());
    }
    args.extend(["-movflags".into(), "+faststart".into(), "-y".into()]);
    args.push(output.display().to_string());
    args
}

impl VideoEncoder {
    /// Spawn ffmpeg writing to `output_path`, ready for frames of the given size.
    pub async fn start(
        config: &RecordingConfig,
        width: u32,
        height: u32,
        output_path: PathBuf,
    ) -> Result<Self, EncoderError> {
        let mut child = Command::new("ffmpeg")
            .args(encode_args(config, width, height, &output_path))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EncoderError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncoderError::Spawn("could not get stdin handle".into()))?;

        debug!(
            codec = video_codec(&config.codec),
            crf = config.crf,
            preset = config.preset,
            fps = config.fps,
            width,
            height,
            output = output_path.display().to_string(),
            "ffmpeg encoder started"
        );

        Ok(Self {
            child,
            stdin,
            output_path,
            width,
            height,
            frame_count: 0,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Write one frame. Gray frames are expanded to RGB.
    pub async fn push_frame(&mut self, frame: &Frame) -> Result<(), EncoderError> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(EncoderError::FrameSize {
                got: frame.dimensions(),
                expected: (self.width, self.height),
            });
        }
        let rgb = frame.to_rgb();
        self.stdin
            .write_all(rgb.data())
            .await
            .map_err(|e| EncoderError::Write(e.to_string()))?;
        self.frame_count += 1;
        Ok(())
    }

    /// Close stdin and wait for ffmpeg to finalize the container.
    pub async fn finish(self) -> Result<FinishedVideo, EncoderError> {
        // Closing stdin tells ffmpeg there are no more frames.
        drop(self.stdin);

        let output = self
            .child
            .wait_with_output()
            .await
            .map_err(|e| EncoderError::Wait(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                stderr = %stderr,
                path = %self.output_path.display(),
                "ffmpeg exited with error"
            );
            return Err(EncoderError::FfmpegFailed(stderr.into_owned()));
        }

        let bytes = match tokio::fs::metadata(&self.output_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(
                    path = %self.output_path.display(),
                    error = %e,
                    "could not stat finished video"
                );
                0
            }
        };

        info!(
            frame_count = self.frame_count,
            bytes,
            path = %self.output_path.display(),
            "video file complete"
        );

        Ok(FinishedVideo {
            path: self.output_path,
            frame_count: self.frame_count,
            bytes,
        })
    }
}

/// Check whether ffmpeg is available on PATH. Logs a warning if not found.
pub async fn check_ffmpeg_available() -> bool {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
            true
        }
        Ok(_) => {
            warn!("ffmpeg returned non-zero for -version; decoding and recording may fail");
            false
        }
        Err(e) => {
            warn!(
                error = %e,
                "ffmpeg not found on PATH; camera/video sources and recording will fail. \
                 Install ffmpeg with libx264/libx265 support."
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.windows(2)
            .find(|w| w[0] == flag)
            .map(|w| w[1].as_str())
    }

    #[test]
    fn raw_rgb_input_with_size_and_rate() {
        let config = RecordingConfig::default();
        let args = encode_args(&config, 640, 480, Path::new("out/bos.mp4"));
        assert_eq!(value_after(&args, "-f"), Some("rawvideo"));
        assert_eq!(value_after(&args, "-s"), Some("640x480"));
        assert_eq!(value_after(&args, "-r"), Some("30"));
        assert_eq!(value_after(&args, "-i"), Some("pipe:0"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-crf"), Some("23"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(args.last().map(String::as_str), Some("out/bos.mp4"));
        assert!(!args.contains(&"-vf".to_string()));
    }

    #[test]
    fn odd_sizes_are_padded() {
        let args = encode_args(&RecordingConfig::default(), 641, 480, Path::new("x.mp4"));
        assert!(value_after(&args, "-vf").is_some_and(|v| v.starts_with("pad=")));
    }

    #[test]
    fn codec_mapping() {
        assert_eq!(video_codec("h265"), "libx265");
        assert_eq!(video_codec("h264"), "libx264");
        assert_eq!(video_codec("anything"), "libx264");
    }
}
