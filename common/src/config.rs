use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::settings::{
    Colormap, CompositorSettings, CropRegion, FilterKind, FilterSpec, ReferenceSettings,
    Settings, UpdatePolicy,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// HTTP multipart MJPEG stream.
    Mjpeg,
    /// HTTP endpoint returning one JPEG per request.
    Polling,
    /// Anything ffmpeg can decode: camera device, RTSP URL, video file.
    Ffmpeg,
    /// Directory of still images, sorted by file name.
    Sequence,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    /// URL, device path, video file or image directory depending on `kind`.
    #[serde(default = "default_input")]
    pub input: String,
    /// Polling rate, or playback pacing for image sequences. Unset = as fast as possible.
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Skip this many images at the start of a sequence.
    #[serde(default)]
    pub start_index: usize,
    #[serde(default = "default_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_backoff_ms")]
    pub max_backoff_ms: u64,
    /// A live source silent for this long counts as dropped.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_filter")]
    pub filter: FilterKind,
    #[serde(default = "default_param")]
    pub param: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub colormap: Colormap,
    #[serde(default)]
    pub crop: Option<CropRegion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    /// Frames between reference updates; `0` or negative freezes the reference.
    #[serde(default)]
    pub update_interval: i64,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub policy: UpdatePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStream {
    #[default]
    Processed,
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_record_fps")]
    pub fps: f64,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Roll into a new file after this many seconds; `0` writes a single file.
    #[serde(default)]
    pub segment_duration_secs: u64,
    #[serde(default)]
    pub stream: RecordStream,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_viewer_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_snapshot_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Initial runtime settings, before any control-surface changes.
    pub fn settings(&self) -> Settings {
        Settings {
            filter: FilterSpec::new(self.processing.filter, self.processing.param),
            reference: ReferenceSettings {
                update_interval: self.reference.update_interval,
                alpha: self.reference.alpha,
                policy: self.reference.policy,
            },
            compositor: CompositorSettings {
                gain: self.processing.gain,
                colormap: self.processing.colormap,
                crop: self.processing.crop,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            input: default_input(),
            fps: None,
            width: None,
            height: None,
            start_index: 0,
            reconnect_backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_backoff_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            param: default_param(),
            gain: default_gain(),
            colormap: Colormap::None,
            crop: None,
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            update_interval: 0,
            alpha: default_alpha(),
            policy: UpdatePolicy::Blend,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: default_output_dir(),
            fps: default_record_fps(),
            codec: default_codec(),
            crf: default_crf(),
            preset: default_preset(),
            segment_duration_secs: 0,
            stream: RecordStream::Processed,
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            jpeg_quality: default_viewer_quality(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
            jpeg_quality: default_snapshot_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_source_kind() -> SourceKind {
    SourceKind::Ffmpeg
}
fn default_input() -> String {
    "/dev/video0".into()
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_filter() -> FilterKind {
    FilterKind::GaussianBlur
}
fn default_param() -> f64 {
    5.0
}
fn default_gain() -> f64 {
    1.0
}
fn default_alpha() -> f64 {
    0.5
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("recordings")
}
fn default_record_fps() -> f64 {
    30.0
}
fn default_codec() -> String {
    "h264".into()
}
fn default_crf() -> u32 {
    23
}
fn default_preset() -> String {
    "veryfast".into()
}
fn default_queue_capacity() -> usize {
    64
}
fn default_true() -> bool {
    true
}
fn default_bind() -> String {
    "0.0.0.0:8080".into()
}
fn default_viewer_quality() -> u8 {
    80
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}
fn default_snapshot_quality() -> u8 {
    95
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.source.kind, SourceKind::Ffmpeg);
        assert_eq!(config.source.reconnect_backoff_ms, 1000);
        assert_eq!(config.source.read_timeout_ms, 5000);
        assert_eq!(config.processing.filter, FilterKind::GaussianBlur);
        assert!(!config.recording.enabled);
        assert!(config.viewer.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parses_full_sections() {
        let config = Config::parse(
            r#"
            [source]
            kind = "sequence"
            input = "frames/"
            start_index = 3
            fps = 100.0
            read_timeout_ms = 250

            [processing]
            filter = "median_filter"
            param = 4
            gain = 7.0
            colormap = "jet"
            crop = { width = 640, height = 480 }

            [reference]
            update_interval = 10
            alpha = 1.0
            policy = "replace"

            [recording]
            enabled = true
            stream = "raw"
            "#,
        )
        .unwrap();

        assert_eq!(config.source.kind, SourceKind::Sequence);
        assert_eq!(config.source.start_index, 3);
        assert_eq!(config.source.read_timeout_ms, 250);
        assert_eq!(config.processing.colormap, Colormap::Jet);
        assert_eq!(config.recording.stream, RecordStream::Raw);

        let settings = config.settings();
        assert_eq!(settings.filter.kind(), FilterKind::MedianFilter);
        assert_eq!(settings.filter.param(), 5.0);
        assert_eq!(settings.reference.policy, UpdatePolicy::Replace);
        assert_eq!(
            settings.compositor.crop,
            Some(CropRegion {
                width: 640,
                height: 480
            })
        );
    }

    #[test]
    fn rejects_unknown_filter() {
        let err = Config::parse("[processing]\nfilter = \"fft\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
