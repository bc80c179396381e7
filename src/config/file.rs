//! Session configuration file support

use crate::media::{PixelFormat, Rational, SampleFormat};
use crate::playback::StageConfig;
use crate::record::RecordingConfig;
use crate::source::ReaderConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "avsession.toml";

/// Session configuration loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    pub log_file: String,

    pub buffers: BufferSection,
    pub reader: ReaderSection,
    pub playback: PlaybackSection,
    pub recording: RecordingSection,
}

/// `[buffers]`: ring buffer sizes in frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    pub audio_slots: usize,
    pub video_slots: usize,
}

/// `[reader]`: decode thread delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSection {
    /// Extra attempts for a frame a sink refused because it was full
    pub sink_retry_attempts: u32,
    pub sink_retry_interval_ms: u64,
    pub pause_poll_ms: u64,
}

/// `[playback]`: audio output and render targets (unset = follow source)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSection {
    pub audio_rate: Option<u32>,
    pub audio_channels: Option<u16>,
    pub audio_format: SampleFormat,
    pub period_samples: Option<usize>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub video_format: Option<PixelFormat>,
    /// Most frames one render may drop to catch up (unset = unbounded)
    pub max_video_skip: Option<usize>,
}

/// `[recording]`: output formats (unset = follow source)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSection {
    pub audio_rate: Option<u32>,
    pub audio_channels: Option<u16>,
    pub audio_format: SampleFormat,
    pub audio_frame_samples: Option<usize>,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub video_format: PixelFormat,
    /// Output timestamp ticks per second
    pub time_base_den: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: String::new(),
            buffers: BufferSection::default(),
            reader: ReaderSection::default(),
            playback: PlaybackSection::default(),
            recording: RecordingSection::default(),
        }
    }
}

impl Default for BufferSection {
    fn default() -> Self {
        let stages = StageConfig::default();
        Self {
            audio_slots: stages.audio_slots,
            video_slots: stages.video_slots,
        }
    }
}

impl Default for ReaderSection {
    fn default() -> Self {
        let reader = ReaderConfig::default();
        Self {
            sink_retry_attempts: reader.sink_retry_attempts,
            sink_retry_interval_ms: reader.sink_retry_interval.as_millis() as u64,
            pause_poll_ms: reader.pause_poll.as_millis() as u64,
        }
    }
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            audio_rate: None,
            audio_channels: None,
            audio_format: SampleFormat::S16,
            period_samples: None,
            video_width: None,
            video_height: None,
            video_format: None,
            max_video_skip: None,
        }
    }
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            audio_rate: None,
            audio_channels: None,
            audio_format: SampleFormat::F32,
            audio_frame_samples: None,
            video_width: None,
            video_height: None,
            video_format: PixelFormat::Yuv420p,
            time_base_den: 1000,
        }
    }
}

/// Runtime settings derived from a [`SessionConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub reader: ReaderConfig,
    pub stages: StageConfig,
    pub recording: RecordingConfig,
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. Working directory: avsession.toml
    /// 2. User config directory: avsession/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load(local);
        }

        if let Some(path) = Self::user_config_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Self::default())
    }

    /// Per-user configuration file location
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("avsession").join("config.toml"))
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::invalid(format!("unknown log level '{}'", self.log_level)));
        }
        if self.buffers.audio_slots == 0 || self.buffers.video_slots == 0 {
            return Err(ConfigError::invalid("buffer slots must be at least 1"));
        }
        if self.reader.sink_retry_interval_ms == 0 || self.reader.pause_poll_ms == 0 {
            return Err(ConfigError::invalid("reader intervals must be at least 1ms"));
        }

        let p = &self.playback;
        check_audio("playback", p.audio_rate, p.audio_channels)?;
        check_size("playback", p.video_width, p.video_height)?;
        if p.period_samples == Some(0) {
            return Err(ConfigError::invalid("playback.period_samples must be at least 1"));
        }

        let r = &self.recording;
        check_audio("recording", r.audio_rate, r.audio_channels)?;
        check_size("recording", r.video_width, r.video_height)?;
        if r.audio_frame_samples == Some(0) {
            return Err(ConfigError::invalid("recording.audio_frame_samples must be at least 1"));
        }
        if r.time_base_den <= 0 {
            return Err(ConfigError::invalid("recording.time_base_den must be positive"));
        }
        Ok(())
    }

    /// Convert to runtime settings
    pub fn to_session_options(&self) -> SessionOptions {
        let p = &self.playback;
        let r = &self.recording;

        SessionOptions {
            reader: ReaderConfig {
                sink_retry_attempts: self.reader.sink_retry_attempts,
                sink_retry_interval: Duration::from_millis(self.reader.sink_retry_interval_ms),
                pause_poll: Duration::from_millis(self.reader.pause_poll_ms),
            },
            stages: StageConfig {
                audio_slots: self.buffers.audio_slots,
                video_slots: self.buffers.video_slots,
                audio_rate: p.audio_rate,
                audio_channels: p.audio_channels,
                audio_format: p.audio_format,
                period_samples: p.period_samples,
                video_size: p.video_width.zip(p.video_height),
                video_format: p.video_format,
                max_video_skip: p.max_video_skip,
            },
            recording: RecordingConfig {
                audio_format: r.audio_format,
                audio_rate: r.audio_rate,
                audio_channels: r.audio_channels,
                video_format: r.video_format,
                video_size: r.video_width.zip(r.video_height),
                audio_frame_samples: r.audio_frame_samples,
                time_base: Rational::new(1, r.time_base_den),
            },
        }
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# avsession configuration

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = no file logging)
log_file = ""

[buffers]
# Ring buffer sizes in frames
audio_slots = 256
video_slots = 128

[reader]
# Extra attempts for a frame refused by a full sink, then it is dropped for that sink
sink_retry_attempts = 30
sink_retry_interval_ms = 10
# How often a paused reader re-checks its state
pause_poll_ms = 10

[playback]
# Audio output; unset values follow the source
# audio_rate = 48000
# audio_channels = 2
audio_format = "s16"
# Samples per output period (default: source frame size)
# period_samples = 1024
# Render size and format (default: source)
# video_width = 1280
# video_height = 720
# video_format = "rgba"
# Most frames one render may drop to catch up (default: unbounded)
# max_video_skip = 8

[recording]
# audio_rate = 48000
# audio_channels = 2
audio_format = "f32"
# Samples per encoded audio frame (default: source frame size)
# audio_frame_samples = 1024
# video_width = 1280
# video_height = 720
video_format = "yuv420p"
# Output timestamp ticks per second
time_base_den = 1000
"#
        .to_string()
    }
}

fn check_audio(section: &str, rate: Option<u32>, channels: Option<u16>) -> Result<(), ConfigError> {
    if rate == Some(0) || channels == Some(0) {
        return Err(ConfigError::invalid(format!(
            "{}: audio rate and channels must be at least 1",
            section
        )));
    }
    Ok(())
}

fn check_size(section: &str, width: Option<u32>, height: Option<u32>) -> Result<(), ConfigError> {
    match (width, height) {
        (None, None) => Ok(()),
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok(()),
        (Some(_), Some(_)) => Err(ConfigError::invalid(format!(
            "{}: video size must be at least 1x1",
            section
        ))),
        _ => Err(ConfigError::invalid(format!(
            "{}: video_width and video_height must be set together",
            section
        ))),
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Value out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}
