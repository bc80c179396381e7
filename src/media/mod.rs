//! Media types shared by every pipeline stage

mod frame;
mod time;

pub use frame::{Frame, Packet};
pub use time::{rescale, Rational, MILLIS};

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stream type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Interleaved PCM sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

/// Packed or planar pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Rgba,
    Gray8,
    Yuv420p,
}

/// Audio format parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioDescriptor {
    pub fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            format,
        }
    }

    /// Bytes for one sample across all channels
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Bytes needed for `samples` samples per channel
    pub fn bytes_for_samples(&self, samples: usize) -> usize {
        samples * self.block_align()
    }

    /// Samples per channel held in `bytes`
    pub fn samples_in(&self, bytes: usize) -> usize {
        match self.block_align() {
            0 => 0,
            align => bytes / align,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SessionError::invalid_descriptor("audio", "sample rate is zero"));
        }
        if self.channels == 0 {
            return Err(SessionError::invalid_descriptor("audio", "channel count is zero"));
        }
        Ok(())
    }
}

impl fmt::Display for AudioDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {}ch {:?}",
            self.sample_rate, self.channels, self.format
        )
    }
}

/// Video format parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl VideoDescriptor {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Size of one picture in bytes
    pub fn frame_bytes(&self) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.format {
            PixelFormat::Rgb24 => w * h * 3,
            PixelFormat::Rgba => w * h * 4,
            PixelFormat::Gray8 => w * h,
            PixelFormat::Yuv420p => w * h + 2 * w.div_ceil(2) * h.div_ceil(2),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(SessionError::invalid_descriptor(
                "video",
                format!("dimensions {}x{} are empty", self.width, self.height),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for VideoDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {:?}", self.width, self.height, self.format)
    }
}

/// Audio stream parameters captured when an input is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioStreamInfo {
    pub descriptor: AudioDescriptor,
    pub time_base: Rational,
    /// Nominal samples per channel in one decoded frame
    pub frame_samples: usize,
}

/// Video stream parameters captured when an input is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoStreamInfo {
    pub descriptor: VideoDescriptor,
    pub time_base: Rational,
    /// Frames per second
    pub frame_rate: Rational,
}

/// Streams of an opened input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamInfo {
    pub audio: Option<AudioStreamInfo>,
    pub video: Option<VideoStreamInfo>,
    /// Total length, when the input knows it
    pub duration: Option<Duration>,
}

impl StreamInfo {
    pub fn has(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio.is_some(),
            MediaKind::Video => self.video.is_some(),
        }
    }

    pub fn time_base(&self, kind: MediaKind) -> Option<Rational> {
        match kind {
            MediaKind::Audio => self.audio.map(|a| a.time_base),
            MediaKind::Video => self.video.map(|v| v.time_base),
        }
    }
}

impl fmt::Display for StreamInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.audio {
            Some(a) => writeln!(
                f,
                "audio: {} ({} samples/frame, time base {})",
                a.descriptor, a.frame_samples, a.time_base
            )?,
            None => writeln!(f, "audio: none")?,
        }
        match &self.video {
            Some(v) => writeln!(
                f,
                "video: {} ({} fps, time base {})",
                v.descriptor, v.frame_rate, v.time_base
            )?,
            None => writeln!(f, "video: none")?,
        }
        match self.duration {
            Some(d) => write!(f, "duration: {:.3}s", d.as_secs_f64()),
            None => write!(f, "duration: unknown"),
        }
    }
}
