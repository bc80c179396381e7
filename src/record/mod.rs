//! Recording path: re-encode decoded frames into an output container

mod encoder;
mod fifo;
mod sink;

pub use encoder::{Encoder, RawEncoder};
pub use fifo::SampleFifo;
pub use sink::{RecorderStats, RecordingSink, RecordingSinkBuilder};

use crate::container::{ContainerWriter, RawContainerWriter};
use crate::error::{Result, SessionError};
use crate::media::{
    AudioDescriptor, AudioStreamInfo, PixelFormat, Rational, SampleFormat, VideoDescriptor,
    VideoStreamInfo, MILLIS,
};
use std::fmt;
use std::path::PathBuf;

/// Where a recording goes
pub enum RecordingTarget {
    /// An `.avr` file, created on build
    File(PathBuf),
    /// An already opened container
    Writer(Box<dyn ContainerWriter>),
}

impl RecordingTarget {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        RecordingTarget::File(path.into())
    }

    pub(crate) fn open(self) -> Result<Box<dyn ContainerWriter>> {
        match self {
            RecordingTarget::File(path) => {
                if path.as_os_str().is_empty() {
                    return Err(SessionError::setup("recording", "empty output path"));
                }
                Ok(Box::new(RawContainerWriter::create(&path)?))
            }
            RecordingTarget::Writer(writer) => Ok(writer),
        }
    }
}

impl fmt::Debug for RecordingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingTarget::File(path) => f.debug_tuple("File").field(path).finish(),
            RecordingTarget::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Being configured
    Initiate,
    /// Output opened and encoders configured
    Ready,
    /// Header written, accepting frames
    Started,
    /// Trailer written and output closed
    Stopped,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Initiate => "initiate",
            RecorderState::Ready => "ready",
            RecorderState::Started => "started",
            RecorderState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Output format settings of a recording
///
/// Unset parameters follow the source stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingConfig {
    pub audio_format: SampleFormat,
    pub audio_rate: Option<u32>,
    pub audio_channels: Option<u16>,
    pub video_format: PixelFormat,
    /// Output size as (width, height)
    pub video_size: Option<(u32, u32)>,
    /// Samples per encoded audio frame; `None` uses the source frame size
    pub audio_frame_samples: Option<usize>,
    /// Time base of output timestamps
    pub time_base: Rational,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            audio_format: SampleFormat::F32,
            audio_rate: None,
            audio_channels: None,
            video_format: PixelFormat::Yuv420p,
            video_size: None,
            audio_frame_samples: None,
            time_base: MILLIS,
        }
    }
}

impl RecordingConfig {
    pub fn audio_target_for(&self, source: &AudioStreamInfo) -> AudioDescriptor {
        AudioDescriptor::new(
            self.audio_rate.unwrap_or(source.descriptor.sample_rate),
            self.audio_channels.unwrap_or(source.descriptor.channels),
            self.audio_format,
        )
    }

    pub fn video_target_for(&self, source: &VideoStreamInfo) -> VideoDescriptor {
        let (width, height) = self
            .video_size
            .unwrap_or((source.descriptor.width, source.descriptor.height));
        VideoDescriptor::new(width, height, self.video_format)
    }

    pub fn audio_frame_samples_for(&self, source: &AudioStreamInfo) -> usize {
        self.audio_frame_samples.unwrap_or(source.frame_samples)
    }
}
