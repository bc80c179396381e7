//! Playback path: conversion stages, audio output and rendering
//!
//! The decode thread pushes into an [`AudioStage`] and a [`VideoStage`].
//! The audio device pulls from its stage once per period and moves the
//! [`SharedClock`](crate::sync::SharedClock); the render call pulls the
//! video frame that matches the clock.

mod audio;
mod device;
mod renderer;
mod video;

pub use audio::{AudioPlayback, AudioPuller, AudioStage, AudioStageStats};
pub use device::{AudioDevice, AudioStream, ClockedAudioDevice, OutputParams, PullCallback};
pub use renderer::{HeadlessRenderer, Renderer};
pub use video::{RenderOutcome, VideoStage, VideoStageStats};

use crate::buffer::{DEFAULT_AUDIO_SLOTS, DEFAULT_VIDEO_SLOTS};
use crate::media::{
    AudioDescriptor, AudioStreamInfo, PixelFormat, SampleFormat, VideoDescriptor, VideoStreamInfo,
};

/// Playback stage settings
///
/// Unset output parameters follow the source stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageConfig {
    pub audio_slots: usize,
    pub video_slots: usize,
    pub audio_rate: Option<u32>,
    pub audio_channels: Option<u16>,
    pub audio_format: SampleFormat,
    /// Samples per device period; `None` matches the source frame size
    pub period_samples: Option<usize>,
    /// Render size as (width, height)
    pub video_size: Option<(u32, u32)>,
    pub video_format: Option<PixelFormat>,
    /// Most frames a single render may drop to catch up; `None` is unbounded
    pub max_video_skip: Option<usize>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            audio_slots: DEFAULT_AUDIO_SLOTS,
            video_slots: DEFAULT_VIDEO_SLOTS,
            audio_rate: None,
            audio_channels: None,
            audio_format: SampleFormat::S16,
            period_samples: None,
            video_size: None,
            video_format: None,
            max_video_skip: None,
        }
    }
}

impl StageConfig {
    pub fn audio_target_for(&self, source: &AudioStreamInfo) -> AudioDescriptor {
        AudioDescriptor::new(
            self.audio_rate.unwrap_or(source.descriptor.sample_rate),
            self.audio_channels.unwrap_or(source.descriptor.channels),
            self.audio_format,
        )
    }

    /// Device period, scaled to the output rate
    pub fn period_for(&self, source: &AudioStreamInfo) -> usize {
        if let Some(samples) = self.period_samples {
            return samples;
        }
        let target_rate = self.audio_target_for(source).sample_rate as u64;
        let source_rate = source.descriptor.sample_rate.max(1) as u64;
        ((source.frame_samples as u64 * target_rate + source_rate / 2) / source_rate).max(1) as usize
    }

    pub fn video_target_for(&self, source: &VideoStreamInfo) -> VideoDescriptor {
        let (width, height) = self
            .video_size
            .unwrap_or((source.descriptor.width, source.descriptor.height));
        VideoDescriptor::new(width, height, self.video_format.unwrap_or(source.descriptor.format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Rational;

    fn audio_source() -> AudioStreamInfo {
        AudioStreamInfo {
            descriptor: AudioDescriptor::new(44100, 2, SampleFormat::F32),
            time_base: Rational::new(1, 44100),
            frame_samples: 1024,
        }
    }

    #[test]
    fn test_defaults_follow_source() {
        let config = StageConfig::default();
        let source = audio_source();
        assert_eq!(
            config.audio_target_for(&source),
            AudioDescriptor::new(44100, 2, SampleFormat::S16)
        );
        assert_eq!(config.period_for(&source), 1024);

        let video = VideoStreamInfo {
            descriptor: VideoDescriptor::new(320, 240, PixelFormat::Yuv420p),
            time_base: Rational::new(1, 90000),
            frame_rate: Rational::new(30, 1),
        };
        assert_eq!(config.video_target_for(&video), video.descriptor);

        let resized = StageConfig {
            video_size: Some((160, 120)),
            video_format: Some(PixelFormat::Rgba),
            ..StageConfig::default()
        };
        assert_eq!(
            resized.video_target_for(&video),
            VideoDescriptor::new(160, 120, PixelFormat::Rgba)
        );
    }

    #[test]
    fn test_period_scales_with_output_rate() {
        let config = StageConfig {
            audio_rate: Some(48000),
            ..StageConfig::default()
        };
        // 1024 * 48000 / 44100 = 1114.6
        assert_eq!(config.period_for(&audio_source()), 1115);
    }
}
