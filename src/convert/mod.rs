//! Frame converters between source and target descriptors

mod audio;
mod video;

pub use audio::{
    decode_samples, encode_samples, f32_to_i16, i16_to_f32, remap_channels, resample_interleaved,
    Resampler,
};
pub use video::{rgb_to_yuv, yuv_to_rgb, Scaler};

use crate::error::Result;
use crate::media::{AudioDescriptor, Frame, VideoDescriptor};

/// Converts audio frames from one descriptor to another
pub trait AudioConverter: Send {
    fn source(&self) -> AudioDescriptor;
    fn target(&self) -> AudioDescriptor;

    /// Convert `input` into `output`, preserving pts and time base
    fn convert(&mut self, input: &Frame, output: &mut Frame) -> Result<()>;
}

/// Converts video frames from one descriptor to another
pub trait VideoConverter: Send {
    fn source(&self) -> VideoDescriptor;
    fn target(&self) -> VideoDescriptor;

    /// Convert `input` into `output`, preserving pts and time base
    fn convert(&mut self, input: &Frame, output: &mut Frame) -> Result<()>;
}

/// Build a converter when `source` and `target` differ
///
/// Returns `Ok(None)` for matching descriptors, meaning frames pass through.
pub fn audio_converter(
    source: AudioDescriptor,
    target: AudioDescriptor,
) -> Result<Option<Box<dyn AudioConverter>>> {
    if source == target {
        return Ok(None);
    }
    Ok(Some(Box::new(Resampler::new(source, target)?)))
}

/// Build a converter when `source` and `target` differ
pub fn video_converter(
    source: VideoDescriptor,
    target: VideoDescriptor,
) -> Result<Option<Box<dyn VideoConverter>>> {
    if source == target {
        return Ok(None);
    }
    Ok(Some(Box::new(Scaler::new(source, target)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{PixelFormat, SampleFormat};

    #[test]
    fn test_passthrough_when_equal() {
        let desc = AudioDescriptor::new(44100, 2, SampleFormat::S16);
        assert!(audio_converter(desc, desc).unwrap().is_none());

        let video = VideoDescriptor::new(320, 240, PixelFormat::Rgba);
        assert!(video_converter(video, video).unwrap().is_none());
    }

    #[test]
    fn test_converter_when_different() {
        let source = AudioDescriptor::new(44100, 2, SampleFormat::S16);
        let target = AudioDescriptor::new(48000, 2, SampleFormat::S16);
        let converter = audio_converter(source, target).unwrap().unwrap();
        assert_eq!(converter.target(), target);
    }

    #[test]
    fn test_invalid_target_fails() {
        let source = VideoDescriptor::new(320, 240, PixelFormat::Rgba);
        let target = VideoDescriptor::new(0, 240, PixelFormat::Rgba);
        assert!(video_converter(source, target).is_err());
    }
}
