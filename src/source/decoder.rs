//! Decoder for raw (uncompressed) packets

use super::Decoder;
use crate::error::{Result, SessionError};
use crate::media::{AudioStreamInfo, Frame, MediaKind, Packet, VideoStreamInfo};

/// Decoder whose packets already carry decoded samples or pixels
///
/// Validates payload sizes against the stream parameters and holds at most
/// one pending frame.
pub struct RawDecoder {
    kind: MediaKind,
    /// Exact payload size for video, sample alignment for audio
    expected: Expected,
    pending: Frame,
    has_pending: bool,
}

enum Expected {
    Multiple(usize),
    Exact(usize),
}

impl RawDecoder {
    pub fn audio(info: &AudioStreamInfo) -> Result<Self> {
        info.descriptor.validate()?;
        let align = info.descriptor.block_align();
        Ok(Self {
            kind: MediaKind::Audio,
            expected: Expected::Multiple(align),
            pending: Frame::with_capacity(MediaKind::Audio, align * info.frame_samples),
            has_pending: false,
        })
    }

    pub fn video(info: &VideoStreamInfo) -> Result<Self> {
        info.descriptor.validate()?;
        let size = info.descriptor.frame_bytes();
        Ok(Self {
            kind: MediaKind::Video,
            expected: Expected::Exact(size),
            pending: Frame::with_capacity(MediaKind::Video, size),
            has_pending: false,
        })
    }
}

impl Decoder for RawDecoder {
    fn feed(&mut self, packet: &Packet) -> Result<()> {
        if packet.kind != self.kind {
            return Err(SessionError::Decode(format!(
                "{} packet sent to {} decoder",
                packet.kind, self.kind
            )));
        }

        let len = packet.data.len();
        let valid = match self.expected {
            Expected::Multiple(align) => len > 0 && len % align == 0,
            Expected::Exact(size) => len == size,
        };
        if !valid {
            return Err(SessionError::Decode(format!(
                "{} packet at pts {} has unexpected size {}",
                self.kind, packet.pts, len
            )));
        }

        self.pending.kind = self.kind;
        self.pending.data.clear();
        self.pending.data.extend_from_slice(&packet.data);
        self.pending.pts = packet.pts;
        self.pending.time_base = packet.time_base;
        self.has_pending = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn receive(&mut self, frame: &mut Frame) -> Result<bool> {
        if !self.has_pending {
            return Ok(false);
        }
        frame.copy_from(&self.pending);
        self.has_pending = false;
        Ok(true)
    }

    fn discard(&mut self) {
        self.has_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioDescriptor, PixelFormat, Rational, SampleFormat, VideoDescriptor};

    fn audio_info() -> AudioStreamInfo {
        AudioStreamInfo {
            descriptor: AudioDescriptor::new(48000, 2, SampleFormat::S16),
            time_base: Rational::new(1, 48000),
            frame_samples: 480,
        }
    }

    fn packet(kind: MediaKind, len: usize, pts: i64) -> Packet {
        Packet {
            kind,
            data: vec![1; len],
            pts,
            time_base: Rational::new(1, 48000),
            keyframe: true,
        }
    }

    #[test]
    fn test_feed_receive() {
        let mut decoder = RawDecoder::audio(&audio_info()).unwrap();
        let mut frame = Frame::with_capacity(MediaKind::Audio, 0);

        assert!(!decoder.receive(&mut frame).unwrap());
        decoder.feed(&packet(MediaKind::Audio, 1920, 480)).unwrap();
        assert!(decoder.receive(&mut frame).unwrap());
        assert_eq!(frame.pts, 480);
        assert_eq!(frame.data.len(), 1920);
        assert!(!decoder.receive(&mut frame).unwrap());
    }

    #[test]
    fn test_rejects_misaligned_audio() {
        let mut decoder = RawDecoder::audio(&audio_info()).unwrap();
        assert!(decoder.feed(&packet(MediaKind::Audio, 1921, 0)).is_err());
        assert!(decoder.feed(&packet(MediaKind::Audio, 0, 0)).is_err());
    }

    #[test]
    fn test_video_size_must_match() {
        let info = VideoStreamInfo {
            descriptor: VideoDescriptor::new(4, 4, PixelFormat::Rgb24),
            time_base: Rational::new(1, 90000),
            frame_rate: Rational::new(25, 1),
        };
        let mut decoder = RawDecoder::video(&info).unwrap();
        assert!(decoder.feed(&packet(MediaKind::Video, 47, 0)).is_err());
        assert!(decoder.feed(&packet(MediaKind::Video, 48, 0)).is_ok());
        assert!(decoder.feed(&packet(MediaKind::Audio, 48, 0)).is_err());
    }

    #[test]
    fn test_discard_drops_pending() {
        let mut decoder = RawDecoder::audio(&audio_info()).unwrap();
        let mut frame = Frame::with_capacity(MediaKind::Audio, 0);
        decoder.feed(&packet(MediaKind::Audio, 4, 0)).unwrap();
        decoder.discard();
        assert!(!decoder.receive(&mut frame).unwrap());
    }
}
