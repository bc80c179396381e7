//! Encoders used by the recording path

use crate::container::StreamParams;
use crate::error::{Result, SessionError};
use crate::media::{Frame, Packet};

/// Turns frames into packets for one output stream
///
/// Frame timestamps are already expressed in the output time base of
/// [`Encoder::params`].
pub trait Encoder: Send {
    /// Output stream parameters handed to the container
    fn params(&self) -> StreamParams;

    /// Samples per channel every audio frame must carry, if fixed
    fn frame_samples(&self) -> Option<usize>;

    /// Encode one frame, or drain buffered output when `frame` is `None`
    ///
    /// Produced packets are appended to `out`.
    fn encode(&mut self, frame: Option<&Frame>, out: &mut Vec<Packet>) -> Result<()>;
}

/// Stores frames uncompressed, one packet per frame
#[derive(Debug)]
pub struct RawEncoder {
    params: StreamParams,
    fixed_samples: Option<usize>,
    frames: u64,
}

impl RawEncoder {
    /// `fixed_samples` forces an audio frame size; ignored for video
    pub fn new(params: StreamParams, fixed_samples: Option<usize>) -> Result<Self> {
        match &params {
            StreamParams::Audio(a) => a.descriptor.validate()?,
            StreamParams::Video(v) => v.descriptor.validate()?,
        }
        if !params.time_base().is_valid() {
            return Err(SessionError::setup(
                format!("{} encoder", params.kind()),
                format!("invalid time base {}", params.time_base()),
            ));
        }
        if fixed_samples == Some(0) {
            return Err(SessionError::setup("audio encoder", "frame size is zero"));
        }
        Ok(Self {
            params,
            fixed_samples: match params {
                StreamParams::Audio(_) => fixed_samples,
                StreamParams::Video(_) => None,
            },
            frames: 0,
        })
    }

    /// Frames encoded so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn check_payload(&self, frame: &Frame) -> Result<()> {
        if frame.kind != self.params.kind() {
            return Err(SessionError::Encode(format!(
                "{} frame sent to {} encoder",
                frame.kind,
                self.params.kind()
            )));
        }

        match &self.params {
            StreamParams::Audio(a) => {
                let align = a.descriptor.block_align();
                let expected = self.fixed_samples.map(|n| n * align);
                if frame.data.is_empty() || frame.data.len() % align != 0 {
                    return Err(SessionError::Encode(format!(
                        "audio payload of {} bytes for {}",
                        frame.data.len(),
                        a.descriptor
                    )));
                }
                if let Some(expected) = expected.filter(|&n| n != frame.data.len()) {
                    return Err(SessionError::Encode(format!(
                        "audio frame of {} bytes, encoder needs {}",
                        frame.data.len(),
                        expected
                    )));
                }
            }
            StreamParams::Video(v) => {
                if frame.data.len() != v.descriptor.frame_bytes() {
                    return Err(SessionError::Encode(format!(
                        "video payload of {} bytes for {}",
                        frame.data.len(),
                        v.descriptor
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Encoder for RawEncoder {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn frame_samples(&self) -> Option<usize> {
        self.fixed_samples
    }

    fn encode(&mut self, frame: Option<&Frame>, out: &mut Vec<Packet>) -> Result<()> {
        let Some(frame) = frame else {
            return Ok(());
        };
        self.check_payload(frame)?;

        out.push(Packet {
            kind: frame.kind,
            data: frame.data.clone(),
            pts: frame.pts,
            time_base: self.params.time_base(),
            keyframe: true,
        });
        self.frames += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{
        AudioDescriptor, AudioStreamInfo, MediaKind, PixelFormat, Rational, SampleFormat,
        VideoDescriptor, VideoStreamInfo, MILLIS,
    };

    fn audio_params() -> StreamParams {
        StreamParams::Audio(AudioStreamInfo {
            descriptor: AudioDescriptor::new(8000, 1, SampleFormat::S16),
            time_base: MILLIS,
            frame_samples: 4,
        })
    }

    #[test]
    fn test_one_packet_per_frame() {
        let mut encoder = RawEncoder::new(audio_params(), Some(4)).unwrap();
        let mut packets = Vec::new();

        let frame = Frame::new(MediaKind::Audio, vec![1; 8], 12, MILLIS);
        encoder.encode(Some(&frame), &mut packets).unwrap();
        encoder.encode(None, &mut packets).unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].pts, 12);
        assert_eq!(packets[0].data, vec![1; 8]);
        assert_eq!(encoder.frames(), 1);
    }

    #[test]
    fn test_fixed_frame_size_enforced() {
        let mut encoder = RawEncoder::new(audio_params(), Some(4)).unwrap();
        let mut packets = Vec::new();
        let short = Frame::new(MediaKind::Audio, vec![0; 6], 0, MILLIS);
        assert!(encoder.encode(Some(&short), &mut packets).is_err());
        assert!(packets.is_empty());
    }

    #[test]
    fn test_video_payload_checked() {
        let params = StreamParams::Video(VideoStreamInfo {
            descriptor: VideoDescriptor::new(4, 2, PixelFormat::Yuv420p),
            time_base: MILLIS,
            frame_rate: Rational::new(25, 1),
        });
        let mut encoder = RawEncoder::new(params, Some(99)).unwrap();
        assert_eq!(encoder.frame_samples(), None);

        let mut packets = Vec::new();
        let frame = Frame::new(MediaKind::Video, vec![0; 12], 0, MILLIS);
        encoder.encode(Some(&frame), &mut packets).unwrap();
        let wrong = Frame::new(MediaKind::Video, vec![0; 11], 40, MILLIS);
        assert!(encoder.encode(Some(&wrong), &mut packets).is_err());
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_rejects_bad_setup() {
        assert!(RawEncoder::new(audio_params(), Some(0)).is_err());
        let params = StreamParams::Audio(AudioStreamInfo {
            descriptor: AudioDescriptor::new(8000, 1, SampleFormat::S16),
            time_base: Rational::new(0, 1),
            frame_samples: 4,
        });
        assert!(RawEncoder::new(params, None).is_err());
    }
}
