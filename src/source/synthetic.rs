//! Generated test pattern input: a sine tone and moving colour bars

use super::{Decoder, MediaInput, RawDecoder};
use crate::error::{Result, SessionError};
use crate::media::{
    rescale, AudioDescriptor, AudioStreamInfo, MediaKind, Packet, PixelFormat, Rational,
    SampleFormat, StreamInfo, VideoDescriptor, VideoStreamInfo,
};
use std::f64::consts::PI;
use std::time::Duration;
use tracing::debug;

const VIDEO_TIME_BASE: Rational = Rational::new(1, 90000);

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Parameters of the generated streams
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub duration: Duration,
    pub audio: bool,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in each audio packet
    pub frame_samples: usize,
    pub tone_hz: f64,
    pub video: bool,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Video packets between keyframes
    pub gop: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            audio: true,
            sample_rate: 48000,
            channels: 2,
            frame_samples: 1024,
            tone_hz: 440.0,
            video: true,
            width: 320,
            height: 240,
            fps: 30,
            gop: 12,
        }
    }
}

impl SyntheticConfig {
    /// Parse `key=value` pairs separated by commas
    ///
    /// Example: `seconds=5,fps=25,rate=44100,channels=1,width=160,height=120,video=false`
    pub fn parse(params: &str) -> Result<Self> {
        let mut config = Self::default();

        for pair in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                SessionError::UnsupportedInput(format!("malformed parameter '{}'", pair))
            })?;
            let invalid = || SessionError::UnsupportedInput(format!("invalid value for {}: {}", key, value));

            match key {
                "seconds" => {
                    let secs: f64 = value.parse().map_err(|_| invalid())?;
                    if !secs.is_finite() || secs <= 0.0 {
                        return Err(invalid());
                    }
                    config.duration = Duration::from_secs_f64(secs);
                }
                "audio" => config.audio = value.parse().map_err(|_| invalid())?,
                "rate" => config.sample_rate = value.parse().map_err(|_| invalid())?,
                "channels" => config.channels = value.parse().map_err(|_| invalid())?,
                "samples" => config.frame_samples = value.parse().map_err(|_| invalid())?,
                "tone" => config.tone_hz = value.parse().map_err(|_| invalid())?,
                "video" => config.video = value.parse().map_err(|_| invalid())?,
                "width" => config.width = value.parse().map_err(|_| invalid())?,
                "height" => config.height = value.parse().map_err(|_| invalid())?,
                "fps" => config.fps = value.parse().map_err(|_| invalid())?,
                "gop" => config.gop = value.parse().map_err(|_| invalid())?,
                _ => {
                    return Err(SessionError::UnsupportedInput(format!(
                        "unknown parameter '{}'",
                        key
                    )))
                }
            }
        }

        Ok(config)
    }
}

/// Input that generates its packets on the fly
pub struct SyntheticInput {
    locator: String,
    config: SyntheticConfig,
    streams: StreamInfo,
    /// Index of the next audio packet
    audio_index: u64,
    audio_packets: u64,
    /// Index of the next video packet
    video_index: u64,
    video_packets: u64,
}

impl SyntheticInput {
    pub fn new(locator: impl Into<String>, config: SyntheticConfig) -> Result<Self> {
        let locator = locator.into();
        if !config.audio && !config.video {
            return Err(SessionError::NoStreams(locator));
        }
        if config.frame_samples == 0 || config.fps == 0 || config.gop == 0 {
            return Err(SessionError::setup(
                "synthetic input",
                "samples, fps and gop must be positive",
            ));
        }

        let audio = if config.audio {
            let descriptor = AudioDescriptor::new(config.sample_rate, config.channels, SampleFormat::S16);
            descriptor.validate()?;
            Some(AudioStreamInfo {
                descriptor,
                time_base: Rational::new(1, config.sample_rate as i32),
                frame_samples: config.frame_samples,
            })
        } else {
            None
        };

        let video = if config.video {
            let descriptor = VideoDescriptor::new(config.width, config.height, PixelFormat::Rgb24);
            descriptor.validate()?;
            Some(VideoStreamInfo {
                descriptor,
                time_base: VIDEO_TIME_BASE,
                frame_rate: Rational::new(config.fps as i32, 1),
            })
        } else {
            None
        };

        let seconds = config.duration.as_secs_f64();
        let audio_packets = if config.audio {
            (seconds * config.sample_rate as f64 / config.frame_samples as f64).ceil() as u64
        } else {
            0
        };
        let video_packets = if config.video {
            (seconds * config.fps as f64).ceil() as u64
        } else {
            0
        };

        debug!(
            "Synthetic input: {} audio packets, {} video packets",
            audio_packets, video_packets
        );

        Ok(Self {
            locator,
            streams: StreamInfo {
                audio,
                video,
                duration: Some(config.duration),
            },
            config,
            audio_index: 0,
            audio_packets,
            video_index: 0,
            video_packets,
        })
    }

    fn audio_pts(&self, index: u64) -> i64 {
        (index * self.config.frame_samples as u64) as i64
    }

    fn video_pts(&self, index: u64) -> i64 {
        rescale(
            index as i64,
            Rational::new(1, self.config.fps as i32),
            VIDEO_TIME_BASE,
        )
    }

    fn audio_packet(&self, index: u64) -> Packet {
        let channels = self.config.channels as usize;
        let rate = self.config.sample_rate as f64;
        let first = index * self.config.frame_samples as u64;

        let mut data = Vec::with_capacity(self.config.frame_samples * channels * 2);
        for n in 0..self.config.frame_samples as u64 {
            let t = (first + n) as f64 / rate;
            let value = ((2.0 * PI * self.config.tone_hz * t).sin() * 0.25 * 32767.0) as i16;
            for _ in 0..channels {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }

        Packet {
            kind: MediaKind::Audio,
            data,
            pts: self.audio_pts(index),
            time_base: Rational::new(1, self.config.sample_rate as i32),
            keyframe: true,
        }
    }

    fn video_packet(&self, index: u64) -> Packet {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let mut data = Vec::with_capacity(w * h * 3);
        for _ in 0..h {
            for x in 0..w {
                let bar = (x * BARS.len() / w + index as usize) % BARS.len();
                data.extend_from_slice(&BARS[bar]);
            }
        }

        Packet {
            kind: MediaKind::Video,
            data,
            pts: self.video_pts(index),
            time_base: VIDEO_TIME_BASE,
            keyframe: index % self.config.gop as u64 == 0,
        }
    }
}

impl MediaInput for SyntheticInput {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn streams(&self) -> &StreamInfo {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let audio_left = self.audio_index < self.audio_packets;
        let video_left = self.video_index < self.video_packets;

        let take_audio = match (audio_left, video_left) {
            (false, false) => return Ok(None),
            (true, false) => true,
            (false, true) => false,
            (true, true) => {
                let audio_ms =
                    Rational::new(1, self.config.sample_rate as i32).pts_to_ms(self.audio_pts(self.audio_index));
                let video_ms = VIDEO_TIME_BASE.pts_to_ms(self.video_pts(self.video_index));
                audio_ms <= video_ms
            }
        };

        let packet = if take_audio {
            let packet = self.audio_packet(self.audio_index);
            self.audio_index += 1;
            packet
        } else {
            let packet = self.video_packet(self.video_index);
            self.video_index += 1;
            packet
        };
        Ok(Some(packet))
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let position = position.min(self.config.duration);

        // Video lands on the previous keyframe, audio on the frame covering it
        let mut target = position;
        if self.config.video {
            let frame = (position.as_secs_f64() * self.config.fps as f64).floor() as u64;
            let keyframe = frame - frame % self.config.gop as u64;
            self.video_index = keyframe.min(self.video_packets);
            target = Duration::from_secs_f64(keyframe as f64 / self.config.fps as f64);
        }
        if self.config.audio {
            let sample = (target.as_secs_f64() * self.config.sample_rate as f64).floor() as u64;
            self.audio_index = (sample / self.config.frame_samples as u64).min(self.audio_packets);
        }

        debug!(
            "Synthetic input seeked to {:?} (audio packet {}, video packet {})",
            position, self.audio_index, self.video_index
        );
        Ok(())
    }

    fn open_decoder(&self, kind: MediaKind) -> Result<Box<dyn Decoder>> {
        match kind {
            MediaKind::Audio => match &self.streams.audio {
                Some(info) => Ok(Box::new(RawDecoder::audio(info)?)),
                None => Err(SessionError::setup("audio decoder", "input has no audio stream")),
            },
            MediaKind::Video => match &self.streams.video {
                Some(info) => Ok(Box::new(RawDecoder::video(info)?)),
                None => Err(SessionError::setup("video decoder", "input has no video stream")),
            },
        }
    }
}
