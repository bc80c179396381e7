//! Recording sink

use super::{Encoder, RawEncoder, RecorderState, RecordingConfig, RecordingTarget, SampleFifo};
use crate::container::{ContainerWriter, StreamParams};
use crate::convert::{audio_converter, video_converter, AudioConverter, VideoConverter};
use crate::error::{Result, SessionError, SinkError};
use crate::media::{
    rescale, AudioStreamInfo, Frame, MediaKind, Packet, Rational, SampleFormat, VideoStreamInfo,
};
use crate::source::FrameSink;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters of a [`RecordingSink`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub audio_frames: u64,
    pub video_frames: u64,
    pub packets_written: u64,
    /// Frames lost to conversion, encode or write errors
    pub failures: u64,
    /// Frames that arrived while not started
    pub rejected: u64,
}

/// Rechunks audio into the encoder's frame size
struct Rechunker {
    fifo: SampleFifo,
    rate: i32,
    silence: u8,
    /// Output pts of the first queued sample
    start: i64,
    /// Samples handed out since `start`
    consumed: i64,
}

impl Rechunker {
    fn push(&mut self, data: &[u8], pts: i64) {
        if self.fifo.is_empty() {
            self.start = pts;
            self.consumed = 0;
        }
        self.fifo.push(data);
    }

    fn drain(
        &mut self,
        chunk: &mut Frame,
        encoder: &mut dyn Encoder,
        time_base: Rational,
        out: &mut Vec<Packet>,
    ) -> Result<()> {
        while self.fifo.pop_chunk(&mut chunk.data) {
            chunk.pts = self.start + rescale(self.consumed, Rational::new(1, self.rate), time_base);
            chunk.time_base = time_base;
            self.consumed += self.fifo.chunk_samples() as i64;
            encoder.encode(Some(chunk), out)?;
        }
        Ok(())
    }
}

struct AudioTrack {
    stream: usize,
    converter: Option<Box<dyn AudioConverter>>,
    converted: Frame,
    encoder: Box<dyn Encoder>,
    rechunker: Option<Rechunker>,
    chunk: Frame,
    anchor: Option<i64>,
}

impl AudioTrack {
    fn encode(&mut self, frame: &Frame, time_base: Rational, out: &mut Vec<Packet>) -> Result<()> {
        let anchor = *self.anchor.get_or_insert(frame.pts);
        let pts = rescale(frame.pts - anchor, frame.time_base, time_base);

        let input = match &mut self.converter {
            Some(converter) => {
                converter.convert(frame, &mut self.converted)?;
                &self.converted
            }
            None => frame,
        };

        match &mut self.rechunker {
            Some(rechunker) => {
                rechunker.push(&input.data, pts);
                rechunker.drain(&mut self.chunk, self.encoder.as_mut(), time_base, out)
            }
            None => {
                self.chunk.copy_from(input);
                self.chunk.pts = pts;
                self.chunk.time_base = time_base;
                self.encoder.encode(Some(&self.chunk), out)
            }
        }
    }

    fn finish(&mut self, time_base: Rational, out: &mut Vec<Packet>) -> Result<()> {
        if let Some(rechunker) = &mut self.rechunker {
            let padding = rechunker.fifo.pad_remainder(rechunker.silence);
            if padding > 0 {
                debug!("Padded final audio frame with {} samples", padding);
            }
            rechunker.drain(&mut self.chunk, self.encoder.as_mut(), time_base, out)?;
        }
        self.encoder.encode(None, out)
    }
}

struct VideoTrack {
    stream: usize,
    converter: Option<Box<dyn VideoConverter>>,
    converted: Frame,
    encoder: Box<dyn Encoder>,
    anchor: Option<i64>,
}

impl VideoTrack {
    fn encode(&mut self, frame: &Frame, time_base: Rational, out: &mut Vec<Packet>) -> Result<()> {
        let anchor = *self.anchor.get_or_insert(frame.pts);
        let pts = rescale(frame.pts - anchor, frame.time_base, time_base);

        match &mut self.converter {
            Some(converter) => converter.convert(frame, &mut self.converted)?,
            None => self.converted.copy_from(frame),
        }
        self.converted.pts = pts;
        self.converted.time_base = time_base;
        self.encoder.encode(Some(&self.converted), out)
    }

    fn finish(&mut self, out: &mut Vec<Packet>) -> Result<()> {
        self.encoder.encode(None, out)
    }
}

struct Recorder {
    state: RecorderState,
    writer: Option<Box<dyn ContainerWriter>>,
    time_base: Rational,
    audio: Option<AudioTrack>,
    video: Option<VideoTrack>,
    packets: Vec<Packet>,
    stats: RecorderStats,
}

impl Recorder {
    fn write(&mut self, kind: MediaKind, frame: &Frame) -> Result<()> {
        let time_base = self.time_base;
        match kind {
            MediaKind::Audio => match &mut self.audio {
                Some(track) => track.encode(frame, time_base, &mut self.packets)?,
                None => return Err(SessionError::Encode("no audio stream".to_string())),
            },
            MediaKind::Video => match &mut self.video {
                Some(track) => track.encode(frame, time_base, &mut self.packets)?,
                None => return Err(SessionError::Encode("no video stream".to_string())),
            },
        }
        self.write_packets()
    }

    fn write_packets(&mut self) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            self.packets.clear();
            return Err(SessionError::Write("output is closed".to_string()));
        };
        let audio_stream = self.audio.as_ref().map(|t| t.stream);
        let video_stream = self.video.as_ref().map(|t| t.stream);

        for packet in self.packets.drain(..) {
            let stream = match packet.kind {
                MediaKind::Audio => audio_stream,
                MediaKind::Video => video_stream,
            };
            let Some(stream) = stream else {
                continue;
            };
            writer.write_packet(stream, &packet)?;
            self.stats.packets_written += 1;
        }
        Ok(())
    }

    /// Drain encoders and write the trailer
    fn finish(&mut self) -> Result<()> {
        let time_base = self.time_base;
        if let Some(track) = &mut self.audio {
            if let Err(e) = track.finish(time_base, &mut self.packets) {
                warn!("Failed to flush audio encoder: {}", e);
            }
        }
        if let Some(track) = &mut self.video {
            if let Err(e) = track.finish(&mut self.packets) {
                warn!("Failed to flush video encoder: {}", e);
            }
        }
        self.write_packets()?;

        match self.writer.as_mut() {
            Some(writer) => writer.write_trailer(),
            None => Err(SessionError::Write("output is closed".to_string())),
        }
    }
}

/// Encodes and writes every frame it receives, synchronously
///
/// Audio and video arrive through two separate [`FrameSink`] handlers
/// ([`RecordingSink::audio_sink`], [`RecordingSink::video_sink`]) that
/// share one recorder. Output timestamps start at zero on each stream,
/// anchored on the first frame seen.
pub struct RecordingSink {
    name: String,
    inner: Mutex<Recorder>,
}

impl RecordingSink {
    pub fn builder() -> RecordingSinkBuilder {
        RecordingSinkBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RecorderState {
        self.inner.lock().state
    }

    pub fn has_stream(&self, kind: MediaKind) -> bool {
        let inner = self.inner.lock();
        match kind {
            MediaKind::Audio => inner.audio.is_some(),
            MediaKind::Video => inner.video.is_some(),
        }
    }

    pub fn stats(&self) -> RecorderStats {
        self.inner.lock().stats
    }

    /// Write the header and begin accepting frames
    pub fn start(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != RecorderState::Ready {
            warn!("Cannot start recorder '{}' in {} state", self.name, inner.state);
            return false;
        }

        let header = match inner.writer.as_mut() {
            Some(writer) => writer.write_header(),
            None => Err(SessionError::Write("output is closed".to_string())),
        };
        if let Err(e) = header {
            error!("Failed to start recorder '{}': {}", self.name, e);
            return false;
        }

        inner.state = RecorderState::Started;
        info!("Recorder '{}' started", self.name);
        true
    }

    /// Flush encoders, write the trailer and close the output
    ///
    /// Stopping is final. A recorder that never started is closed without
    /// writing anything further.
    pub fn stop(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            RecorderState::Started => {
                if let Err(e) = inner.finish() {
                    error!("Failed to finish recording '{}': {}", self.name, e);
                }
                let stats = inner.stats;
                info!(
                    "Recorder '{}' stopped: {} audio / {} video frames, {} packets, {} failures",
                    self.name, stats.audio_frames, stats.video_frames, stats.packets_written, stats.failures
                );
            }
            RecorderState::Initiate | RecorderState::Ready => {
                info!("Recorder '{}' closed before starting", self.name);
            }
            RecorderState::Stopped => {
                warn!("Recorder '{}' already stopped", self.name);
                return false;
            }
        }

        inner.writer = None;
        inner.state = RecorderState::Stopped;
        true
    }

    /// Encode and write one frame
    pub fn write(&self, kind: MediaKind, frame: &Frame) -> std::result::Result<(), SinkError> {
        let mut inner = self.inner.lock();
        if inner.state != RecorderState::Started {
            inner.stats.rejected += 1;
            debug!("Recorder '{}' is {}, dropping {} frame", self.name, inner.state, kind);
            return Err(SinkError::Closed);
        }

        match inner.write(kind, frame) {
            Ok(()) => {
                match kind {
                    MediaKind::Audio => inner.stats.audio_frames += 1,
                    MediaKind::Video => inner.stats.video_frames += 1,
                }
                Ok(())
            }
            Err(e) => {
                inner.stats.failures += 1;
                warn!("Recorder '{}' dropped {} frame at pts {}: {}", self.name, kind, frame.pts, e);
                Err(SinkError::Failed(e.to_string()))
            }
        }
    }

    /// Handler to register for audio frames
    pub fn audio_sink(self: &Arc<Self>) -> Arc<dyn FrameSink> {
        Arc::new(TrackSink {
            recorder: Arc::clone(self),
            kind: MediaKind::Audio,
            name: format!("{}:audio", self.name),
        })
    }

    /// Handler to register for video frames
    pub fn video_sink(self: &Arc<Self>) -> Arc<dyn FrameSink> {
        Arc::new(TrackSink {
            recorder: Arc::clone(self),
            kind: MediaKind::Video,
            name: format!("{}:video", self.name),
        })
    }
}

struct TrackSink {
    recorder: Arc<RecordingSink>,
    kind: MediaKind,
    name: String,
}

impl FrameSink for TrackSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_frame(&self, frame: &Frame) -> std::result::Result<(), SinkError> {
        self.recorder.write(self.kind, frame)
    }
}

/// Validates settings and opens the output of a [`RecordingSink`]
#[derive(Default)]
pub struct RecordingSinkBuilder {
    name: Option<String>,
    target: Option<RecordingTarget>,
    audio: Option<AudioStreamInfo>,
    video: Option<VideoStreamInfo>,
    config: RecordingConfig,
    audio_encoder: Option<Box<dyn Encoder>>,
    video_encoder: Option<Box<dyn Encoder>>,
}

impl RecordingSinkBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn target(mut self, target: RecordingTarget) -> Self {
        self.target = Some(target);
        self
    }

    /// Record an audio stream decoded as `source`
    pub fn audio(mut self, source: AudioStreamInfo) -> Self {
        self.audio = Some(source);
        self
    }

    /// Record a video stream decoded as `source`
    pub fn video(mut self, source: VideoStreamInfo) -> Self {
        self.video = Some(source);
        self
    }

    pub fn config(mut self, config: RecordingConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `encoder` instead of the raw audio encoder
    pub fn audio_encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.audio_encoder = Some(encoder);
        self
    }

    /// Use `encoder` instead of the raw video encoder
    pub fn video_encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.video_encoder = Some(encoder);
        self
    }

    pub fn build(self) -> Result<Arc<RecordingSink>> {
        let Some(target) = self.target else {
            return Err(SessionError::setup("recording", "no output target"));
        };
        if self.audio.is_none() && self.video.is_none() {
            return Err(SessionError::NoStreams("recording".to_string()));
        }
        let time_base = self.config.time_base;
        if !time_base.is_valid() {
            return Err(SessionError::setup(
                "recording",
                format!("invalid output time base {}", time_base),
            ));
        }

        let audio = match &self.audio {
            Some(source) => Some(Self::audio_parts(source, &self.config, self.audio_encoder)?),
            None => None,
        };
        let video = match &self.video {
            Some(source) => Some(Self::video_parts(source, &self.config, self.video_encoder)?),
            None => None,
        };

        let name = self.name.unwrap_or_else(|| "recording".to_string());
        let mut recorder = Recorder {
            state: RecorderState::Initiate,
            writer: None,
            time_base,
            audio: None,
            video: None,
            packets: Vec::new(),
            stats: RecorderStats::default(),
        };

        let mut writer = target.open()?;
        if let Some((converter, encoder, rechunker)) = audio {
            let stream = writer.add_stream(encoder.params())?;
            recorder.audio = Some(AudioTrack {
                stream,
                converter,
                converted: Frame::with_capacity(MediaKind::Audio, 0),
                encoder,
                rechunker,
                chunk: Frame::with_capacity(MediaKind::Audio, 0),
                anchor: None,
            });
        }
        if let Some((converter, encoder)) = video {
            let stream = writer.add_stream(encoder.params())?;
            recorder.video = Some(VideoTrack {
                stream,
                converter,
                converted: Frame::with_capacity(MediaKind::Video, 0),
                encoder,
                anchor: None,
            });
        }
        recorder.writer = Some(writer);
        recorder.state = RecorderState::Ready;

        info!(
            "Recorder '{}' ready (audio: {}, video: {})",
            name,
            recorder.audio.is_some(),
            recorder.video.is_some()
        );
        Ok(Arc::new(RecordingSink {
            name,
            inner: Mutex::new(recorder),
        }))
    }

    #[allow(clippy::type_complexity)]
    fn audio_parts(
        source: &AudioStreamInfo,
        config: &RecordingConfig,
        encoder: Option<Box<dyn Encoder>>,
    ) -> Result<(Option<Box<dyn AudioConverter>>, Box<dyn Encoder>, Option<Rechunker>)> {
        source.descriptor.validate()?;
        if !source.time_base.is_valid() {
            return Err(SessionError::invalid_descriptor(
                "audio",
                format!("invalid source time base {}", source.time_base),
            ));
        }

        let encoder = match encoder {
            Some(encoder) => encoder,
            None => {
                let target = config.audio_target_for(source);
                let frame_samples = config.audio_frame_samples_for(source);
                let params = StreamParams::Audio(AudioStreamInfo {
                    descriptor: target,
                    time_base: config.time_base,
                    frame_samples,
                });
                Box::new(RawEncoder::new(params, Some(frame_samples))?)
            }
        };
        let StreamParams::Audio(output) = encoder.params() else {
            return Err(SessionError::setup("recording", "audio encoder has video parameters"));
        };

        let converter = audio_converter(source.descriptor, output.descriptor)?;
        let rechunker = encoder.frame_samples().map(|samples| Rechunker {
            fifo: SampleFifo::new(output.descriptor, samples),
            rate: output.descriptor.sample_rate as i32,
            silence: match output.descriptor.format {
                SampleFormat::U8 => 0x80,
                _ => 0,
            },
            start: 0,
            consumed: 0,
        });
        Ok((converter, encoder, rechunker))
    }

    fn video_parts(
        source: &VideoStreamInfo,
        config: &RecordingConfig,
        encoder: Option<Box<dyn Encoder>>,
    ) -> Result<(Option<Box<dyn VideoConverter>>, Box<dyn Encoder>)> {
        source.descriptor.validate()?;
        if !source.time_base.is_valid() {
            return Err(SessionError::invalid_descriptor(
                "video",
                format!("invalid source time base {}", source.time_base),
            ));
        }

        let encoder = match encoder {
            Some(encoder) => encoder,
            None => {
                let params = StreamParams::Video(VideoStreamInfo {
                    descriptor: config.video_target_for(source),
                    time_base: config.time_base,
                    frame_rate: source.frame_rate,
                });
                Box::new(RawEncoder::new(params, None)?)
            }
        };
        let StreamParams::Video(output) = encoder.params() else {
            return Err(SessionError::setup("recording", "video encoder has audio parameters"));
        };

        let converter = video_converter(source.descriptor, output.descriptor)?;
        Ok((converter, encoder))
    }
}
