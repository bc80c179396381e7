//! Session - owns one input, its playback path and its recording path
//!
//! A [`Session`] wires a [`SourceReader`] to an [`AudioStage`], a
//! [`VideoStage`] and a [`RecordingSink`], and drives their lifecycles in a
//! fixed order. The decode thread belongs to the reader, the audio thread to
//! the output device; the render thread is whoever calls [`Session::render`].

use crate::config::SessionOptions;
use crate::error::{Result, SessionError};
use crate::media::{AudioDescriptor, MediaKind, StreamInfo, VideoDescriptor};
use crate::playback::{
    AudioDevice, AudioPlayback, AudioStage, AudioStageStats, ClockedAudioDevice, HeadlessRenderer,
    RenderOutcome, Renderer, VideoStage, VideoStageStats,
};
use crate::record::{RecorderStats, RecordingSink, RecordingTarget};
use crate::source::{open_input, MediaInput, ReaderEvent, ReaderState, ReaderStats, SinkId, SourceReader};
use crate::sync::SharedClock;
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Running,
    Paused,
    Stopped,
    /// Sinks released and renderer detached; nothing can be restarted
    TornDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Ready => "ready",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
            SessionState::TornDown => "torn down",
        };
        f.write_str(name)
    }
}

/// Output endpoints handed to a session
///
/// A missing audio device disables audio playback and the video stage then
/// runs without a clock. A missing renderer disables video playback.
#[derive(Default)]
pub struct Collaborators {
    pub audio_device: Option<Box<dyn AudioDevice>>,
    pub renderer: Option<Box<dyn Renderer>>,
}

impl Collaborators {
    /// Software-clocked audio and a headless renderer
    pub fn headless() -> Self {
        Self {
            audio_device: Some(Box::new(ClockedAudioDevice::new())),
            renderer: Some(Box::new(HeadlessRenderer::new())),
        }
    }

    pub fn with_audio_device(mut self, device: Box<dyn AudioDevice>) -> Self {
        self.audio_device = Some(device);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }
}

/// Source streams and the formats each path produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptors {
    pub source: StreamInfo,
    /// Format sent to the audio device
    pub audio_output: Option<AudioDescriptor>,
    /// Format handed to the renderer
    pub video_output: Option<VideoDescriptor>,
    pub recording_audio: Option<AudioDescriptor>,
    pub recording_video: Option<VideoDescriptor>,
}

/// Snapshot of every component's counters
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub state: SessionState,
    pub clock_ms: i64,
    pub reader: ReaderStats,
    pub audio: Option<AudioStageStats>,
    pub video: Option<VideoStageStats>,
    pub recorder: Option<RecorderStats>,
}

/// A running media session
pub struct Session {
    state: Mutex<SessionState>,
    reader: SourceReader,
    clock: Arc<SharedClock>,
    audio: Option<Arc<AudioStage>>,
    playback: Mutex<Option<AudioPlayback>>,
    video: Option<Arc<VideoStage>>,
    /// Held for the whole render call; teardown takes it before dropping
    renderer: Mutex<Option<Box<dyn Renderer>>>,
    video_sink: Mutex<Option<SinkId>>,
    recorder: Option<Arc<RecordingSink>>,
    sinks: Mutex<Vec<(MediaKind, SinkId)>>,
    descriptors: SessionDescriptors,
}

impl Session {
    /// Open `input_locator` with headless playback, recording to `output` if given
    pub fn open(input_locator: &str, output: Option<&Path>, options: SessionOptions) -> Result<Self> {
        let input = open_input(input_locator)?;
        let target = output.map(RecordingTarget::file);
        Self::create(input, target, Collaborators::headless(), options)
    }

    /// Build every component for `input`
    ///
    /// Nothing runs until [`Session::start`]. Any failure drops what was
    /// built so far.
    pub fn create(
        input: Box<dyn MediaInput>,
        output: Option<RecordingTarget>,
        collaborators: Collaborators,
        options: SessionOptions,
    ) -> Result<Self> {
        let SessionOptions {
            reader: reader_config,
            stages,
            recording,
        } = options;
        let reader = SourceReader::new(input, reader_config)?;
        let streams = reader.streams().clone();
        let clock = Arc::new(SharedClock::new());

        let Collaborators {
            audio_device,
            renderer,
        } = collaborators;

        let mut audio = None;
        let mut playback = None;
        if let (Some(source), Some(device)) = (streams.audio, audio_device.as_deref()) {
            let stage = AudioStage::new(
                &source,
                stages.audio_target_for(&source),
                stages.audio_slots,
                clock.clone(),
            )?;
            playback = Some(AudioPlayback::open(device, stage.clone(), stages.period_for(&source))?);
            audio = Some(stage);
        } else if streams.audio.is_some() {
            info!("No audio device, audio playback disabled");
        }

        let mut video = None;
        let mut renderer = renderer.filter(|_| streams.video.is_some());
        match (streams.video, renderer.as_mut()) {
            (Some(source), Some(renderer)) => {
                let video_clock = audio.as_ref().map(|_| clock.clone());
                let stage = VideoStage::new(
                    &source,
                    stages.video_target_for(&source),
                    stages.video_slots,
                    stages.max_video_skip,
                    video_clock,
                )?;
                renderer.init(stage.target())?;
                video = Some(stage);
            }
            (Some(_), None) => info!("No renderer, video playback disabled"),
            (None, _) => {}
        }

        let recorder = match output {
            Some(target) => {
                let mut builder = RecordingSink::builder()
                    .name("recording")
                    .target(target)
                    .config(recording.clone());
                if let Some(source) = streams.audio {
                    builder = builder.audio(source);
                }
                if let Some(source) = streams.video {
                    builder = builder.video(source);
                }
                Some(builder.build()?)
            }
            None => None,
        };

        if audio.is_none() && video.is_none() && recorder.is_none() {
            return Err(SessionError::setup("session", "no playback or recording path"));
        }

        let mut sinks = Vec::new();
        if let Some(stage) = &audio {
            sinks.push((MediaKind::Audio, reader.add_sink(MediaKind::Audio, stage.clone())));
        }
        let video_sink = video
            .as_ref()
            .map(|stage| reader.add_sink(MediaKind::Video, stage.clone()));
        if let Some(recorder) = &recorder {
            if recorder.has_stream(MediaKind::Audio) {
                sinks.push((MediaKind::Audio, reader.add_sink(MediaKind::Audio, recorder.audio_sink())));
            }
            if recorder.has_stream(MediaKind::Video) {
                sinks.push((MediaKind::Video, reader.add_sink(MediaKind::Video, recorder.video_sink())));
            }
        }

        let descriptors = SessionDescriptors {
            source: streams.clone(),
            audio_output: audio.as_ref().map(|stage| stage.target()),
            video_output: video.as_ref().map(|stage| stage.target()),
            recording_audio: recorder
                .as_ref()
                .and(streams.audio)
                .map(|source| recording.audio_target_for(&source)),
            recording_video: recorder
                .as_ref()
                .and(streams.video)
                .map(|source| recording.video_target_for(&source)),
        };

        info!(
            "Session for '{}' ready: audio {}, video {}, recording {}",
            reader.locator(),
            if audio.is_some() { "on" } else { "off" },
            match &video {
                Some(_) if audio.is_some() => "clocked",
                Some(_) => "free-running",
                None => "off",
            },
            if recorder.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            state: Mutex::new(SessionState::Ready),
            reader,
            clock,
            audio,
            playback: Mutex::new(playback),
            video,
            renderer: Mutex::new(renderer),
            video_sink: Mutex::new(video_sink),
            recorder,
            sinks: Mutex::new(sinks),
            descriptors,
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Start recording, audio output and decoding, in that order
    ///
    /// Returns `Ok(false)` when the session is not Ready.
    pub fn start(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if *state != SessionState::Ready {
            warn!("Cannot start session in {} state", *state);
            return Ok(false);
        }

        if let Some(recorder) = &self.recorder {
            if !recorder.start() {
                return Err(SessionError::Write(format!(
                    "recorder '{}' could not write its header",
                    recorder.name()
                )));
            }
        }

        if let Some(playback) = self.playback.lock().as_mut() {
            if let Err(e) = playback.start() {
                if let Some(recorder) = &self.recorder {
                    recorder.stop();
                }
                return Err(e);
            }
        }

        if !self.reader.start() {
            self.stop_outputs();
            *state = SessionState::Stopped;
            return Err(SessionError::setup("session", "source reader did not start"));
        }

        *state = SessionState::Running;
        info!("Session started");
        Ok(true)
    }

    /// Pause decoding and audio output; queued frames stay queued
    pub fn pause(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if *state != SessionState::Running {
            warn!("Cannot pause session in {} state", *state);
            return Ok(false);
        }

        if let Some(playback) = self.playback.lock().as_mut() {
            playback.pause()?;
        }
        self.reader.pause();

        *state = SessionState::Paused;
        info!("Session paused");
        Ok(true)
    }

    pub fn resume(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if *state != SessionState::Paused {
            warn!("Cannot resume session in {} state", *state);
            return Ok(false);
        }

        self.reader.resume();
        if let Some(playback) = self.playback.lock().as_mut() {
            playback.resume()?;
        }

        *state = SessionState::Running;
        info!("Session resumed");
        Ok(true)
    }

    /// Stop decoding, then audio output, then finish the recording
    ///
    /// When this returns the decode thread has exited and the recording is
    /// closed. Returns false if there was nothing to stop.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            SessionState::Ready | SessionState::Running | SessionState::Paused => {}
            SessionState::Stopped | SessionState::TornDown => {
                debug!("Session already {}", *state);
                return false;
            }
        }

        self.reader.stop();
        self.stop_outputs();
        *state = SessionState::Stopped;

        let stats = self.reader.stats();
        info!(
            "Session stopped at {}ms: {} units read, {} frames decoded, {} decode errors",
            self.clock.now_ms(),
            stats.units_read,
            stats.frames_decoded,
            stats.decode_errors
        );
        for sink in &stats.sinks {
            if sink.dropped > 0 {
                warn!("Sink '{}' dropped {} frames", sink.name, sink.dropped);
            }
        }
        true
    }

    fn stop_outputs(&self) {
        if let Some(playback) = self.playback.lock().as_mut() {
            if let Err(e) = playback.stop() {
                error!("Failed to stop audio output: {}", e);
            }
        }
        if let Some(recorder) = &self.recorder {
            recorder.stop();
        }
    }

    /// Jump to `position`
    ///
    /// Playback queues are emptied and the clock moves to the new position
    /// before the first frame after the seek is decoded. Returns `Ok(false)`
    /// when the input cannot seek or the session is over.
    pub fn seek(&self, position: Duration) -> Result<bool> {
        let state = self.state.lock();
        if matches!(*state, SessionState::Stopped | SessionState::TornDown) {
            warn!("Cannot seek session in {} state", *state);
            return Ok(false);
        }

        let target_ms = position.as_millis() as i64;
        self.reader.seek_with(position, || {
            if let Some(stage) = &self.audio {
                stage.reset();
            }
            if let Some(stage) = &self.video {
                stage.reset();
            }
            self.clock.rebase(target_ms);
        })
    }

    /// Present the video frame due now
    ///
    /// Returns `None` without video playback or with no renderer attached.
    pub fn render(&self) -> Option<RenderOutcome> {
        let stage = self.video.as_ref()?;
        let mut renderer = self.renderer.lock();
        let renderer = renderer.as_mut()?;
        Some(stage.render(&mut **renderer))
    }

    /// Attach a renderer, replacing any current one
    ///
    /// The video stage is registered with the reader again if it was
    /// detached; frames queued before the detach are dropped.
    pub fn attach_renderer(&self, mut renderer: Box<dyn Renderer>) -> Result<()> {
        let Some(stage) = &self.video else {
            return Err(SessionError::setup(
                "renderer",
                "session was created without video playback",
            ));
        };
        if self.state() == SessionState::TornDown {
            return Err(SessionError::setup("renderer", "session is torn down"));
        }
        renderer.init(stage.target())?;

        let mut current = self.renderer.lock();
        *current = Some(renderer);

        let mut sink = self.video_sink.lock();
        if sink.is_none() {
            stage.reset();
            *sink = Some(self.reader.add_sink(MediaKind::Video, stage.clone()));
        }
        info!("Renderer attached");
        Ok(())
    }

    /// Remove the renderer; video frames stop being queued for display
    pub fn detach_renderer(&self) -> Option<Box<dyn Renderer>> {
        let renderer = self.renderer.lock().take();
        if let Some(id) = self.video_sink.lock().take() {
            self.reader.remove_sink(MediaKind::Video, id);
        }
        if renderer.is_some() {
            info!("Renderer detached");
        }
        renderer
    }

    /// Stop everything and release every sink and the renderer
    pub fn teardown(&self) {
        if self.state() == SessionState::TornDown {
            return;
        }
        self.stop();

        for (kind, id) in self.sinks.lock().drain(..) {
            self.reader.remove_sink(kind, id);
        }
        if let Some(mut renderer) = self.detach_renderer() {
            renderer.clear();
        }
        self.playback.lock().take();

        *self.state.lock() = SessionState::TornDown;
        info!("Session torn down");
    }

    /// Reader notifications, such as end of input
    pub fn events(&self) -> Receiver<ReaderEvent> {
        self.reader.events()
    }

    pub fn reader_state(&self) -> ReaderState {
        self.reader.state()
    }

    pub fn clock(&self) -> &Arc<SharedClock> {
        &self.clock
    }

    pub fn descriptors(&self) -> &SessionDescriptors {
        &self.descriptors
    }

    pub fn recorder(&self) -> Option<&Arc<RecordingSink>> {
        self.recorder.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state(),
            clock_ms: self.clock.now_ms(),
            reader: self.reader.stats(),
            audio: self.audio.as_ref().map(|stage| stage.stats()),
            video: self.video.as_ref().map(|stage| stage.stats()),
            recorder: self.recorder.as_ref().map(|recorder| recorder.stats()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecorderState;
    use crate::source::{SyntheticConfig, SyntheticInput};

    fn synthetic(seconds: f64) -> Box<dyn MediaInput> {
        let config = SyntheticConfig {
            duration: Duration::from_secs_f64(seconds),
            ..SyntheticConfig::default()
        };
        Box::new(SyntheticInput::new("synth:test", config).unwrap())
    }

    #[test]
    fn test_create_without_outputs_fails() {
        let result = Session::create(synthetic(0.5), None, Collaborators::default(), SessionOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let session = Session::create(
            synthetic(0.5),
            None,
            Collaborators::headless(),
            SessionOptions::default(),
        )
        .unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(!session.pause().unwrap());
        assert!(!session.resume().unwrap());

        assert!(session.start().unwrap());
        assert!(!session.start().unwrap());
        assert!(session.pause().unwrap());
        assert_eq!(session.state(), SessionState::Paused);
        assert!(session.resume().unwrap());

        assert!(session.stop());
        assert!(!session.stop());
        assert_eq!(session.reader_state(), ReaderState::Stopped);

        session.teardown();
        assert_eq!(session.state(), SessionState::TornDown);
        assert!(session.render().is_none());
    }

    #[test]
    fn test_video_is_clocked_only_with_audio() {
        let session = Session::create(
            synthetic(0.5),
            None,
            Collaborators::default().with_renderer(Box::new(HeadlessRenderer::new())),
            SessionOptions::default(),
        )
        .unwrap();
        let descriptors = session.descriptors();
        assert!(descriptors.audio_output.is_none());
        assert!(descriptors.video_output.is_some());
        assert_eq!(session.render(), Some(RenderOutcome::Cleared));
    }

    #[test]
    fn test_detach_and_attach_renderer() {
        let session = Session::create(
            synthetic(0.5),
            None,
            Collaborators::headless(),
            SessionOptions::default(),
        )
        .unwrap();

        assert!(session.detach_renderer().is_some());
        assert!(session.render().is_none());
        assert!(session.detach_renderer().is_none());

        session.attach_renderer(Box::new(HeadlessRenderer::new())).unwrap();
        assert_eq!(session.render(), Some(RenderOutcome::Cleared));
    }

    #[test]
    fn test_recording_only_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.avr");
        let session = Session::create(
            synthetic(0.2),
            Some(RecordingTarget::file(&path)),
            Collaborators::default(),
            SessionOptions::default(),
        )
        .unwrap();

        let recorder = session.recorder().unwrap().clone();
        assert_eq!(recorder.state(), RecorderState::Ready);
        assert!(session.descriptors().recording_audio.is_some());
        assert!(session.attach_renderer(Box::new(HeadlessRenderer::new())).is_err());

        session.start().unwrap();
        assert_eq!(recorder.state(), RecorderState::Started);
        session.stop();
        assert_eq!(recorder.state(), RecorderState::Stopped);
        assert!(path.exists());
    }
}
