//! Source reader - decode thread feeding registered sinks

use super::sink::{SinkEntry, SinkIdAllocator, SinkSet, SinkStats};
use super::{open_input, Decoder, FrameSink, MediaInput, SinkId};
use crate::error::{Result, SessionError};
use crate::media::{Frame, MediaKind, StreamInfo};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Reader configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Extra delivery attempts after a sink reports it is full
    pub sink_retry_attempts: u32,
    /// Wait between delivery attempts
    pub sink_retry_interval: Duration,
    /// How often a paused worker re-checks its state
    pub pause_poll: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            sink_retry_attempts: 30,
            sink_retry_interval: Duration::from_millis(10),
            pause_poll: Duration::from_millis(10),
        }
    }
}

/// Reader lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// Opening input and decoders
    Initiate,
    /// Decoders ready, worker not started
    Ready,
    /// Worker decoding and delivering frames
    Running,
    /// Worker idle, frames already delivered stay where they are
    Paused,
    /// Terminal
    Stopped,
}

/// Why the worker thread ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    EndOfInput,
    ReadError(String),
    Stopped,
}

/// Notifications from the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The worker thread exited
    Finished(FinishReason),
}

/// Reader statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub units_read: u64,
    pub frames_decoded: u64,
    pub decode_errors: u64,
    pub sinks: Vec<SinkStats>,
}

/// State and sinks, guarded by one lock
struct Control {
    state: ReaderState,
    audio: SinkSet,
    video: SinkSet,
    ids: SinkIdAllocator,
    /// Seeks waiting for the pipeline; the worker abandons a frame stuck in retry
    seeks_pending: usize,
}

impl Control {
    fn sinks(&self, kind: MediaKind) -> &SinkSet {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    fn sinks_mut(&mut self, kind: MediaKind) -> &mut SinkSet {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

/// Input and decoders, locked per unit by the worker and by seek
struct Pipeline {
    input: Box<dyn MediaInput>,
    audio: Option<Box<dyn Decoder>>,
    video: Option<Box<dyn Decoder>>,
    frame: Frame,
}

#[derive(Default)]
struct Counters {
    units_read: AtomicU64,
    frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
}

struct Shared {
    control: Mutex<Control>,
    /// Signalled on state changes to wake paused or retrying workers
    wake: Condvar,
    pipeline: Mutex<Pipeline>,
    config: ReaderConfig,
    counters: Counters,
    events: Sender<ReaderEvent>,
}

/// Outcome of offering one frame to one sink
enum Offer {
    Accepted,
    Refused,
    Full,
}

/// Outcome of handing decoded frames to the sinks
enum Delivery {
    Complete,
    /// A seek is waiting; the remaining frames predate it
    Interrupted,
    Stopped,
}

/// Outcome of processing one input unit
enum Step {
    Continue,
    Finished(FinishReason),
}

/// Decodes an input on its own thread and pushes frames to sinks
///
/// Construction opens every decoder up front; a reader that fails to
/// construct is never returned. Sinks registered for a stream type receive
/// its frames in decode order, in registration order.
pub struct SourceReader {
    shared: Arc<Shared>,
    streams: StreamInfo,
    locator: String,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: Receiver<ReaderEvent>,
}

impl SourceReader {
    /// Open `locator` with the built-in input readers
    pub fn open(locator: &str, config: ReaderConfig) -> Result<Self> {
        Self::new(open_input(locator)?, config)
    }

    /// Wrap an opened input, creating decoders for its streams
    pub fn new(input: Box<dyn MediaInput>, config: ReaderConfig) -> Result<Self> {
        let locator = input.locator().to_string();
        let streams = input.streams().clone();
        debug!("Source reader for '{}' in {:?} state", locator, ReaderState::Initiate);

        if streams.audio.is_none() && streams.video.is_none() {
            return Err(SessionError::NoStreams(locator));
        }

        let audio = match streams.audio {
            Some(_) => Some(input.open_decoder(MediaKind::Audio)?),
            None => None,
        };
        let video = match streams.video {
            Some(_) => Some(input.open_decoder(MediaKind::Video)?),
            None => None,
        };

        let slot_bytes = streams
            .video
            .map(|v| v.descriptor.frame_bytes())
            .unwrap_or_default();

        let (events_tx, events_rx) = unbounded();
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                state: ReaderState::Ready,
                audio: SinkSet::new(),
                video: SinkSet::new(),
                ids: SinkIdAllocator::default(),
                seeks_pending: 0,
            }),
            wake: Condvar::new(),
            pipeline: Mutex::new(Pipeline {
                input,
                audio,
                video,
                frame: Frame::with_capacity(MediaKind::Video, slot_bytes),
            }),
            config,
            counters: Counters::default(),
            events: events_tx,
        });

        info!("Opened '{}'", locator);
        match &streams.audio {
            Some(a) => info!("Audio stream: {}", a.descriptor),
            None => info!("No audio stream"),
        }
        match &streams.video {
            Some(v) => info!("Video stream: {}", v.descriptor),
            None => info!("No video stream"),
        }

        Ok(Self {
            shared,
            streams,
            locator,
            worker: Mutex::new(None),
            events: events_rx,
        })
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Stream parameters captured at open
    pub fn streams(&self) -> &StreamInfo {
        &self.streams
    }

    pub fn state(&self) -> ReaderState {
        self.shared.control.lock().state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), ReaderState::Running | ReaderState::Paused)
    }

    /// Channel receiving [`ReaderEvent`]s
    pub fn events(&self) -> Receiver<ReaderEvent> {
        self.events.clone()
    }

    /// Register a sink for frames of `kind`
    pub fn add_sink(&self, kind: MediaKind, sink: Arc<dyn FrameSink>) -> SinkId {
        let mut control = self.shared.control.lock();
        let id = control.ids.next_id();
        debug!("Registered {} sink '{}' as {}", kind, sink.name(), id);
        control.sinks_mut(kind).insert(id, sink);
        id
    }

    /// Unregister a sink; returns false if `id` was not registered for `kind`
    pub fn remove_sink(&self, kind: MediaKind, id: SinkId) -> bool {
        let removed = self.shared.control.lock().sinks_mut(kind).remove(id);
        if removed {
            debug!("Removed {} sink {}", kind, id);
        } else {
            warn!("No {} sink registered as {}", kind, id);
        }
        removed
    }

    /// Spawn the worker thread (Ready -> Running)
    pub fn start(&self) -> bool {
        let mut control = self.shared.control.lock();
        if control.state != ReaderState::Ready {
            warn!("Cannot start source reader in {:?} state", control.state);
            return false;
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("source-reader".to_string())
            .spawn(move || run_worker(shared));

        match spawned {
            Ok(handle) => {
                control.state = ReaderState::Running;
                *self.worker.lock() = Some(handle);
                info!("Source reader started");
                true
            }
            Err(e) => {
                error!("Failed to spawn source reader thread: {}", e);
                false
            }
        }
    }

    /// Running -> Paused
    pub fn pause(&self) -> bool {
        let mut control = self.shared.control.lock();
        if control.state != ReaderState::Running {
            warn!("Cannot pause source reader in {:?} state", control.state);
            return false;
        }
        control.state = ReaderState::Paused;
        info!("Source reader paused");
        true
    }

    /// Paused -> Running
    pub fn resume(&self) -> bool {
        let mut control = self.shared.control.lock();
        if control.state != ReaderState::Paused {
            warn!("Cannot resume source reader in {:?} state", control.state);
            return false;
        }
        control.state = ReaderState::Running;
        self.shared.wake.notify_all();
        info!("Source reader resumed");
        true
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Once this returns no sink receives another frame. Returns false if
    /// the reader was already stopped.
    pub fn stop(&self) -> bool {
        let changed = {
            let mut control = self.shared.control.lock();
            let changed = control.state != ReaderState::Stopped;
            control.state = ReaderState::Stopped;
            self.shared.wake.notify_all();
            changed
        };

        if let Some(handle) = self.worker.lock().take() {
            if handle.thread().id() == thread::current().id() {
                warn!("Source reader stopped from its own thread, not joining");
            } else if handle.join().is_err() {
                error!("Source reader thread panicked");
            }
        }

        if changed {
            info!("Source reader stopped");
        }
        changed
    }

    /// Seek to the last keyframe at or before `position`
    ///
    /// Returns `Ok(false)` when the input has no known duration or the
    /// reader is stopped.
    pub fn seek(&self, position: Duration) -> Result<bool> {
        self.seek_with(position, || {})
    }

    /// Seek, then run `after_flush` while the pipeline is still locked
    ///
    /// No frame is decoded between the decoder flush and `after_flush`, so
    /// consumers can drop their queued frames there.
    pub fn seek_with<F: FnOnce()>(&self, position: Duration, after_flush: F) -> Result<bool> {
        let Some(duration) = self.streams.duration else {
            warn!("Cannot seek '{}': duration unknown", self.locator);
            return Ok(false);
        };
        if self.state() == ReaderState::Stopped {
            warn!("Cannot seek source reader in Stopped state");
            return Ok(false);
        }

        let position = position.min(duration);
        {
            let mut control = self.shared.control.lock();
            control.seeks_pending += 1;
            self.shared.wake.notify_all();
        }

        let result = self.seek_pipeline(position, after_flush);

        {
            let mut control = self.shared.control.lock();
            control.seeks_pending -= 1;
            self.shared.wake.notify_all();
        }
        result?;
        info!("Seeked to {:.3}s", position.as_secs_f64());
        Ok(true)
    }

    fn seek_pipeline<F: FnOnce()>(&self, position: Duration, after_flush: F) -> Result<()> {
        let mut pipeline = self.shared.pipeline.lock();
        pipeline.input.seek(position)?;
        if let Some(decoder) = pipeline.audio.as_mut() {
            decoder.discard();
        }
        if let Some(decoder) = pipeline.video.as_mut() {
            decoder.discard();
        }
        after_flush();
        Ok(())
    }

    pub fn stats(&self) -> ReaderStats {
        let counters = &self.shared.counters;
        let control = self.shared.control.lock();
        let mut sinks = control.audio.stats(MediaKind::Audio);
        sinks.extend(control.video.stats(MediaKind::Video));

        ReaderStats {
            units_read: counters.units_read.load(Ordering::Relaxed),
            frames_decoded: counters.frames_decoded.load(Ordering::Relaxed),
            decode_errors: counters.decode_errors.load(Ordering::Relaxed),
            sinks,
        }
    }
}

impl Drop for SourceReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: Arc<Shared>) {
    info!("Source reader thread started");

    let reason = loop {
        {
            let mut control = shared.control.lock();
            match control.state {
                ReaderState::Stopped => break FinishReason::Stopped,
                ReaderState::Paused => {
                    shared.wake.wait_for(&mut control, shared.config.pause_poll);
                    continue;
                }
                _ if control.seeks_pending > 0 => {
                    shared.wake.wait_for(&mut control, shared.config.pause_poll);
                    continue;
                }
                _ => {}
            }
        }

        let mut pipeline = shared.pipeline.lock();
        if let Step::Finished(reason) = process_unit(&shared, &mut pipeline) {
            break reason;
        }
    };

    shared.control.lock().state = ReaderState::Stopped;

    let counters = &shared.counters;
    info!(
        "Source reader thread exiting ({:?}): {} units, {} frames, {} decode errors",
        reason,
        counters.units_read.load(Ordering::Relaxed),
        counters.frames_decoded.load(Ordering::Relaxed),
        counters.decode_errors.load(Ordering::Relaxed)
    );
    let _ = shared.events.send(ReaderEvent::Finished(reason));
}

fn process_unit(shared: &Shared, pipeline: &mut Pipeline) -> Step {
    let packet = match pipeline.input.read_packet() {
        Ok(Some(packet)) => packet,
        Ok(None) => {
            debug!("End of input, draining decoders");
            return drain(shared, pipeline);
        }
        Err(e) => {
            error!("Failed to read input: {}", e);
            return Step::Finished(FinishReason::ReadError(e.to_string()));
        }
    };
    shared.counters.units_read.fetch_add(1, Ordering::Relaxed);

    let kind = packet.kind;
    let Pipeline {
        audio, video, frame, ..
    } = pipeline;
    let decoder = match kind {
        MediaKind::Audio => audio.as_mut(),
        MediaKind::Video => video.as_mut(),
    };
    let Some(decoder) = decoder else {
        trace!("Skipping {} unit without decoder", kind);
        return Step::Continue;
    };

    if let Err(e) = decoder.feed(&packet) {
        if !e.is_recoverable() {
            error!("{} decoder failed: {}", kind, e);
            return Step::Finished(FinishReason::ReadError(e.to_string()));
        }
        warn!("Dropping {} unit at pts {}: {}", kind, packet.pts, e);
        shared.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
        return Step::Continue;
    }

    match deliver_decoded(shared, kind, decoder.as_mut(), frame) {
        Delivery::Complete | Delivery::Interrupted => Step::Continue,
        Delivery::Stopped => Step::Finished(FinishReason::Stopped),
    }
}

fn drain(shared: &Shared, pipeline: &mut Pipeline) -> Step {
    let Pipeline {
        audio, video, frame, ..
    } = pipeline;

    for (kind, decoder) in [(MediaKind::Audio, audio), (MediaKind::Video, video)] {
        let Some(decoder) = decoder.as_mut() else {
            continue;
        };
        if let Err(e) = decoder.flush() {
            warn!("Failed to flush {} decoder: {}", kind, e);
            continue;
        }
        match deliver_decoded(shared, kind, decoder.as_mut(), frame) {
            Delivery::Complete => {}
            // The seek restarts reading, so the input has not ended
            Delivery::Interrupted => return Step::Continue,
            Delivery::Stopped => return Step::Finished(FinishReason::Stopped),
        }
    }
    Step::Finished(FinishReason::EndOfInput)
}

/// Pull every ready frame out of `decoder` and fan it out
fn deliver_decoded(
    shared: &Shared,
    kind: MediaKind,
    decoder: &mut dyn Decoder,
    frame: &mut Frame,
) -> Delivery {
    loop {
        match decoder.receive(frame) {
            Ok(true) => {
                shared.counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
                match fan_out(shared, kind, frame) {
                    Delivery::Complete => {}
                    other => return other,
                }
            }
            Ok(false) => return Delivery::Complete,
            Err(e) => {
                warn!("Failed to decode {} frame: {}", kind, e);
                shared.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                return Delivery::Complete;
            }
        }
    }
}

/// Deliver one frame to every sink of `kind`
///
/// Every sink gets a first attempt before the reader waits on any full
/// sink, and only the sinks that were full are retried. A pending seek
/// ends the retries so the seek can take the pipeline.
fn fan_out(shared: &Shared, kind: MediaKind, frame: &Frame) -> Delivery {
    let sinks = shared.control.lock().sinks(kind).snapshot();

    let mut pending: Vec<&SinkEntry> = Vec::new();
    for entry in sinks.iter() {
        if let Offer::Full = offer(entry, frame) {
            pending.push(entry);
        }
    }

    let mut retries_left = shared.config.sink_retry_attempts;
    while !pending.is_empty() {
        {
            let mut control = shared.control.lock();
            if control.seeks_pending > 0 && control.state != ReaderState::Stopped {
                trace!("Seek pending, abandoning frame at pts {}", frame.pts);
                return Delivery::Interrupted;
            }
            match control.state {
                ReaderState::Stopped => return Delivery::Stopped,
                // Paused waits do not count against the retry budget
                ReaderState::Paused => {}
                _ if retries_left == 0 => {
                    for entry in pending.drain(..) {
                        trace!(
                            "Sink '{}' still full, dropping frame at pts {}",
                            entry.sink.name(),
                            frame.pts
                        );
                        entry.counters.record_dropped();
                    }
                    break;
                }
                _ => retries_left -= 1,
            }

            shared
                .wake
                .wait_for(&mut control, shared.config.sink_retry_interval);
            if control.state == ReaderState::Stopped {
                return Delivery::Stopped;
            }
        }

        pending.retain(|entry| matches!(offer(entry, frame), Offer::Full));
    }
    Delivery::Complete
}

/// Hand `frame` to one sink once, updating its counters unless it was full
fn offer(entry: &SinkEntry, frame: &Frame) -> Offer {
    match entry.sink.on_frame(frame) {
        Ok(()) => {
            entry.counters.record_delivered();
            Offer::Accepted
        }
        Err(e) if e.is_retryable() => Offer::Full,
        Err(e) => {
            debug!("Sink '{}' refused frame at pts {}: {}", entry.sink.name(), frame.pts, e);
            entry.counters.record_dropped();
            Offer::Refused
        }
    }
}
