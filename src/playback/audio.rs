//! Audio conversion stage and its hardware pull side

use super::device::{AudioDevice, AudioStream, OutputParams, PullCallback};
use crate::buffer::RingBuffer;
use crate::convert::{audio_converter, AudioConverter};
use crate::error::{Result, SinkError};
use crate::media::{AudioDescriptor, AudioStreamInfo, Frame, MediaKind, SampleFormat};
use crate::source::FrameSink;
use crate::sync::SharedClock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

struct Converting {
    converter: Option<Box<dyn AudioConverter>>,
    scratch: Frame,
}

/// Counters of an [`AudioStage`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStageStats {
    pub queued: usize,
    pub frames_played: u64,
    /// Callbacks that could not be filled completely
    pub underruns: u64,
}

/// Buffers decoded audio for a periodic pull callback
///
/// The decode thread pushes through [`FrameSink::on_frame`]; the output
/// device pulls through an [`AudioPuller`]. Each consumed frame advances
/// the shared clock to its presentation time.
pub struct AudioStage {
    ring: RingBuffer,
    converting: Mutex<Converting>,
    target: AudioDescriptor,
    clock: Arc<SharedClock>,
    silence: u8,
    /// Bumped on reset so the puller drops a partially played frame
    epoch: AtomicU64,
    frames_played: AtomicU64,
    underruns: AtomicU64,
}

impl AudioStage {
    pub fn new(
        source: &AudioStreamInfo,
        target: AudioDescriptor,
        capacity: usize,
        clock: Arc<SharedClock>,
    ) -> Result<Arc<Self>> {
        source.descriptor.validate()?;
        target.validate()?;
        let converter = audio_converter(source.descriptor, target)?;

        let target_samples = (source.frame_samples as u64 * target.sample_rate as u64)
            .div_ceil(source.descriptor.sample_rate as u64) as usize
            + 1;
        let slot_bytes = target.bytes_for_samples(target_samples);

        debug!(
            "Audio stage: {} -> {} ({}), {} slots",
            source.descriptor,
            target,
            if converter.is_some() { "converting" } else { "passthrough" },
            capacity
        );

        Ok(Arc::new(Self {
            ring: RingBuffer::new(MediaKind::Audio, capacity, slot_bytes),
            converting: Mutex::new(Converting {
                converter,
                scratch: Frame::with_capacity(MediaKind::Audio, slot_bytes),
            }),
            target,
            clock,
            silence: match target.format {
                SampleFormat::U8 => 0x80,
                _ => 0,
            },
            epoch: AtomicU64::new(0),
            frames_played: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }))
    }

    pub fn target(&self) -> AudioDescriptor {
        self.target
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn clock(&self) -> &Arc<SharedClock> {
        &self.clock
    }

    /// Drop everything queued (seek)
    pub fn reset(&self) {
        self.ring.reset();
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn stats(&self) -> AudioStageStats {
        AudioStageStats {
            queued: self.ring.len(),
            frames_played: self.frames_played.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }

    /// Pull side for the output device callback
    pub fn puller(self: &Arc<Self>) -> AudioPuller {
        AudioPuller {
            stage: Arc::clone(self),
            current: Frame::with_capacity(MediaKind::Audio, self.ring_slot_hint()),
            offset: 0,
            epoch: self.epoch.load(Ordering::Acquire),
        }
    }

    fn ring_slot_hint(&self) -> usize {
        self.converting.lock().scratch.data.capacity()
    }
}

impl FrameSink for AudioStage {
    fn name(&self) -> &str {
        "audio-playback"
    }

    fn on_frame(&self, frame: &Frame) -> std::result::Result<(), SinkError> {
        if self.ring.is_full() {
            return Err(SinkError::Full);
        }

        let mut converting = self.converting.lock();
        let Converting { converter, scratch } = &mut *converting;
        let accepted = match converter {
            Some(converter) => {
                converter
                    .convert(frame, scratch)
                    .map_err(|e| SinkError::Failed(e.to_string()))?;
                self.ring.put(scratch)
            }
            None => self.ring.put(frame),
        };

        if accepted {
            Ok(())
        } else {
            Err(SinkError::Full)
        }
    }
}

/// Consumer end of an [`AudioStage`], owned by the output callback
///
/// Frames need not line up with device periods: a frame that does not fit
/// in the current period is finished in the next one.
pub struct AudioPuller {
    stage: Arc<AudioStage>,
    current: Frame,
    offset: usize,
    epoch: u64,
}

impl AudioPuller {
    /// Fill `out` with queued samples, padding with silence on underrun
    ///
    /// Returns whether `out` was completely filled from queued audio.
    pub fn fill(&mut self, out: &mut [u8]) -> bool {
        let epoch = self.stage.epoch.load(Ordering::Acquire);
        if epoch != self.epoch {
            self.epoch = epoch;
            self.offset = self.current.data.len();
        }

        let mut written = 0;
        while written < out.len() {
            if self.offset >= self.current.data.len() {
                if !self.stage.ring.take(&mut self.current) {
                    break;
                }
                self.offset = 0;
                self.stage.frames_played.fetch_add(1, Ordering::Relaxed);
                self.stage.clock.advance_to(self.current.pts_ms());
            }

            let available = &self.current.data[self.offset..];
            let n = available.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            self.offset += n;
        }

        if written < out.len() {
            out[written..].fill(self.stage.silence);
            self.stage.underruns.fetch_add(1, Ordering::Relaxed);
            trace!("Audio underrun: {} of {} bytes", written, out.len());
            return false;
        }
        true
    }

    pub fn into_callback(mut self) -> PullCallback {
        Box::new(move |out: &mut [u8]| {
            self.fill(out);
        })
    }
}

/// An open output stream fed by an [`AudioStage`]
pub struct AudioPlayback {
    stage: Arc<AudioStage>,
    stream: Box<dyn AudioStream>,
    params: OutputParams,
}

impl AudioPlayback {
    /// Open `device` with the stage's target descriptor
    pub fn open(device: &dyn AudioDevice, stage: Arc<AudioStage>, period_samples: usize) -> Result<Self> {
        let params = OutputParams {
            descriptor: stage.target(),
            period_samples,
        };
        let stream = device.open(params, stage.puller().into_callback())?;
        info!(
            "Opened audio output on {}: {}, {} samples/period",
            device.name(),
            params.descriptor,
            period_samples
        );
        Ok(Self {
            stage,
            stream,
            params,
        })
    }

    pub fn stage(&self) -> &Arc<AudioStage> {
        &self.stage
    }

    pub fn params(&self) -> OutputParams {
        self.params
    }

    pub fn start(&mut self) -> Result<()> {
        self.stream.start()
    }

    pub fn pause(&mut self) -> Result<()> {
        self.stream.pause()
    }

    pub fn resume(&mut self) -> Result<()> {
        self.stream.resume()
    }

    pub fn stop(&mut self) -> Result<()> {
        self.stream.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Rational, MILLIS};

    fn source() -> AudioStreamInfo {
        AudioStreamInfo {
            descriptor: AudioDescriptor::new(1000, 1, SampleFormat::U8),
            time_base: MILLIS,
            frame_samples: 4,
        }
    }

    fn frame(pts: i64, value: u8) -> Frame {
        Frame::new(MediaKind::Audio, vec![value; 4], pts, MILLIS)
    }

    fn passthrough(capacity: usize) -> (Arc<AudioStage>, Arc<SharedClock>) {
        let clock = Arc::new(SharedClock::new());
        let stage = AudioStage::new(&source(), source().descriptor, capacity, clock.clone()).unwrap();
        (stage, clock)
    }

    #[test]
    fn test_full_ring_signals_backpressure() {
        let (stage, _) = passthrough(2);
        assert!(stage.on_frame(&frame(0, 1)).is_ok());
        assert!(stage.on_frame(&frame(4, 2)).is_ok());
        assert_eq!(stage.on_frame(&frame(8, 3)), Err(SinkError::Full));
    }

    #[test]
    fn test_pull_advances_clock() {
        let (stage, clock) = passthrough(10);
        for i in 0..4 {
            stage.on_frame(&frame(i * 4, i as u8 + 1)).unwrap();
        }

        let mut puller = stage.puller();
        let mut out = [0u8; 4];
        assert!(puller.fill(&mut out));
        assert_eq!(out, [1; 4]);
        assert_eq!(clock.now_ms(), 0);
        assert!(clock.is_started());

        assert!(puller.fill(&mut out));
        assert_eq!(out, [2; 4]);
        assert_eq!(clock.now_ms(), 4);
    }

    #[test]
    fn test_partial_frames_carry_over() {
        let (stage, clock) = passthrough(10);
        for i in 0..3 {
            stage.on_frame(&frame(i * 4, i as u8 + 1)).unwrap();
        }

        let mut puller = stage.puller();
        let mut out = [0u8; 6];
        assert!(puller.fill(&mut out));
        assert_eq!(out, [1, 1, 1, 1, 2, 2]);
        assert_eq!(clock.now_ms(), 4);

        assert!(puller.fill(&mut out));
        assert_eq!(out, [2, 2, 3, 3, 3, 3]);
        assert_eq!(clock.now_ms(), 8);
    }

    #[test]
    fn test_underrun_is_silence() {
        let (stage, clock) = passthrough(10);
        let mut puller = stage.puller();
        let mut out = [7u8; 4];

        assert!(!puller.fill(&mut out));
        assert_eq!(out, [0x80; 4]);
        assert!(!clock.is_started());
        assert_eq!(stage.stats().underruns, 1);
    }

    #[test]
    fn test_buffering_holds_back_first_frames() {
        // Threshold is 2 for 10 slots: one queued frame is not enough
        let (stage, _) = passthrough(10);
        stage.on_frame(&frame(0, 1)).unwrap();
        let mut out = [0u8; 4];
        assert!(!stage.puller().fill(&mut out));
        stage.on_frame(&frame(4, 2)).unwrap();
        assert!(stage.puller().fill(&mut out));
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let (stage, _) = passthrough(10);
        stage.on_frame(&frame(0, 1)).unwrap();
        stage.on_frame(&frame(4, 2)).unwrap();

        let mut puller = stage.puller();
        let mut half = [0u8; 2];
        assert!(puller.fill(&mut half));

        stage.reset();
        stage.on_frame(&frame(100, 9)).unwrap();
        stage.on_frame(&frame(104, 9)).unwrap();

        let mut out = [0u8; 4];
        assert!(puller.fill(&mut out));
        assert_eq!(out, [9; 4]);
        assert_eq!(stage.clock().now_ms(), 100);
    }

    #[test]
    fn test_converts_to_target() {
        let clock = Arc::new(SharedClock::new());
        let target = AudioDescriptor::new(1000, 2, SampleFormat::S16);
        let stage = AudioStage::new(&source(), target, 10, clock).unwrap();

        let time_base = Rational::new(1, 1000);
        stage
            .on_frame(&Frame::new(MediaKind::Audio, vec![0x80; 4], 0, time_base))
            .unwrap();
        stage
            .on_frame(&Frame::new(MediaKind::Audio, vec![0x80; 4], 4, time_base))
            .unwrap();

        // Four stereo S16 samples of silence
        let mut out = [1u8; 16];
        assert!(stage.puller().fill(&mut out));
        assert_eq!(out, [0; 16]);
    }
}
