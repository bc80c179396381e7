//! Video conversion stage

use super::renderer::Renderer;
use crate::buffer::RingBuffer;
use crate::convert::{video_converter, VideoConverter};
use crate::error::{Result, SinkError};
use crate::media::{Frame, MediaKind, Rational, VideoDescriptor, VideoStreamInfo};
use crate::source::FrameSink;
use crate::sync::{SharedClock, SyncMonitor, SyncSnapshot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct Converting {
    converter: Option<Box<dyn VideoConverter>>,
    scratch: Frame,
}

struct Presented {
    frame: Frame,
    shown: bool,
}

/// What a render call put on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// A frame newer than the previous one
    NewFrame,
    /// The previous frame again
    Repeated,
    /// Nothing has been shown yet; the surface was cleared
    Cleared,
}

/// Counters of a [`VideoStage`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoStageStats {
    pub queued: usize,
    pub new_frames: u64,
    pub repeated: u64,
    /// Frames dropped to catch up with the clock
    pub skipped: u64,
    pub render_errors: u64,
    pub sync: SyncSnapshot,
}

/// Buffers decoded video for the render call
///
/// With a clock, each render shows the latest queued frame that is due
/// and drops older ones. Without one, frames are shown one per render.
pub struct VideoStage {
    ring: RingBuffer,
    converting: Mutex<Converting>,
    target: VideoDescriptor,
    time_base: Rational,
    clock: Option<Arc<SharedClock>>,
    presented: Mutex<Presented>,
    monitor: SyncMonitor,
    new_frames: AtomicU64,
    repeated: AtomicU64,
    render_errors: AtomicU64,
}

impl VideoStage {
    pub fn new(
        source: &VideoStreamInfo,
        target: VideoDescriptor,
        capacity: usize,
        max_skip: Option<usize>,
        clock: Option<Arc<SharedClock>>,
    ) -> Result<Arc<Self>> {
        source.descriptor.validate()?;
        target.validate()?;
        let converter = video_converter(source.descriptor, target)?;
        let slot_bytes = target.frame_bytes();

        debug!(
            "Video stage: {} -> {}, {} slots, max skip {:?}, {}",
            source.descriptor,
            target,
            capacity,
            max_skip,
            if clock.is_some() { "clocked" } else { "free-running" }
        );

        Ok(Arc::new(Self {
            ring: RingBuffer::new(MediaKind::Video, capacity, slot_bytes).with_max_skip(max_skip),
            converting: Mutex::new(Converting {
                converter,
                scratch: Frame::with_capacity(MediaKind::Video, slot_bytes),
            }),
            target,
            time_base: source.time_base,
            clock,
            presented: Mutex::new(Presented {
                frame: Frame::with_capacity(MediaKind::Video, slot_bytes),
                shown: false,
            }),
            monitor: SyncMonitor::new(),
            new_frames: AtomicU64::new(0),
            repeated: AtomicU64::new(0),
            render_errors: AtomicU64::new(0),
        }))
    }

    pub fn target(&self) -> VideoDescriptor {
        self.target
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// Drop everything queued (seek); the last shown frame stays on screen
    pub fn reset(&self) {
        self.ring.reset();
        self.monitor.reset();
    }

    /// Present the frame due now, or the previous one if none is due
    pub fn render(&self, renderer: &mut dyn Renderer) -> RenderOutcome {
        let mut presented = self.presented.lock();

        let updated = match &self.clock {
            Some(clock) => {
                let target = self.time_base.ms_to_pts(clock.now_ms());
                let taken = self.ring.take_nearest(target, &mut presented.frame);
                if taken {
                    self.monitor.record(presented.frame.pts_ms(), clock.now_ms());
                }
                taken
            }
            None => self.ring.take(&mut presented.frame),
        };

        if updated {
            presented.shown = true;
        } else if !presented.shown {
            renderer.clear();
            return RenderOutcome::Cleared;
        }

        if let Err(e) = renderer.render(&presented.frame, &self.target) {
            self.render_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Render failed: {}", e);
        }

        if updated {
            self.new_frames.fetch_add(1, Ordering::Relaxed);
            RenderOutcome::NewFrame
        } else {
            self.repeated.fetch_add(1, Ordering::Relaxed);
            RenderOutcome::Repeated
        }
    }

    /// Presentation time of the frame currently on screen
    pub fn current_pts(&self) -> Option<i64> {
        let presented = self.presented.lock();
        presented.shown.then_some(presented.frame.pts)
    }

    pub fn stats(&self) -> VideoStageStats {
        VideoStageStats {
            queued: self.ring.len(),
            new_frames: self.new_frames.load(Ordering::Relaxed),
            repeated: self.repeated.load(Ordering::Relaxed),
            skipped: self.ring.skipped_frames(),
            render_errors: self.render_errors.load(Ordering::Relaxed),
            sync: self.monitor.snapshot(),
        }
    }
}

impl FrameSink for VideoStage {
    fn name(&self) -> &str {
        "video-playback"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{PixelFormat, MILLIS};
    use crate::playback::HeadlessRenderer;

    fn source() -> VideoStreamInfo {
        VideoStreamInfo {
            descriptor: VideoDescriptor::new(2, 2, PixelFormat::Gray8),
            time_base: MILLIS,
            frame_rate: Rational::new(50, 1),
        }
    }

    fn frame(pts: i64) -> Frame {
        Frame::new(MediaKind::Video, vec![pts as u8; 4], pts, MILLIS)
    }

    fn renderer() -> HeadlessRenderer {
        let mut renderer = HeadlessRenderer::new();
        renderer.init(source().descriptor).unwrap();
        renderer
    }

    #[test]
    fn test_clears_before_first_frame() {
        let clock = Arc::new(SharedClock::new());
        let stage = VideoStage::new(&source(), source().descriptor, 10, None, Some(clock)).unwrap();
        let mut renderer = renderer();

        assert_eq!(stage.render(&mut renderer), RenderOutcome::Cleared);
        assert_eq!(renderer.cleared(), 1);
        assert_eq!(renderer.presented(), 0);
    }

    #[test]
    fn test_picks_frame_nearest_clock() {
        let clock = Arc::new(SharedClock::new());
        let stage =
            VideoStage::new(&source(), source().descriptor, 10, None, Some(clock.clone())).unwrap();
        for pts in [0, 20, 40, 60, 80] {
            stage.on_frame(&frame(pts)).unwrap();
        }
        let mut renderer = renderer();

        clock.advance_to(45);
        assert_eq!(stage.render(&mut renderer), RenderOutcome::NewFrame);
        assert_eq!(stage.current_pts(), Some(40));
        assert_eq!(stage.stats().skipped, 2);

        // Nothing new is due, same frame again
        assert_eq!(stage.render(&mut renderer), RenderOutcome::Repeated);
        assert_eq!(renderer.last_pts(), Some(40));
        assert_eq!(renderer.presented(), 2);

        clock.advance_to(60);
        assert_eq!(stage.render(&mut renderer), RenderOutcome::NewFrame);
        assert_eq!(stage.current_pts(), Some(60));
        assert_eq!(stage.stats().sync.last_drift_ms, 0);
    }

    #[test]
    fn test_free_running_without_clock() {
        let stage = VideoStage::new(&source(), source().descriptor, 10, None, None).unwrap();
        for pts in [0, 20, 40] {
            stage.on_frame(&frame(pts)).unwrap();
        }
        let mut renderer = renderer();

        stage.render(&mut renderer);
        assert_eq!(stage.current_pts(), Some(0));
        stage.render(&mut renderer);
        assert_eq!(stage.current_pts(), Some(20));
        assert_eq!(stage.stats().skipped, 0);
    }

    #[test]
    fn test_bounded_skip() {
        let clock = Arc::new(SharedClock::new());
        let stage =
            VideoStage::new(&source(), source().descriptor, 20, Some(2), Some(clock.clone())).unwrap();
        for i in 0..10 {
            stage.on_frame(&frame(i * 20)).unwrap();
        }
        let mut renderer = renderer();

        clock.advance_to(1000);
        stage.render(&mut renderer);
        assert_eq!(stage.current_pts(), Some(40));
        stage.render(&mut renderer);
        assert_eq!(stage.current_pts(), Some(100));
    }

    #[test]
    fn test_reset_keeps_last_frame_on_screen() {
        let clock = Arc::new(SharedClock::new());
        let stage =
            VideoStage::new(&source(), source().descriptor, 10, None, Some(clock.clone())).unwrap();
        stage.on_frame(&frame(0)).unwrap();
        stage.on_frame(&frame(20)).unwrap();
        let mut renderer = renderer();
        stage.render(&mut renderer);

        stage.reset();
        assert!(stage.ring().is_empty());
        assert_eq!(stage.render(&mut renderer), RenderOutcome::Repeated);
        assert_eq!(stage.current_pts(), Some(0));
    }

    #[test]
    fn test_full_ring_signals_backpressure() {
        let stage = VideoStage::new(&source(), source().descriptor, 2, None, None).unwrap();
        stage.on_frame(&frame(0)).unwrap();
        stage.on_frame(&frame(20)).unwrap();
        assert_eq!(stage.on_frame(&frame(40)), Err(SinkError::Full));
    }

    #[test]
    fn test_scales_to_target() {
        let target = VideoDescriptor::new(4, 4, PixelFormat::Rgba);
        let stage = VideoStage::new(&source(), target, 10, None, None).unwrap();
        stage.on_frame(&frame(0)).unwrap();
        stage.on_frame(&frame(20)).unwrap();

        let mut renderer = HeadlessRenderer::new();
        renderer.init(target).unwrap();
        assert_eq!(stage.render(&mut renderer), RenderOutcome::NewFrame);
        assert_eq!(stage.stats().render_errors, 0);
    }
}
