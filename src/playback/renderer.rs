//! Display renderers

use crate::error::{Result, SessionError};
use crate::media::{Frame, VideoDescriptor};
use tracing::{debug, trace};

/// Presents pictures on some surface
///
/// Called from the render thread only.
pub trait Renderer: Send {
    /// Prepare for pictures of `descriptor`
    fn init(&mut self, descriptor: VideoDescriptor) -> Result<()>;

    /// The output surface changed size
    fn resize(&mut self, width: u32, height: u32);

    /// Blank the surface
    fn clear(&mut self);

    /// Present `frame`, laid out as `descriptor`
    fn render(&mut self, frame: &Frame, descriptor: &VideoDescriptor) -> Result<()>;
}

/// Renderer without a surface; counts what it would have drawn
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    descriptor: Option<VideoDescriptor>,
    viewport: (u32, u32),
    presented: u64,
    cleared: u64,
    last_pts: Option<i64>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `render` calls
    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn cleared(&self) -> u64 {
        self.cleared
    }

    pub fn last_pts(&self) -> Option<i64> {
        self.last_pts
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }
}

impl Renderer for HeadlessRenderer {
    fn init(&mut self, descriptor: VideoDescriptor) -> Result<()> {
        descriptor.validate()?;
        self.descriptor = Some(descriptor);
        self.viewport = (descriptor.width, descriptor.height);
        debug!("Headless renderer initialized for {}", descriptor);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        debug!("Viewport resized to {}x{}", width, height);
    }

    fn clear(&mut self) {
        self.cleared += 1;
    }

    fn render(&mut self, frame: &Frame, descriptor: &VideoDescriptor) -> Result<()> {
        if self.descriptor != Some(*descriptor) {
            return Err(SessionError::invalid_descriptor(
                "video",
                format!("renderer not initialized for {}", descriptor),
            ));
        }
        if frame.data.len() < descriptor.frame_bytes() {
            return Err(SessionError::invalid_descriptor(
                "video",
                format!("{} bytes is too small for {}", frame.data.len(), descriptor),
            ));
        }

        self.presented += 1;
        self.last_pts = Some(frame.pts);
        trace!("Presented frame at pts {}", frame.pts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaKind, PixelFormat, MILLIS};

    #[test]
    fn test_render_requires_init() {
        let desc = VideoDescriptor::new(2, 2, PixelFormat::Gray8);
        let frame = Frame::new(MediaKind::Video, vec![0; 4], 5, MILLIS);
        let mut renderer = HeadlessRenderer::new();

        assert!(renderer.render(&frame, &desc).is_err());
        renderer.init(desc).unwrap();
        renderer.render(&frame, &desc).unwrap();
        assert_eq!(renderer.presented(), 1);
        assert_eq!(renderer.last_pts(), Some(5));
    }

    #[test]
    fn test_resize_and_clear() {
        let mut renderer = HeadlessRenderer::new();
        renderer.init(VideoDescriptor::new(4, 4, PixelFormat::Rgba)).unwrap();
        assert_eq!(renderer.viewport(), (4, 4));
        renderer.resize(1920, 1080);
        renderer.clear();
        assert_eq!(renderer.viewport(), (1920, 1080));
        assert_eq!(renderer.cleared(), 1);
    }
}
