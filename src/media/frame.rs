//! Decoded frames and encoded packets

use super::{MediaKind, Rational};

/// A decoded audio or video frame
///
/// Frames are reused: ring buffer slots and consumer scratch frames are
/// allocated once and overwritten in place with [`Frame::copy_from`].
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: MediaKind,
    /// Interleaved samples or packed pixel data
    pub data: Vec<u8>,
    /// Presentation timestamp in `time_base` ticks
    pub pts: i64,
    pub time_base: Rational,
}

impl Frame {
    /// Create an empty frame with `capacity` bytes reserved for payload
    pub fn with_capacity(kind: MediaKind, capacity: usize) -> Self {
        Self {
            kind,
            data: Vec::with_capacity(capacity),
            pts: 0,
            time_base: super::MILLIS,
        }
    }

    pub fn new(kind: MediaKind, data: Vec<u8>, pts: i64, time_base: Rational) -> Self {
        Self {
            kind,
            data,
            pts,
            time_base,
        }
    }

    /// Overwrite this frame with the contents of `other`
    ///
    /// Does not allocate once the payload capacity has grown to fit.
    pub fn copy_from(&mut self, other: &Frame) {
        self.kind = other.kind;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
        self.pts = other.pts;
        self.time_base = other.time_base;
    }

    /// Presentation time in milliseconds
    pub fn pts_ms(&self) -> i64 {
        self.time_base.pts_to_ms(self.pts)
    }
}

/// An encoded unit read from or written to a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: MediaKind,
    pub data: Vec<u8>,
    pub pts: i64,
    pub time_base: Rational,
    /// Decoding can start at this packet
    pub keyframe: bool,
}
