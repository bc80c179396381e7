//! Input reading, decoding and frame fan-out

mod decoder;
mod reader;
mod sink;
mod synthetic;

pub use decoder::RawDecoder;
pub use reader::{
    FinishReason, ReaderConfig, ReaderEvent, ReaderState, ReaderStats, SourceReader,
};
pub use sink::{FrameSink, SinkCounters, SinkEntry, SinkId, SinkIdAllocator, SinkSet, SinkStats};
pub use synthetic::{SyntheticConfig, SyntheticInput};

use crate::container::RawContainerReader;
use crate::error::{Result, SessionError};
use crate::media::{Frame, MediaKind, Packet, StreamInfo};
use std::path::Path;
use std::time::Duration;

/// Locator prefix selecting the built-in test pattern input
pub const SYNTHETIC_SCHEME: &str = "synth:";

/// An opened input container
///
/// Stream parameters are known as soon as the input is opened. Packets of
/// all streams come out of one interleaved sequence.
pub trait MediaInput: Send {
    /// Locator the input was opened from
    fn locator(&self) -> &str;

    fn streams(&self) -> &StreamInfo;

    /// Next packet, or `None` at end of input
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Reposition at the last keyframe at or before `position`
    fn seek(&mut self, position: Duration) -> Result<()>;

    /// Create a decoder for the stream of `kind`
    fn open_decoder(&self, kind: MediaKind) -> Result<Box<dyn Decoder>>;
}

/// Turns packets of one stream into frames
pub trait Decoder: Send {
    /// Submit one packet
    fn feed(&mut self, packet: &Packet) -> Result<()>;

    /// Signal end of stream so buffered frames can be drained
    fn flush(&mut self) -> Result<()>;

    /// Write the next decoded frame into `frame`; false when none is ready
    fn receive(&mut self, frame: &mut Frame) -> Result<bool>;

    /// Drop all buffered state, used after a seek
    fn discard(&mut self);
}

/// Open an input from a locator using the built-in readers
///
/// `synth:` locators produce a generated test pattern, paths ending in
/// `.avr` are read with the raw container reader.
pub fn open_input(locator: &str) -> Result<Box<dyn MediaInput>> {
    if let Some(params) = locator.strip_prefix(SYNTHETIC_SCHEME) {
        let config = SyntheticConfig::parse(params)?;
        return Ok(Box::new(SyntheticInput::new(locator, config)?));
    }

    let path = Path::new(locator);
    if path.extension().is_some_and(|ext| ext == "avr") {
        return Ok(Box::new(RawContainerReader::open(path)?));
    }

    Err(SessionError::UnsupportedInput(locator.to_string()))
}
