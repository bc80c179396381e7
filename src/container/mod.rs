//! Container output and the raw `.avr` container format
//!
//! An `.avr` file is a header describing each stream, followed by
//! interleaved length-prefixed packets, followed by a trailer with packet
//! counts and the total duration. All integers are little-endian.

mod reader;
mod writer;

pub use reader::RawContainerReader;
pub use writer::RawContainerWriter;

use crate::error::{Result, SessionError};
use crate::media::{
    AudioDescriptor, AudioStreamInfo, MediaKind, Packet, PixelFormat, Rational, SampleFormat,
    VideoDescriptor, VideoStreamInfo,
};
use std::io::{Read, Write};

/// Parameters of one output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamParams {
    Audio(AudioStreamInfo),
    Video(VideoStreamInfo),
}

impl StreamParams {
    pub fn kind(&self) -> MediaKind {
        match self {
            StreamParams::Audio(_) => MediaKind::Audio,
            StreamParams::Video(_) => MediaKind::Video,
        }
    }

    pub fn time_base(&self) -> Rational {
        match self {
            StreamParams::Audio(a) => a.time_base,
            StreamParams::Video(v) => v.time_base,
        }
    }
}

/// Writes encoded streams into an output container
///
/// Streams are added before the header is written; packets are written in
/// the order they arrive; the trailer finalises and closes the output.
pub trait ContainerWriter: Send {
    /// Declare a stream, returning its index
    fn add_stream(&mut self, params: StreamParams) -> Result<usize>;

    fn write_header(&mut self) -> Result<()>;

    fn write_packet(&mut self, stream: usize, packet: &Packet) -> Result<()>;

    /// Finish the file; the output is closed when the writer is dropped
    fn write_trailer(&mut self) -> Result<()>;
}

pub(crate) const MAGIC: &[u8; 4] = b"AVR1";
pub(crate) const TAG_PACKET: u8 = b'P';
pub(crate) const TAG_TRAILER: u8 = b'T';
pub(crate) const FLAG_KEYFRAME: u8 = 0x01;

/// Largest packet payload accepted by the reader
pub(crate) const MAX_PACKET_BYTES: u32 = 64 * 1024 * 1024;

fn sample_format_code(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::U8 => 0,
        SampleFormat::S16 => 1,
        SampleFormat::S32 => 2,
        SampleFormat::F32 => 3,
    }
}

fn sample_format_from(code: u8) -> Result<SampleFormat> {
    match code {
        0 => Ok(SampleFormat::U8),
        1 => Ok(SampleFormat::S16),
        2 => Ok(SampleFormat::S32),
        3 => Ok(SampleFormat::F32),
        _ => Err(SessionError::invalid_descriptor("audio", format!("unknown sample format {}", code))),
    }
}

fn pixel_format_code(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::Rgb24 => 0,
        PixelFormat::Rgba => 1,
        PixelFormat::Gray8 => 2,
        PixelFormat::Yuv420p => 3,
    }
}

fn pixel_format_from(code: u8) -> Result<PixelFormat> {
    match code {
        0 => Ok(PixelFormat::Rgb24),
        1 => Ok(PixelFormat::Rgba),
        2 => Ok(PixelFormat::Gray8),
        3 => Ok(PixelFormat::Yuv420p),
        _ => Err(SessionError::invalid_descriptor("video", format!("unknown pixel format {}", code))),
    }
}

pub(crate) fn write_stream_params<W: Write>(w: &mut W, params: &StreamParams) -> std::io::Result<()> {
    match params {
        StreamParams::Audio(a) => {
            w.write_all(&[0])?;
            w.write_all(&a.time_base.num.to_le_bytes())?;
            w.write_all(&a.time_base.den.to_le_bytes())?;
            w.write_all(&a.descriptor.sample_rate.to_le_bytes())?;
            w.write_all(&a.descriptor.channels.to_le_bytes())?;
            w.write_all(&[sample_format_code(a.descriptor.format)])?;
            w.write_all(&(a.frame_samples as u32).to_le_bytes())?;
        }
        StreamParams::Video(v) => {
            w.write_all(&[1])?;
            w.write_all(&v.time_base.num.to_le_bytes())?;
            w.write_all(&v.time_base.den.to_le_bytes())?;
            w.write_all(&v.descriptor.width.to_le_bytes())?;
            w.write_all(&v.descriptor.height.to_le_bytes())?;
            w.write_all(&[pixel_format_code(v.descriptor.format)])?;
            w.write_all(&v.frame_rate.num.to_le_bytes())?;
            w.write_all(&v.frame_rate.den.to_le_bytes())?;
        }
    }
    Ok(())
}

pub(crate) fn read_stream_params<R: Read>(r: &mut R) -> Result<StreamParams> {
    let kind = read_u8(r)?;
    let time_base = Rational::new(read_i32(r)?, read_i32(r)?);

    match kind {
        0 => {
            let sample_rate = read_u32(r)?;
            let channels = read_u16(r)?;
            let format = sample_format_from(read_u8(r)?)?;
            let frame_samples = read_u32(r)? as usize;
            Ok(StreamParams::Audio(AudioStreamInfo {
                descriptor: AudioDescriptor::new(sample_rate, channels, format),
                time_base,
                frame_samples,
            }))
        }
        1 => {
            let width = read_u32(r)?;
            let height = read_u32(r)?;
            let format = pixel_format_from(read_u8(r)?)?;
            let frame_rate = Rational::new(read_i32(r)?, read_i32(r)?);
            Ok(StreamParams::Video(VideoStreamInfo {
                descriptor: VideoDescriptor::new(width, height, format),
                time_base,
                frame_rate,
            }))
        }
        _ => Err(SessionError::setup("container reader", format!("unknown stream kind {}", kind))),
    }
}

pub(crate) fn read_u8<R: Read>(r: &mut R) -> std::io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub(crate) fn read_u16<R: Read>(r: &mut R) -> std::io::Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_i32<R: Read>(r: &mut R) -> std::io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub(crate) fn read_i64<R: Read>(r: &mut R) -> std::io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
