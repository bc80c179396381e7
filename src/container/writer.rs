//! Raw container writer

use super::{
    write_stream_params, ContainerWriter, StreamParams, FLAG_KEYFRAME, MAGIC, TAG_PACKET,
    TAG_TRAILER,
};
use crate::error::{Result, SessionError};
use crate::media::{rescale, Packet, MILLIS};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Writes `.avr` files
///
/// Packets go straight to a buffered writer. The trailer flushes it and
/// the file is closed when the writer is dropped.
pub struct RawContainerWriter<W: Write + Send = BufWriter<File>> {
    name: String,
    inner: W,
    streams: Vec<StreamParams>,
    packet_counts: Vec<u64>,
    end_ms: i64,
    header_written: bool,
}

impl RawContainerWriter<BufWriter<File>> {
    /// Create (or truncate) the file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            SessionError::setup("container writer", format!("cannot create {}: {}", path.display(), e))
        })?;
        debug!("Created output file {}", path.display());
        Ok(Self::new(path.display().to_string(), BufWriter::new(file)))
    }
}

impl<W: Write + Send> RawContainerWriter<W> {
    pub fn new(name: impl Into<String>, inner: W) -> Self {
        Self {
            name: name.into(),
            inner,
            streams: Vec::new(),
            packet_counts: Vec::new(),
            end_ms: 0,
            header_written: false,
        }
    }

    /// Give back the underlying writer
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// End time of a packet in milliseconds
    fn packet_end_ms(params: &StreamParams, packet: &Packet) -> i64 {
        let start = rescale(packet.pts, params.time_base(), MILLIS);
        let length = match params {
            StreamParams::Audio(a) => {
                let samples = a.descriptor.samples_in(packet.data.len()) as i64;
                samples * 1000 / a.descriptor.sample_rate.max(1) as i64
            }
            StreamParams::Video(v) if v.frame_rate.is_valid() => {
                1000 * v.frame_rate.den as i64 / v.frame_rate.num as i64
            }
            StreamParams::Video(_) => 0,
        };
        start + length
    }
}

impl<W: Write + Send> ContainerWriter for RawContainerWriter<W> {
    fn add_stream(&mut self, params: StreamParams) -> Result<usize> {
        if self.header_written {
            return Err(SessionError::Write("cannot add a stream after the header".to_string()));
        }
        if !params.time_base().is_valid() {
            return Err(SessionError::setup(
                "container writer",
                format!("invalid time base {}", params.time_base()),
            ));
        }
        self.streams.push(params);
        self.packet_counts.push(0);
        Ok(self.streams.len() - 1)
    }

    fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Err(SessionError::Write("header already written".to_string()));
        }
        if self.streams.is_empty() {
            return Err(SessionError::Write("no streams to write".to_string()));
        }

        let writer = &mut self.inner;
        writer.write_all(MAGIC)?;
        writer.write_all(&[self.streams.len() as u8])?;
        for params in &self.streams {
            write_stream_params(writer, params)?;
        }

        self.header_written = true;
        debug!("Wrote header for {} ({} streams)", self.name, self.streams.len());
        Ok(())
    }

    fn write_packet(&mut self, stream: usize, packet: &Packet) -> Result<()> {
        if !self.header_written {
            return Err(SessionError::Write("packet before header".to_string()));
        }
        let Some(params) = self.streams.get(stream).copied() else {
            return Err(SessionError::Write(format!("no stream {}", stream)));
        };

        let flags = if packet.keyframe { FLAG_KEYFRAME } else { 0 };
        let writer = &mut self.inner;
        writer
            .write_all(&[TAG_PACKET, stream as u8, flags])
            .and_then(|_| writer.write_all(&packet.pts.to_le_bytes()))
            .and_then(|_| writer.write_all(&(packet.data.len() as u32).to_le_bytes()))
            .and_then(|_| writer.write_all(&packet.data))
            .map_err(|e| SessionError::Write(e.to_string()))?;

        self.packet_counts[stream] += 1;
        self.end_ms = self.end_ms.max(Self::packet_end_ms(&params, packet));
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        if !self.header_written {
            return Err(SessionError::Write("trailer before header".to_string()));
        }

        let writer = &mut self.inner;
        writer.write_all(&[TAG_TRAILER])?;
        writer.write_all(&(self.packet_counts.len() as u32).to_le_bytes())?;
        for count in &self.packet_counts {
            writer.write_all(&count.to_le_bytes())?;
        }
        writer.write_all(&self.end_ms.to_le_bytes())?;
        writer.flush()?;

        info!(
            "Finished {}: {} packets, {:.3}s",
            self.name,
            self.packet_counts.iter().sum::<u64>(),
            self.end_ms as f64 / 1000.0
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioDescriptor, AudioStreamInfo, MediaKind, Rational, SampleFormat};

    fn audio_params() -> StreamParams {
        StreamParams::Audio(AudioStreamInfo {
            descriptor: AudioDescriptor::new(1000, 1, SampleFormat::U8),
            time_base: MILLIS,
            frame_samples: 10,
        })
    }

    fn packet(pts: i64) -> Packet {
        Packet {
            kind: MediaKind::Audio,
            data: vec![0; 10],
            pts,
            time_base: MILLIS,
            keyframe: true,
        }
    }

    #[test]
    fn test_write_sequence() {
        let mut writer = RawContainerWriter::new("memory", Vec::new());
        let stream = writer.add_stream(audio_params()).unwrap();
        writer.write_header().unwrap();
        writer.write_packet(stream, &packet(0)).unwrap();
        writer.write_packet(stream, &packet(10)).unwrap();
        writer.write_trailer().unwrap();

        let bytes = writer.into_inner();
        assert_eq!(&bytes[..4], MAGIC);
        // Trailer ends with the duration: two 10ms packets
        let duration = i64::from_le_bytes(bytes[bytes.len() - 8..].try_into().unwrap());
        assert_eq!(duration, 20);
    }

    #[test]
    fn test_order_enforced() {
        let mut writer = RawContainerWriter::new("memory", Vec::new());
        assert!(writer.write_header().is_err());
        let stream = writer.add_stream(audio_params()).unwrap();
        assert!(writer.write_packet(stream, &packet(0)).is_err());
        assert!(writer.write_trailer().is_err());

        writer.write_header().unwrap();
        assert!(writer.add_stream(audio_params()).is_err());
        assert!(writer.write_packet(5, &packet(0)).is_err());
    }

    #[test]
    fn test_rejects_invalid_time_base() {
        let mut writer = RawContainerWriter::new("memory", Vec::new());
        let params = StreamParams::Audio(AudioStreamInfo {
            descriptor: AudioDescriptor::new(1000, 1, SampleFormat::U8),
            time_base: Rational::new(1, 0),
            frame_samples: 10,
        });
        assert!(writer.add_stream(params).is_err());
    }
}
