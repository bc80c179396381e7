//! Raw container reader

use super::{
    read_i64, read_stream_params, read_u32, read_u64, read_u8, StreamParams, FLAG_KEYFRAME, MAGIC,
    MAX_PACKET_BYTES, TAG_PACKET, TAG_TRAILER,
};
use crate::error::{Result, SessionError};
use crate::media::{MediaKind, Packet, Rational, StreamInfo};
use crate::source::{Decoder, MediaInput, RawDecoder};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Location of one packet in the file
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    kind: MediaKind,
    /// Offset of the payload
    offset: u64,
    len: u32,
    pts: i64,
    time_ms: i64,
    keyframe: bool,
}

/// Reads `.avr` files written by [`RawContainerWriter`](super::RawContainerWriter)
///
/// The whole file is indexed at open, which gives the duration and makes
/// seeking a lookup.
pub struct RawContainerReader {
    locator: String,
    file: BufReader<File>,
    streams: StreamInfo,
    index: Vec<IndexEntry>,
    next: usize,
}

impl RawContainerReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let locator = path.display().to_string();
        let file = File::open(path).map_err(|e| {
            SessionError::setup("container reader", format!("cannot open {}: {}", locator, e))
        })?;
        let mut file = BufReader::new(file);

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SessionError::setup("container reader", format!("{} is not an avr file", locator)));
        }

        let count = read_u8(&mut file)? as usize;
        let mut params = Vec::with_capacity(count);
        for _ in 0..count {
            params.push(read_stream_params(&mut file)?);
        }

        // First stream of each kind is played, others are skipped
        let mut streams = StreamInfo::default();
        let mut mapping = vec![None; count];
        for (i, p) in params.iter().enumerate() {
            match p {
                StreamParams::Audio(a) if streams.audio.is_none() => {
                    streams.audio = Some(*a);
                    mapping[i] = Some((MediaKind::Audio, a.time_base));
                }
                StreamParams::Video(v) if streams.video.is_none() => {
                    streams.video = Some(*v);
                    mapping[i] = Some((MediaKind::Video, v.time_base));
                }
                _ => debug!("Ignoring extra {} stream {}", p.kind(), i),
            }
        }
        if streams.audio.is_none() && streams.video.is_none() {
            return Err(SessionError::NoStreams(locator));
        }

        let (index, trailer_ms) = Self::build_index(&mut file, &mapping, &locator)?;
        let end_ms = trailer_ms.or_else(|| index.iter().map(|e| e.time_ms).max());
        streams.duration = end_ms.map(|ms| Duration::from_millis(ms.max(0) as u64));

        debug!("Indexed {}: {} packets", locator, index.len());

        Ok(Self {
            locator,
            file,
            streams,
            index,
            next: 0,
        })
    }

    fn build_index(
        file: &mut BufReader<File>,
        mapping: &[Option<(MediaKind, Rational)>],
        locator: &str,
    ) -> Result<(Vec<IndexEntry>, Option<i64>)> {
        let mut index = Vec::new();

        loop {
            let tag = match read_u8(file) {
                Ok(tag) => tag,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!("{} has no trailer, recording may be incomplete", locator);
                    return Ok((index, None));
                }
                Err(e) => return Err(e.into()),
            };

            match tag {
                TAG_PACKET => {
                    let entry = match Self::read_packet_header(file) {
                        Ok(entry) => entry,
                        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                            warn!("{} ends inside a packet", locator);
                            return Ok((index, None));
                        }
                        Err(e) => return Err(e.into()),
                    };
                    let (stream, flags, pts, len) = entry;
                    if len > MAX_PACKET_BYTES {
                        return Err(SessionError::setup(
                            "container reader",
                            format!("packet of {} bytes in {}", len, locator),
                        ));
                    }

                    let offset = file.stream_position()?;
                    file.seek_relative(len as i64)?;

                    if let Some(Some((kind, time_base))) = mapping.get(stream as usize) {
                        index.push(IndexEntry {
                            kind: *kind,
                            offset,
                            len,
                            pts,
                            time_ms: time_base.pts_to_ms(pts),
                            keyframe: flags & FLAG_KEYFRAME != 0,
                        });
                    }
                }
                TAG_TRAILER => {
                    let streams = read_u32(file)?;
                    for _ in 0..streams {
                        read_u64(file)?;
                    }
                    let end_ms = read_i64(file)?;
                    return Ok((index, Some(end_ms)));
                }
                other => {
                    return Err(SessionError::setup(
                        "container reader",
                        format!("unexpected tag {:#x} in {}", other, locator),
                    ))
                }
            }
        }
    }

    fn read_packet_header(file: &mut BufReader<File>) -> std::io::Result<(u8, u8, i64, u32)> {
        let stream = read_u8(file)?;
        let flags = read_u8(file)?;
        let pts = read_i64(file)?;
        let len = read_u32(file)?;
        Ok((stream, flags, pts, len))
    }

    /// Number of indexed packets
    pub fn packet_count(&self) -> usize {
        self.index.len()
    }
}

impl MediaInput for RawContainerReader {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn streams(&self) -> &StreamInfo {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let Some(entry) = self.index.get(self.next).copied() else {
            return Ok(None);
        };
        self.next += 1;

        let mut data = vec![0u8; entry.len as usize];
        self.file.seek(SeekFrom::Start(entry.offset))?;
        self.file.read_exact(&mut data)?;

        let time_base = self
            .streams
            .time_base(entry.kind)
            .unwrap_or(crate::media::MILLIS);
        Ok(Some(Packet {
            kind: entry.kind,
            data,
            pts: entry.pts,
            time_base,
            keyframe: entry.keyframe,
        }))
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let target_ms = position.as_millis() as i64;

        // Anchor on video keyframes when there is video, any packet otherwise
        let anchor_kind = if self.streams.video.is_some() {
            MediaKind::Video
        } else {
            MediaKind::Audio
        };
        let anchor_ms = self
            .index
            .iter()
            .filter(|e| e.kind == anchor_kind && e.keyframe && e.time_ms <= target_ms)
            .map(|e| e.time_ms)
            .max()
            .unwrap_or(0);

        self.next = self
            .index
            .iter()
            .position(|e| e.time_ms >= anchor_ms)
            .unwrap_or(self.index.len());

        debug!(
            "Seeked {} to {}ms (keyframe at {}ms, packet {})",
            self.locator, target_ms, anchor_ms, self.next
        );
        Ok(())
    }

    fn open_decoder(&self, kind: MediaKind) -> Result<Box<dyn Decoder>> {
        match (kind, &self.streams.audio, &self.streams.video) {
            (MediaKind::Audio, Some(info), _) => Ok(Box::new(RawDecoder::audio(info)?)),
            (MediaKind::Video, _, Some(info)) => Ok(Box::new(RawDecoder::video(info)?)),
            _ => Err(SessionError::setup(
                format!("{} decoder", kind),
                format!("{} has no {} stream", self.locator, kind),
            )),
        }
    }
}
