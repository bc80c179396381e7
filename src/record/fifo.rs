//! Sample FIFO for encoders with a fixed frame size

use crate::media::AudioDescriptor;

/// Collects interleaved audio and hands it out in fixed-size chunks
#[derive(Debug)]
pub struct SampleFifo {
    block_align: usize,
    chunk_samples: usize,
    data: Vec<u8>,
    read: usize,
}

impl SampleFifo {
    pub fn new(descriptor: AudioDescriptor, chunk_samples: usize) -> Self {
        let block_align = descriptor.block_align();
        Self {
            block_align,
            chunk_samples,
            data: Vec::with_capacity(block_align * chunk_samples * 2),
            read: 0,
        }
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Queued samples per channel
    pub fn len(&self) -> usize {
        (self.data.len() - self.read) / self.block_align
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.read > 0 && self.read >= self.data.len() / 2 {
            self.data.drain(..self.read);
            self.read = 0;
        }
        let whole = bytes.len() - bytes.len() % self.block_align;
        self.data.extend_from_slice(&bytes[..whole]);
    }

    /// Move the next full chunk into `out`
    pub fn pop_chunk(&mut self, out: &mut Vec<u8>) -> bool {
        let chunk_bytes = self.chunk_samples * self.block_align;
        if self.data.len() - self.read < chunk_bytes {
            return false;
        }
        out.clear();
        out.extend_from_slice(&self.data[self.read..self.read + chunk_bytes]);
        self.read += chunk_bytes;
        true
    }

    /// Pad a partial chunk with `silence` so it can be popped
    ///
    /// Returns the number of padding samples added.
    pub fn pad_remainder(&mut self, silence: u8) -> usize {
        let remainder = self.len() % self.chunk_samples;
        if remainder == 0 {
            return 0;
        }
        let padding = self.chunk_samples - remainder;
        self.data
            .resize(self.data.len() + padding * self.block_align, silence);
        padding
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read = 0;
    }
}
