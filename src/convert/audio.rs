//! Sample format, channel layout and sample rate conversion

use super::AudioConverter;
use crate::error::{Result, SessionError};
use crate::media::{AudioDescriptor, Frame, SampleFormat};

/// Converts f32 samples to i16.
///
/// Uses × 32767 for symmetric scaling; values outside [-1.0, 1.0] are clamped.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts i16 samples to f32 in [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Decode interleaved little-endian samples into f32
pub fn decode_samples(format: SampleFormat, bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    match format {
        SampleFormat::U8 => out.extend(bytes.iter().map(|&b| (f32::from(b) - 128.0) / 128.0)),
        SampleFormat::S16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|c| i16_to_f32(i16::from_le_bytes([c[0], c[1]]))),
        ),
        SampleFormat::S32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0),
        ),
        SampleFormat::F32 => out.extend(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        ),
    }
}

/// Encode f32 samples as interleaved little-endian bytes
pub fn encode_samples(format: SampleFormat, samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * format.bytes_per_sample());
    for &s in samples {
        match format {
            SampleFormat::U8 => out.push((s * 127.0 + 128.0).round().clamp(0.0, 255.0) as u8),
            SampleFormat::S16 => out.extend_from_slice(&f32_to_i16(s).to_le_bytes()),
            SampleFormat::S32 => {
                let v = (f64::from(s) * 2_147_483_647.0).clamp(i32::MIN as f64, i32::MAX as f64);
                out.extend_from_slice(&(v as i32).to_le_bytes());
            }
            SampleFormat::F32 => out.extend_from_slice(&s.to_le_bytes()),
        }
    }
}

/// Remap interleaved samples from `from` channels to `to` channels
///
/// Downmixing averages the folded channels, upmixing repeats the source
/// channels cyclically.
pub fn remap_channels(samples: &[f32], from: usize, to: usize, out: &mut Vec<f32>) {
    out.clear();
    if from == 0 || to == 0 {
        return;
    }
    if from == to {
        out.extend_from_slice(samples);
        return;
    }

    for block in samples.chunks_exact(from) {
        for c in 0..to {
            if to < from {
                let mut sum = 0.0;
                let mut folded = 0;
                let mut k = c;
                while k < from {
                    sum += block[k];
                    folded += 1;
                    k += to;
                }
                out.push(sum / folded as f32);
            } else {
                out.push(block[c % from]);
            }
        }
    }
}

/// Linear-interpolation rate conversion of interleaved samples
pub fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    out: &mut Vec<f32>,
) {
    out.clear();
    if channels == 0 || samples.is_empty() {
        return;
    }
    if from_rate == to_rate {
        out.extend_from_slice(samples);
        return;
    }

    let input_len = samples.len() / channels;
    let output_len =
        ((input_len as u64 * to_rate as u64 + from_rate as u64 / 2) / from_rate as u64) as usize;
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    out.reserve(output_len * channels);

    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let src_idx = (src_pos.floor() as usize).min(input_len - 1);
        let frac = (src_pos - src_idx as f64) as f32;
        let next_idx = (src_idx + 1).min(input_len - 1);

        for c in 0..channels {
            let s1 = samples[src_idx * channels + c];
            let s2 = samples[next_idx * channels + c];
            out.push(s1 + (s2 - s1) * frac);
        }
    }
}

/// Built-in [`AudioConverter`] covering format, layout and rate changes
pub struct Resampler {
    source: AudioDescriptor,
    target: AudioDescriptor,
    decoded: Vec<f32>,
    remapped: Vec<f32>,
    resampled: Vec<f32>,
}

impl Resampler {
    pub fn new(source: AudioDescriptor, target: AudioDescriptor) -> Result<Self> {
        source.validate()?;
        target.validate()?;

        Ok(Self {
            source,
            target,
            decoded: Vec::new(),
            remapped: Vec::new(),
            resampled: Vec::new(),
        })
    }
}

impl AudioConverter for Resampler {
    fn source(&self) -> AudioDescriptor {
        self.source
    }

    fn target(&self) -> AudioDescriptor {
        self.target
    }

    fn convert(&mut self, input: &Frame, output: &mut Frame) -> Result<()> {
        let align = self.source.block_align();
        if input.data.len() % align != 0 {
            return Err(SessionError::Convert(format!(
                "audio payload of {} bytes is not a multiple of {}",
                input.data.len(),
                align
            )));
        }

        decode_samples(self.source.format, &input.data, &mut self.decoded);
        remap_channels(
            &self.decoded,
            self.source.channels as usize,
            self.target.channels as usize,
            &mut self.remapped,
        );
        resample_interleaved(
            &self.remapped,
            self.target.channels as usize,
            self.source.sample_rate,
            self.target.sample_rate,
            &mut self.resampled,
        );

        encode_samples(self.target.format, &self.resampled, &mut output.data);
        output.kind = input.kind;
        output.pts = input.pts;
        output.time_base = input.time_base;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaKind, Rational};

    fn s16_frame(samples: &[i16], pts: i64) -> Frame {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Frame::new(MediaKind::Audio, data, pts, Rational::new(1, 48000))
    }

    #[test]
    fn test_f32_to_i16_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_sample_format_roundtrip() {
        let samples = [0.0f32, 0.5, -0.5, 0.25];
        for format in [SampleFormat::S16, SampleFormat::S32, SampleFormat::F32, SampleFormat::U8] {
            let mut bytes = Vec::new();
            let mut back = Vec::new();
            encode_samples(format, &samples, &mut bytes);
            assert_eq!(bytes.len(), samples.len() * format.bytes_per_sample());
            decode_samples(format, &bytes, &mut back);
            for (a, b) in samples.iter().zip(&back) {
                assert!((a - b).abs() < 0.01, "{:?}: {} vs {}", format, a, b);
            }
        }
    }

    #[test]
    fn test_downmix_to_mono() {
        let mut out = Vec::new();
        remap_channels(&[0.2, 0.4, -1.0, 1.0], 2, 1, &mut out);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!(out[1].abs() < 1e-6);
    }

    #[test]
    fn test_upmix_to_stereo() {
        let mut out = Vec::new();
        remap_channels(&[0.1, 0.2], 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_resample_lengths() {
        let input: Vec<f32> = (0..960).map(|i| i as f32 / 960.0).collect();
        let mut out = Vec::new();

        // 480 stereo samples at 48k -> 44.1k
        resample_interleaved(&input, 2, 48000, 44100, &mut out);
        assert_eq!(out.len(), 441 * 2);

        resample_interleaved(&input, 2, 48000, 16000, &mut out);
        assert_eq!(out.len(), 160 * 2);
    }

    #[test]
    fn test_resample_interpolates() {
        let mut out = Vec::new();
        resample_interleaved(&[0.0, 1.0], 1, 1, 2, &mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resampler_preserves_pts() {
        let source = AudioDescriptor::new(48000, 2, SampleFormat::S16);
        let target = AudioDescriptor::new(24000, 1, SampleFormat::F32);
        let mut resampler = Resampler::new(source, target).unwrap();

        let input = s16_frame(&[1000; 96], 960);
        let mut output = Frame::with_capacity(MediaKind::Audio, 0);
        resampler.convert(&input, &mut output).unwrap();

        assert_eq!(output.pts, 960);
        assert_eq!(output.time_base, input.time_base);
        // 48 stereo samples -> 24 mono f32 samples
        assert_eq!(output.data.len(), 24 * 4);
    }

    #[test]
    fn test_resampler_rejects_partial_sample() {
        let source = AudioDescriptor::new(48000, 2, SampleFormat::S16);
        let target = AudioDescriptor::new(48000, 2, SampleFormat::F32);
        let mut resampler = Resampler::new(source, target).unwrap();

        let input = Frame::new(MediaKind::Audio, vec![0; 7], 0, Rational::new(1, 48000));
        let mut output = Frame::with_capacity(MediaKind::Audio, 0);
        assert!(resampler.convert(&input, &mut output).is_err());
    }
}
