//! Pixel format conversion and nearest-neighbour scaling

use super::VideoConverter;
use crate::error::{Result, SessionError};
use crate::media::{Frame, PixelFormat, VideoDescriptor};

#[inline]
fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Full-range BT.601 YUV to RGB
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let (y, u, v) = (f32::from(y), f32::from(u) - 128.0, f32::from(v) - 128.0);
    [
        clamp_u8(y + 1.402 * v),
        clamp_u8(y - 0.344_136 * u - 0.714_136 * v),
        clamp_u8(y + 1.772 * u),
    ]
}

/// Full-range BT.601 RGB to YUV
#[inline]
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
    [
        clamp_u8(0.299 * r + 0.587 * g + 0.114 * b),
        clamp_u8(-0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0),
        clamp_u8(0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0),
    ]
}

/// Read pixel (x, y) of a picture as RGBA
fn sample_rgba(desc: &VideoDescriptor, data: &[u8], x: usize, y: usize) -> [u8; 4] {
    let w = desc.width as usize;
    match desc.format {
        PixelFormat::Rgb24 => {
            let i = (y * w + x) * 3;
            [data[i], data[i + 1], data[i + 2], 255]
        }
        PixelFormat::Rgba => {
            let i = (y * w + x) * 4;
            [data[i], data[i + 1], data[i + 2], data[i + 3]]
        }
        PixelFormat::Gray8 => {
            let l = data[y * w + x];
            [l, l, l, 255]
        }
        PixelFormat::Yuv420p => {
            let h = desc.height as usize;
            let cw = w.div_ceil(2);
            let luma = w * h;
            let chroma = cw * h.div_ceil(2);
            let ci = (y / 2) * cw + x / 2;
            let [r, g, b] = yuv_to_rgb(data[y * w + x], data[luma + ci], data[luma + chroma + ci]);
            [r, g, b, 255]
        }
    }
}

/// Write an RGBA picture into `out` using `desc` layout
fn store_rgba(desc: &VideoDescriptor, rgba: &[u8], out: &mut Vec<u8>) {
    let (w, h) = (desc.width as usize, desc.height as usize);
    out.clear();
    match desc.format {
        PixelFormat::Rgba => out.extend_from_slice(rgba),
        PixelFormat::Rgb24 => {
            for px in rgba.chunks_exact(4) {
                out.extend_from_slice(&px[..3]);
            }
        }
        PixelFormat::Gray8 => {
            for px in rgba.chunks_exact(4) {
                out.push(rgb_to_yuv(px[0], px[1], px[2])[0]);
            }
        }
        PixelFormat::Yuv420p => {
            let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
            out.resize(desc.frame_bytes(), 0);
            let (luma, chroma) = out.split_at_mut(w * h);
            let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

            for y in 0..h {
                for x in 0..w {
                    let i = (y * w + x) * 4;
                    let [l, u, v] = rgb_to_yuv(rgba[i], rgba[i + 1], rgba[i + 2]);
                    luma[y * w + x] = l;
                    // Chroma sampled from the top-left pixel of each 2x2 block
                    if x % 2 == 0 && y % 2 == 0 {
                        let ci = (y / 2) * cw + x / 2;
                        u_plane[ci] = u;
                        v_plane[ci] = v;
                    }
                }
            }
        }
    }
}

/// Built-in [`VideoConverter`] covering pixel format and size changes
pub struct Scaler {
    source: VideoDescriptor,
    target: VideoDescriptor,
    rgba: Vec<u8>,
}

impl Scaler {
    pub fn new(source: VideoDescriptor, target: VideoDescriptor) -> Result<Self> {
        source.validate()?;
        target.validate()?;

        Ok(Self {
            source,
            target,
            rgba: Vec::new(),
        })
    }
}

impl VideoConverter for Scaler {
    fn source(&self) -> VideoDescriptor {
        self.source
    }

    fn target(&self) -> VideoDescriptor {
        self.target
    }

    fn convert(&mut self, input: &Frame, output: &mut Frame) -> Result<()> {
        let expected = self.source.frame_bytes();
        if input.data.len() < expected {
            return Err(SessionError::Convert(format!(
                "video payload of {} bytes is smaller than {} for {}",
                input.data.len(),
                expected,
                self.source
            )));
        }

        let (sw, sh) = (self.source.width as usize, self.source.height as usize);
        let (dw, dh) = (self.target.width as usize, self.target.height as usize);

        self.rgba.clear();
        self.rgba.reserve(dw * dh * 4);
        for y in 0..dh {
            let sy = y * sh / dh;
            for x in 0..dw {
                let sx = x * sw / dw;
                self.rgba
                    .extend_from_slice(&sample_rgba(&self.source, &input.data, sx, sy));
            }
        }

        store_rgba(&self.target, &self.rgba, &mut output.data);
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

    fn solid(desc: VideoDescriptor, rgb: [u8; 3]) -> Frame {
        let mut rgba = Vec::new();
        for _ in 0..desc.width * desc.height {
            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        let mut data = Vec::new();
        store_rgba(&desc, &rgba, &mut data);
        Frame::new(MediaKind::Video, data, 7, Rational::new(1, 90000))
    }

    #[test]
    fn test_yuv_rgb_roundtrip() {
        for rgb in [[255u8, 0, 0], [0, 255, 0], [0, 0, 255], [128, 128, 128], [10, 200, 90]] {
            let [y, u, v] = rgb_to_yuv(rgb[0], rgb[1], rgb[2]);
            let back = yuv_to_rgb(y, u, v);
            for (a, b) in rgb.iter().zip(back.iter()) {
                assert!((*a as i32 - *b as i32).abs() <= 2, "{:?} -> {:?}", rgb, back);
            }
        }
    }

    #[test]
    fn test_scale_down_keeps_color() {
        let source = VideoDescriptor::new(8, 6, PixelFormat::Rgb24);
        let target = VideoDescriptor::new(4, 3, PixelFormat::Rgba);
        let mut scaler = Scaler::new(source, target).unwrap();

        let input = solid(source, [200, 100, 50]);
        let mut output = Frame::with_capacity(MediaKind::Video, 0);
        scaler.convert(&input, &mut output).unwrap();

        assert_eq!(output.data.len(), target.frame_bytes());
        assert_eq!(&output.data[..4], &[200, 100, 50, 255]);
        assert_eq!(output.pts, 7);
    }

    #[test]
    fn test_convert_to_yuv420p() {
        let source = VideoDescriptor::new(4, 4, PixelFormat::Rgba);
        let target = VideoDescriptor::new(4, 4, PixelFormat::Yuv420p);
        let mut scaler = Scaler::new(source, target).unwrap();

        let input = solid(source, [255, 255, 255]);
        let mut output = Frame::with_capacity(MediaKind::Video, 0);
        scaler.convert(&input, &mut output).unwrap();

        assert_eq!(output.data.len(), 24);
        assert!(output.data[..16].iter().all(|&y| y == 255));
        assert!(output.data[16..].iter().all(|&c| (c as i32 - 128).abs() <= 1));
    }

    #[test]
    fn test_upscale_yuv_source() {
        let source = VideoDescriptor::new(2, 2, PixelFormat::Yuv420p);
        let target = VideoDescriptor::new(4, 4, PixelFormat::Gray8);
        let mut scaler = Scaler::new(source, target).unwrap();

        let input = Frame::new(MediaKind::Video, vec![10, 20, 30, 40, 128, 128], 0, Rational::new(1, 25));
        let mut output = Frame::with_capacity(MediaKind::Video, 0);
        scaler.convert(&input, &mut output).unwrap();

        assert_eq!(output.data.len(), 16);
        assert_eq!(output.data[0], 10);
        assert_eq!(output.data[3], 20);
        assert_eq!(output.data[15], 40);
    }

    #[test]
    fn test_short_payload_rejected() {
        let source = VideoDescriptor::new(4, 4, PixelFormat::Rgb24);
        let mut scaler = Scaler::new(source, source).unwrap();
        let input = Frame::new(MediaKind::Video, vec![0; 10], 0, Rational::new(1, 25));
        let mut output = Frame::with_capacity(MediaKind::Video, 0);
        assert!(scaler.convert(&input, &mut output).is_err());
    }
}
