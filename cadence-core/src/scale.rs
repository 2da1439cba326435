// SCALE - decoded picture to RGB24
//
// Decoders hand back YUV (planar or semi-planar) or packed RGB.
// The video sink only ever sees RGB24 at the stream's native size.
// The Scaler trait keeps conversion pluggable; SoftwareScaler is the
// fixed-point CPU path.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::RawVideoFrame;

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("{format:?} frame {width}x{height} needs {needed} bytes, got {got}")]
    BufferTooSmall {
        format: PixelFormat,
        width: u32,
        height: u32,
        needed: usize,
        got: usize,
    },
    #[error("Invalid frame size {0}x{1}")]
    InvalidSize(u32, u32),
}

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Yuv420p,  // Y plane, U plane (quarter size), V plane (quarter size)
    Nv12,     // Y plane, interleaved UV plane
    Rgb24,
    Rgba32,
}

impl PixelFormat {
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        let chroma = w.div_ceil(2) * h.div_ceil(2);
        match self {
            Self::Yuv420p => w * h + chroma * 2,
            Self::Nv12 => w * h + chroma * 2,
            Self::Rgb24 => w * h * 3,
            Self::Rgba32 => w * h * 4,
        }
    }
}

// ============================================================================
// BT.601 lookup tables (limited range, 8.8 fixed point)
// ============================================================================

struct YuvTables {
    y: [i32; 256],
    v_r: [i32; 256],
    u_g: [i32; 256],
    v_g: [i32; 256],
    u_b: [i32; 256],
}

static BT601: Lazy<YuvTables> = Lazy::new(|| {
    let mut t = YuvTables {
        y: [0; 256],
        v_r: [0; 256],
        u_g: [0; 256],
        v_g: [0; 256],
        u_b: [0; 256],
    };
    for i in 0..256 {
        let y = i as i32 - 16;
        let c = i as i32 - 128;
        t.y[i] = (y * 298) >> 8;
        t.v_r[i] = (c * 409) >> 8;
        t.u_g[i] = (c * -100) >> 8;
        t.v_g[i] = (c * -208) >> 8;
        t.u_b[i] = (c * 516) >> 8;
    }
    t
});

#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let t = &*BT601;
    let yc = t.y[y as usize];
    [
        (yc + t.v_r[v as usize]).clamp(0, 255) as u8,
        (yc + t.u_g[u as usize] + t.v_g[v as usize]).clamp(0, 255) as u8,
        (yc + t.u_b[u as usize]).clamp(0, 255) as u8,
    ]
}

// ============================================================================
// Scaler
// ============================================================================

/// Color conversion + resize into tightly packed RGB24
pub trait Scaler: Send {
    fn to_rgb24(
        &mut self,
        frame: &RawVideoFrame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ScaleError>;
}

/// CPU conversion, nearest-neighbour resize
#[derive(Debug, Default)]
pub struct SoftwareScaler;

impl SoftwareScaler {
    pub fn new() -> Self {
        Self
    }

    fn convert(frame: &RawVideoFrame) -> Result<Vec<u8>, ScaleError> {
        let (w, h) = (frame.width as usize, frame.height as usize);
        let needed = frame.format.buffer_size(frame.width, frame.height);
        if frame.data.len() < needed {
            return Err(ScaleError::BufferTooSmall {
                format: frame.format,
                width: frame.width,
                height: frame.height,
                needed,
                got: frame.data.len(),
            });
        }

        let src = &frame.data;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);
        let mut rgb = vec![0u8; w * h * 3];

        match frame.format {
            PixelFormat::Yuv420p => {
                let (y_plane, rest) = src.split_at(w * h);
                let (u_plane, v_plane) = rest.split_at(cw * ch);
                for row in 0..h {
                    for col in 0..w {
                        let c = (row / 2) * cw + col / 2;
                        let px = yuv_to_rgb(y_plane[row * w + col], u_plane[c], v_plane[c]);
                        rgb[(row * w + col) * 3..][..3].copy_from_slice(&px);
                    }
                }
            }
            PixelFormat::Nv12 => {
                let (y_plane, uv_plane) = src.split_at(w * h);
                for row in 0..h {
                    for col in 0..w {
                        let c = ((row / 2) * cw + col / 2) * 2;
                        let px = yuv_to_rgb(y_plane[row * w + col], uv_plane[c], uv_plane[c + 1]);
                        rgb[(row * w + col) * 3..][..3].copy_from_slice(&px);
                    }
                }
            }
            PixelFormat::Rgb24 => rgb.copy_from_slice(&src[..w * h * 3]),
            PixelFormat::Rgba32 => {
                for (dst, px) in rgb.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
                    dst.copy_from_slice(&px[..3]);
                }
            }
        }

        Ok(rgb)
    }

    fn resize(rgb: &[u8], sw: usize, sh: usize, dw: usize, dh: usize) -> Vec<u8> {
        let mut out = vec![0u8; dw * dh * 3];
        for y in 0..dh {
            let sy = y * sh / dh;
            for x in 0..dw {
                let sx = x * sw / dw;
                let s = (sy * sw + sx) * 3;
                out[(y * dw + x) * 3..][..3].copy_from_slice(&rgb[s..s + 3]);
            }
        }
        out
    }
}

impl Scaler for SoftwareScaler {
    fn to_rgb24(
        &mut self,
        frame: &RawVideoFrame,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ScaleError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(ScaleError::InvalidSize(frame.width, frame.height));
        }
        if width == 0 || height == 0 {
            return Err(ScaleError::InvalidSize(width, height));
        }

        let rgb = Self::convert(frame)?;
        if frame.width == width && frame.height == height {
            Ok(rgb)
        } else {
            Ok(Self::resize(
                &rgb,
                frame.width as usize,
                frame.height as usize,
                width as usize,
                height as usize,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawVideoFrame {
        RawVideoFrame {
            data,
            format,
            width,
            height,
            pts: Some(0),
        }
    }

    #[test]
    fn test_yuv420p_levels() {
        let mut scaler = SoftwareScaler::new();
        let (w, h) = (4u32, 2u32);

        // Mid gray
        let mut data = vec![128u8; PixelFormat::Yuv420p.buffer_size(w, h)];
        let rgb = scaler.to_rgb24(&frame(PixelFormat::Yuv420p, w, h, data.clone()), w, h).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
        assert!(rgb.iter().all(|&v| v == 130));

        // Black / white luma extremes
        data[..8].copy_from_slice(&[16, 16, 16, 16, 235, 235, 235, 235]);
        let rgb = scaler.to_rgb24(&frame(PixelFormat::Yuv420p, w, h, data), w, h).unwrap();
        assert_eq!(&rgb[..3], &[0, 0, 0]);
        assert_eq!(&rgb[12..15], &[254, 254, 254]);
    }

    #[test]
    fn test_nv12_matches_yuv420p() {
        let mut scaler = SoftwareScaler::new();
        let (w, h) = (2u32, 2u32);
        let planar = vec![100, 110, 120, 130, 90, 200];
        let semi = vec![100, 110, 120, 130, 90, 200];
        let a = scaler.to_rgb24(&frame(PixelFormat::Yuv420p, w, h, planar), w, h).unwrap();
        let b = scaler.to_rgb24(&frame(PixelFormat::Nv12, w, h, semi), w, h).unwrap();
        assert_eq!(a, b);
        // Red-ish chroma (V high) pushes red above blue
        assert!(a[0] > a[2]);
    }

    #[test]
    fn test_rgba_and_resize() {
        let mut scaler = SoftwareScaler::new();
        let rgba = vec![10, 20, 30, 255, 40, 50, 60, 255];
        let rgb = scaler.to_rgb24(&frame(PixelFormat::Rgba32, 2, 1, rgba), 4, 2).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
        assert_eq!(&rgb[..6], &[10, 20, 30, 10, 20, 30]);
        assert_eq!(&rgb[6..12], &[40, 50, 60, 40, 50, 60]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let mut scaler = SoftwareScaler::new();
        let err = scaler
            .to_rgb24(&frame(PixelFormat::Yuv420p, 4, 4, vec![0; 10]), 4, 4)
            .unwrap_err();
        assert!(matches!(err, ScaleError::BufferTooSmall { needed: 24, .. }));
    }
}
