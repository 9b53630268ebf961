//! Planar YUV to RGB conversion into a reused working buffer.

use crate::error::FrameError;
use crate::frame::{CaptureSize, PlaneLayout, RawFrame};

/// Interleaved 8-bit RGB image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl RgbImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * 3],
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * 3 {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ]
    }

    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data.chunks_exact(3).map(|px| [px[0], px[1], px[2]])
    }
}

/// Expected plane lengths for a layout at the given size.
pub fn expected_plane_lengths(
    layout: PlaneLayout,
    width: u32,
    height: u32,
) -> Result<Vec<usize>, FrameError> {
    let overflow = || FrameError::DimensionOverflow { width, height };
    let luma = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(overflow)?;
    let chroma = (width as usize).div_ceil(2) * (height as usize).div_ceil(2);
    Ok(match layout {
        PlaneLayout::I420 => vec![luma, chroma, chroma],
        PlaneLayout::Nv12 | PlaneLayout::Nv21 => {
            vec![luma, chroma.checked_mul(2).ok_or_else(overflow)?]
        }
    })
}

/// Check a frame's planes against the lengths its layout requires.
pub fn validate_planes(frame: &RawFrame) -> Result<(), FrameError> {
    let expected = expected_plane_lengths(frame.layout, frame.width, frame.height)?;
    let planes = frame.planes();
    if planes.len() != expected.len() {
        return Err(FrameError::PlaneCount {
            layout: frame.layout,
            expected: expected.len(),
            got: planes.len(),
        });
    }
    for (index, (plane, want)) in planes.iter().zip(expected).enumerate() {
        if plane.len() != want {
            return Err(FrameError::PlaneLength {
                layout: frame.layout,
                index,
                expected: want,
                got: plane.len(),
            });
        }
    }
    Ok(())
}

/// Converts captures into a fixed-size RGB working image.
///
/// One converter per worker. The image is allocated once for the session
/// size and rewritten every frame.
pub struct PixelConverter {
    size: CaptureSize,
    image: RgbImage,
}

impl PixelConverter {
    pub fn new(size: CaptureSize) -> Self {
        Self {
            size,
            image: RgbImage::new(size.width, size.height),
        }
    }

    pub fn size(&self) -> CaptureSize {
        self.size
    }

    /// Convert a frame. Any size or plane mismatch is rejected whole; nothing
    /// is partially written in that case.
    pub fn convert(&mut self, frame: &RawFrame) -> Result<&RgbImage, FrameError> {
        if frame.size() != self.size {
            return Err(FrameError::SessionSize {
                width: self.size.width,
                height: self.size.height,
                got_width: frame.width,
                got_height: frame.height,
            });
        }
        validate_planes(frame)?;

        let w = frame.width as usize;
        let h = frame.height as usize;
        let cw = w.div_ceil(2);
        let planes = frame.planes();
        let luma = &planes[0];
        let out = &mut self.image.data;

        for j in 0..h {
            for i in 0..w {
                let chroma_index = (j / 2) * cw + i / 2;
                let (u, v) = match frame.layout {
                    PlaneLayout::I420 => (planes[1][chroma_index], planes[2][chroma_index]),
                    PlaneLayout::Nv12 => (
                        planes[1][chroma_index * 2],
                        planes[1][chroma_index * 2 + 1],
                    ),
                    PlaneLayout::Nv21 => (
                        planes[1][chroma_index * 2 + 1],
                        planes[1][chroma_index * 2],
                    ),
                };
                let offset = (j * w + i) * 3;
                let rgb = yuv_to_rgb(luma[j * w + i], u, v);
                out[offset..offset + 3].copy_from_slice(&rgb);
            }
        }

        Ok(&self.image)
    }
}

/// BT.601 full-range YUV to RGB.
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

/// RGB to BT.601 full-range YUV. Inverse of `yuv_to_rgb` up to rounding.
pub fn rgb_to_yuv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = (b - y) / 1.772 + 128.0;
    let v = (r - y) / 1.402 + 128.0;
    [clamp_to_u8(y), clamp_to_u8(u), clamp_to_u8(v)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
