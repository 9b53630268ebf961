//! Synthetic capture source.
//!
//! Renders a filled rotated target rectangle in a fixed colour on a dark
//! background, plus small speckles of the same colour that the area filter is
//! expected to reject. Frames come out in the configured 4:2:0 layout with
//! chroma averaged over each 2x2 block, the way a camera would deliver them.

use std::time::Instant;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::convert::rgb_to_yuv;
use crate::frame::{CaptureSize, PlaneLayout, RawFrame};
use crate::rect::{Point, RotatedRect};

/// RGB colour inside the default HSV threshold window.
pub const DEFAULT_TARGET_COLOUR: [u8; 3] = [40, 230, 150];
const BACKGROUND: [u8; 3] = [12, 14, 18];

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub size: CaptureSize,
    pub layout: PlaneLayout,
    pub colour: [u8; 3],
    /// Target to draw; `None` renders background and speckles only.
    pub target: Option<RotatedRect>,
    /// Horizontal drift of the target per frame, bouncing off the edges.
    pub sweep_px_per_frame: f64,
    /// Number of 2x2 speckles per frame.
    pub speckles: usize,
    pub seed: u64,
}

impl SyntheticConfig {
    /// Centred target sized to a fifth of the frame width at ratio 1.8.
    pub fn for_size(size: CaptureSize) -> Self {
        let width = size.width as f64 * 0.2;
        Self {
            size,
            layout: PlaneLayout::I420,
            colour: DEFAULT_TARGET_COLOUR,
            target: Some(RotatedRect {
                center: Point::new(size.width as f64 / 2.0, size.height as f64 / 2.0),
                width,
                height: width / 1.8,
                angle_deg: -8.0,
            }),
            sweep_px_per_frame: 0.0,
            speckles: 24,
            seed: 0x5eed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyntheticStats {
    pub frames_captured: u64,
    pub size: CaptureSize,
}

pub struct SyntheticCapture {
    config: SyntheticConfig,
    rng: StdRng,
    frame_count: u64,
    direction: f64,
    connected: bool,
}

impl SyntheticCapture {
    pub fn new(config: SyntheticConfig) -> Result<Self> {
        if config.size.width == 0 || config.size.height == 0 {
            bail!("synthetic capture size must be nonzero, got {}", config.size);
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            rng,
            frame_count: 0,
            direction: 1.0,
            connected: false,
        })
    }

    /// Synthetic sources are always available.
    pub fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticCapture: streaming {} {:?}",
            self.config.size,
            self.config.layout
        );
        self.connected = true;
        Ok(())
    }

    pub fn is_healthy(&self) -> bool {
        self.connected
    }

    pub fn stats(&self) -> SyntheticStats {
        SyntheticStats {
            frames_captured: self.frame_count,
            size: self.config.size,
        }
    }

    pub fn set_target(&mut self, target: Option<RotatedRect>) {
        self.config.target = target;
    }

    pub fn target(&self) -> Option<RotatedRect> {
        self.config.target
    }

    pub fn next_frame(&mut self) -> Result<RawFrame> {
        if !self.connected {
            bail!("synthetic capture not connected");
        }
        let captured_at = Instant::now();
        self.frame_count += 1;
        self.advance_target();

        let rgb = self.render();
        let planes = encode_planes(&rgb, self.config.size, self.config.layout);
        Ok(RawFrame::new(
            planes,
            self.config.size.width,
            self.config.size.height,
            self.config.layout,
            captured_at,
            self.frame_count,
        ))
    }

    fn advance_target(&mut self) {
        let step = self.config.sweep_px_per_frame;
        let width = self.config.size.width as f64;
        let Some(target) = self.config.target.as_mut() else {
            return;
        };
        if step == 0.0 {
            return;
        }
        let margin = target.width.max(target.height) / 2.0;
        let next = target.center.x + step * self.direction;
        if next < margin || next > width - margin {
            self.direction = -self.direction;
        }
        target.center.x = (target.center.x + step * self.direction).clamp(margin, width - margin);
    }

    fn render(&mut self) -> Vec<[u8; 3]> {
        let w = self.config.size.width as usize;
        let h = self.config.size.height as usize;
        let colour = self.config.colour;
        let mut rgb = vec![BACKGROUND; w * h];

        if let Some(target) = &self.config.target {
            fill_rotated_rect(&mut rgb, w, h, target, colour);
        }

        for _ in 0..self.config.speckles {
            let x = self.rng.gen_range(0..w.div_ceil(2)) * 2;
            let y = self.rng.gen_range(0..h.div_ceil(2)) * 2;
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                if x + dx < w && y + dy < h {
                    rgb[(y + dy) * w + x + dx] = colour;
                }
            }
        }
        rgb
    }
}

fn fill_rotated_rect(rgb: &mut [[u8; 3]], w: usize, h: usize, rect: &RotatedRect, colour: [u8; 3]) {
    let corners = rect.corners();
    let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).floor().max(0.0) as usize;
    let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max).ceil();
    let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).floor().max(0.0) as usize;
    let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max).ceil();
    if max_x < 0.0 || max_y < 0.0 {
        return;
    }
    let max_x = (max_x as usize).min(w.saturating_sub(1));
    let max_y = (max_y as usize).min(h.saturating_sub(1));

    let (sin, cos) = rect.angle_deg.to_radians().sin_cos();
    let (half_w, half_h) = (rect.width / 2.0, rect.height / 2.0);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let dx = x as f64 - rect.center.x;
            let dy = y as f64 - rect.center.y;
            let along = dx * cos + dy * sin;
            let across = -dx * sin + dy * cos;
            if along.abs() <= half_w && across.abs() <= half_h {
                rgb[y * w + x] = colour;
            }
        }
    }
}

/// Encode RGB pixels into 4:2:0 planes, averaging chroma per 2x2 block.
fn encode_planes(rgb: &[[u8; 3]], size: CaptureSize, layout: PlaneLayout) -> Vec<Vec<u8>> {
    let w = size.width as usize;
    let h = size.height as usize;
    let cw = w.div_ceil(2);
    let ch = h.div_ceil(2);

    let mut luma = vec![0u8; w * h];
    let mut u_sum = vec![0u32; cw * ch];
    let mut v_sum = vec![0u32; cw * ch];
    let mut count = vec![0u32; cw * ch];
    for y in 0..h {
        for x in 0..w {
            let [yy, u, v] = rgb_to_yuv(rgb[y * w + x]);
            luma[y * w + x] = yy;
            let c = (y / 2) * cw + x / 2;
            u_sum[c] += u as u32;
            v_sum[c] += v as u32;
            count[c] += 1;
        }
    }
    let average = |sum: &[u32]| -> Vec<u8> {
        sum.iter()
            .zip(&count)
            .map(|(s, n)| ((s + n / 2) / n) as u8)
            .collect()
    };
    let u = average(&u_sum);
    let v = average(&v_sum);

    match layout {
        PlaneLayout::I420 => vec![luma, u, v],
        PlaneLayout::Nv12 => vec![luma, interleave(&u, &v)],
        PlaneLayout::Nv21 => vec![luma, interleave(&v, &u)],
    }
}

fn interleave(first: &[u8], second: &[u8]) -> Vec<u8> {
    first.iter().zip(second).flat_map(|(a, b)| [*a, *b]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{validate_planes, PixelConverter};
    use crate::segment::{rgb_to_hsv, HsvRange};

    #[test]
    fn frames_match_expected_plane_sizes_for_every_layout() {
        for layout in [PlaneLayout::I420, PlaneLayout::Nv12, PlaneLayout::Nv21] {
            let mut config = SyntheticConfig::for_size(CaptureSize::new(33, 17));
            config.layout = layout;
            let mut source = SyntheticCapture::new(config).expect("source");
            source.connect().expect("connect");
            let frame = source.next_frame().expect("frame");
            validate_planes(&frame).expect("valid planes");
            assert_eq!(frame.id, 1);
        }
    }

    #[test]
    fn target_colour_survives_conversion_into_threshold() {
        let size = CaptureSize::new(64, 48);
        let mut config = SyntheticConfig::for_size(size);
        config.speckles = 0;
        let mut source = SyntheticCapture::new(config).expect("source");
        source.connect().expect("connect");
        let frame = source.next_frame().expect("frame");

        let mut converter = PixelConverter::new(size);
        let image = converter.convert(&frame).expect("convert");
        let range = HsvRange::new([60, 90, 150], [85, 255, 255]);
        assert!(range.contains(rgb_to_hsv(image.pixel(32, 24))));
        assert!(!range.contains(rgb_to_hsv(image.pixel(0, 0))));
    }

    #[test]
    fn sweep_bounces_inside_frame() {
        let size = CaptureSize::new(200, 100);
        let mut config = SyntheticConfig::for_size(size);
        config.sweep_px_per_frame = 30.0;
        let mut source = SyntheticCapture::new(config).expect("source");
        source.connect().expect("connect");
        for _ in 0..20 {
            source.next_frame().expect("frame");
            let target = source.target().expect("target");
            let margin = target.width.max(target.height) / 2.0;
            assert!(target.center.x >= margin && target.center.x <= 200.0 - margin);
        }
    }

    #[test]
    fn requires_connect_and_nonzero_size() {
        assert!(SyntheticCapture::new(SyntheticConfig::for_size(CaptureSize::new(0, 10))).is_err());
        let mut source = SyntheticCapture::new(SyntheticConfig::for_size(CaptureSize::new(8, 8)))
            .expect("source");
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
    }
}
