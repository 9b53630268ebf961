//! Colour segmentation: RGB to HSV, inclusive range threshold, and external
//! contour extraction.
//!
//! HSV follows the common 8-bit convention: hue in `[0, 180)`, saturation and
//! value in `[0, 255]`.

use serde::Deserialize;

use crate::convert::RgbImage;
use crate::rect::Point;

/// Inclusive HSV threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct HsvRange {
    pub low: [u8; 3],
    pub high: [u8; 3],
}

impl HsvRange {
    pub const fn new(low: [u8; 3], high: [u8; 3]) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| hsv[c] >= self.low[c] && hsv[c] <= self.high[c])
    }
}

/// Convert one RGB pixel to 8-bit HSV.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(i32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;

    let s = if max == 0 {
        0.0
    } else {
        255.0 * diff as f32 / max as f32
    };

    let h = if diff == 0 {
        0.0
    } else if max == r {
        60.0 * (g - b) as f32 / diff as f32
    } else if max == g {
        120.0 + 60.0 * (b - r) as f32 / diff as f32
    } else {
        240.0 + 60.0 * (r - g) as f32 / diff as f32
    };
    let h = if h < 0.0 { h + 360.0 } else { h };
    // 360 degrees map onto [0, 180); a rounded 180 wraps to red.
    let h = (h / 2.0).round() as u32 % 180;

    [h as u8, s.round() as u8, max as u8]
}

// ----------------------------------------------------------------------------
// Mask
// ----------------------------------------------------------------------------

/// Binary foreground mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        let idx = y as usize * self.width as usize + x as usize;
        self.data[idx] = value;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    fn resize(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            *self = Mask::new(width, height);
        }
    }
}

/// Threshold an image into `mask`, resizing the mask if needed.
pub fn threshold_into(image: &RgbImage, range: &HsvRange, mask: &mut Mask) {
    mask.resize(image.width, image.height);
    for (slot, px) in mask.data.iter_mut().zip(image.pixels()) {
        *slot = range.contains(rgb_to_hsv(px));
    }
}

// ----------------------------------------------------------------------------
// Contours
// ----------------------------------------------------------------------------

/// Outer boundary polygon of one connected foreground region, in pixel
/// coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Contour {
    pub points: Vec<Point>,
    /// Foreground pixels in the region.
    pub pixel_count: usize,
}

// Clockwise on screen (y grows downward), starting east.
const DIRS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
const WEST: usize = 4;

fn dir_index(dx: i64, dy: i64) -> usize {
    DIRS.iter()
        .position(|&d| d == (dx, dy))
        .unwrap_or(WEST)
}

/// Scratch state for contour extraction, reused across frames.
#[derive(Default)]
pub struct ContourFinder {
    labels: Vec<u32>,
    outside: Vec<bool>,
    stack: Vec<(u32, u32)>,
}

impl ContourFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outer contours of regions not enclosed by another region.
    ///
    /// Foreground is 8-connected, background 4-connected. A region lying
    /// inside a hole of another region is not external and is skipped.
    /// Contours are returned in raster order of each region's first pixel.
    pub fn find_external(&mut self, mask: &Mask) -> Vec<Contour> {
        let w = mask.width as usize;
        let h = mask.height as usize;
        self.labels.clear();
        self.labels.resize(w * h, 0);
        self.outside.clear();
        self.outside.resize(w * h, false);
        if w == 0 || h == 0 {
            return Vec::new();
        }

        self.flood_outside(mask);

        let mut contours = Vec::new();
        let mut next_label = 1u32;
        for y in 0..h {
            for x in 0..w {
                let idx = y * w + x;
                if !mask.data[idx] || self.labels[idx] != 0 {
                    continue;
                }
                let (pixel_count, external) =
                    self.label_region(mask, x as u32, y as u32, next_label);
                next_label += 1;
                if external {
                    let points = trace_boundary(mask, x as i64, y as i64, pixel_count);
                    contours.push(Contour {
                        points,
                        pixel_count,
                    });
                }
            }
        }
        contours
    }

    /// Mark background reachable from the image border.
    fn flood_outside(&mut self, mask: &Mask) {
        let w = mask.width;
        let h = mask.height;
        self.stack.clear();
        for x in 0..w {
            self.stack.push((x, 0));
            self.stack.push((x, h.saturating_sub(1)));
        }
        for y in 0..h {
            self.stack.push((0, y));
            self.stack.push((w.saturating_sub(1), y));
        }
        while let Some((x, y)) = self.stack.pop() {
            let idx = y as usize * w as usize + x as usize;
            if mask.data[idx] || self.outside[idx] {
                continue;
            }
            self.outside[idx] = true;
            if x > 0 {
                self.stack.push((x - 1, y));
            }
            if x + 1 < w {
                self.stack.push((x + 1, y));
            }
            if y > 0 {
                self.stack.push((x, y - 1));
            }
            if y + 1 < h {
                self.stack.push((x, y + 1));
            }
        }
    }

    /// Label one 8-connected region. Returns its size and whether it touches
    /// the border or border-reachable background.
    fn label_region(&mut self, mask: &Mask, x0: u32, y0: u32, label: u32) -> (usize, bool) {
        let w = mask.width as i64;
        let h = mask.height as i64;
        let mut count = 0usize;
        let mut external = false;
        self.stack.clear();
        self.stack.push((x0, y0));
        self.labels[y0 as usize * w as usize + x0 as usize] = label;
        while let Some((x, y)) = self.stack.pop() {
            count += 1;
            let (xi, yi) = (x as i64, y as i64);
            if xi == 0 || yi == 0 || xi == w - 1 || yi == h - 1 {
                external = true;
            }
            for (dx, dy) in DIRS {
                let (nx, ny) = (xi + dx, yi + dy);
                if nx < 0 || ny < 0 || nx >= w || ny >= h {
                    continue;
                }
                let nidx = ny as usize * w as usize + nx as usize;
                if mask.data[nidx] {
                    if self.labels[nidx] == 0 {
                        self.labels[nidx] = label;
                        self.stack.push((nx as u32, ny as u32));
                    }
                } else if (dx == 0 || dy == 0) && self.outside[nidx] {
                    external = true;
                }
            }
        }
        (count, external)
    }
}

/// Moore-neighbour trace of the outer boundary starting at the region's
/// raster-first pixel, whose west neighbour is background.
fn trace_boundary(mask: &Mask, sx: i64, sy: i64, pixel_count: usize) -> Vec<Point> {
    let start = (sx, sy);
    let mut boundary = vec![start];
    let mut current = start;
    let mut back_dir = WEST;
    let mut first_step: Option<(i64, i64)> = None;
    let max_steps = 4 * pixel_count + 8;

    for _ in 0..max_steps {
        let mut next = None;
        for k in 1..=8 {
            let d = (back_dir + k) % 8;
            let candidate = (current.0 + DIRS[d].0, current.1 + DIRS[d].1);
            if mask.get(candidate.0, candidate.1) {
                let prev = (d + 7) % 8;
                let back = (current.0 + DIRS[prev].0, current.1 + DIRS[prev].1);
                back_dir = dir_index(back.0 - candidate.0, back.1 - candidate.1);
                next = Some(candidate);
                break;
            }
        }
        let Some(next) = next else {
            // Isolated pixel.
            break;
        };
        match first_step {
            None => first_step = Some(next),
            Some(first) if current == start && next == first => break,
            Some(_) => {}
        }
        if next != start || boundary.len() == 1 {
            boundary.push(next);
        }
        current = next;
    }

    // The trace closes on the start pixel; keep the polygon open.
    if boundary.len() > 1 && boundary.last() == Some(&start) {
        boundary.pop();
    }
    boundary
        .into_iter()
        .map(|(x, y)| Point::new(x as f64, y as f64))
        .collect()
}

/// Thresholds RGB images and extracts external contours.
///
/// Owns its scratch buffers; one instance per worker.
pub struct Segmenter {
    range: HsvRange,
    mask: Mask,
    finder: ContourFinder,
}

impl Segmenter {
    pub fn new(range: HsvRange) -> Self {
        Self {
            range,
            mask: Mask::new(0, 0),
            finder: ContourFinder::new(),
        }
    }

    pub fn range(&self) -> &HsvRange {
        &self.range
    }

    pub fn segment(&mut self, image: &RgbImage) -> Vec<Contour> {
        threshold_into(image, &self.range, &mut self.mask);
        self.finder.find_external(&self.mask)
    }

    /// Mask produced by the last `segment` call.
    pub fn mask(&self) -> &Mask {
        &self.mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> Mask {
        let h = rows.len() as u32;
        let w = rows[0].len() as u32;
        let mut mask = Mask::new(w, h);
        for (y, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                mask.set(x as u32, y as u32, c == '#');
            }
        }
        mask
    }

    #[test]
    fn hsv_matches_8bit_convention() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
    }

    #[test]
    fn range_is_inclusive() {
        let range = HsvRange::new([60, 90, 150], [85, 255, 255]);
        assert!(range.contains([60, 90, 150]));
        assert!(range.contains([85, 255, 255]));
        assert!(!range.contains([59, 200, 200]));
        assert!(!range.contains([70, 89, 200]));
    }

    #[test]
    fn single_square_yields_one_contour() {
        let mask = mask_from(&[
            ".....", //
            ".###.", //
            ".###.", //
            ".###.", //
            ".....",
        ]);
        let contours = ContourFinder::new().find_external(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].pixel_count, 9);
        // Outer ring of the 3x3 block.
        assert_eq!(contours[0].points.len(), 8);
        assert!(contours[0].points.contains(&Point::new(3.0, 3.0)));
        assert!(!contours[0].points.contains(&Point::new(2.0, 2.0)));
    }

    #[test]
    fn nested_region_is_not_external() {
        let mask = mask_from(&[
            ".........",
            ".#######.",
            ".#.....#.",
            ".#..#..#.",
            ".#.....#.",
            ".#######.",
            ".........",
        ]);
        let contours = ContourFinder::new().find_external(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].pixel_count, 20);
    }

    #[test]
    fn separate_regions_in_raster_order() {
        let mask = mask_from(&[
            "......##",
            "......##",
            "........",
            "#.......",
        ]);
        let contours = ContourFinder::new().find_external(&mask);
        assert_eq!(contours.len(), 2);
        assert_eq!(contours[0].points[0], Point::new(6.0, 0.0));
        assert_eq!(contours[1].points, vec![Point::new(0.0, 3.0)]);
    }

    #[test]
    fn diagonal_pixels_are_one_region() {
        let mask = mask_from(&[
            "#...", //
            ".#..", //
            "..#.", //
        ]);
        let contours = ContourFinder::new().find_external(&mask);
        assert_eq!(contours.len(), 1);
        assert_eq!(contours[0].pixel_count, 3);
    }

    #[test]
    fn segmenter_thresholds_green_target() {
        let mut data = vec![0u8; 6 * 4 * 3];
        for y in 1..3 {
            for x in 1..5 {
                let o = (y * 6 + x) * 3;
                data[o..o + 3].copy_from_slice(&[40, 230, 100]);
            }
        }
        let image = RgbImage::from_raw(6, 4, data).expect("image");
        let mut segmenter = Segmenter::new(HsvRange::new([60, 90, 150], [85, 255, 255]));
        let contours = segmenter.segment(&image);
        assert_eq!(segmenter.mask().count(), 8);
        assert_eq!(contours.len(), 1);
    }
}
