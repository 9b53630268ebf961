//! Camera characteristics: capture-size negotiation and field of view.

use crate::frame::CaptureSize;

/// Largest capture size considered during negotiation.
pub const DEFAULT_MAX_CAPTURE: CaptureSize = CaptureSize::new(1280, 960);

/// Physical optics reported by the camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraOptics {
    pub sensor_width_mm: f64,
    pub sensor_height_mm: f64,
    pub focal_length_mm: f64,
}

impl CameraOptics {
    /// Horizontal field of view in radians.
    pub fn horizontal_fov(&self) -> f64 {
        2.0 * (0.5 * self.sensor_width_mm).atan2(self.focal_length_mm)
    }

    /// Vertical field of view in radians.
    pub fn vertical_fov(&self) -> f64 {
        2.0 * (0.5 * self.sensor_height_mm).atan2(self.focal_length_mm)
    }

    /// Focal length in pixels for an image `width` pixels wide.
    pub fn focal_length_px(&self, width: u32) -> f64 {
        0.5 * width as f64 / (self.horizontal_fov() / 2.0).tan()
    }
}

/// Manual capture parameters applied when the capture session is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub exposure_ns: u64,
    pub iso: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            exposure_ns: 5_000_000,
            iso: 100,
        }
    }
}

/// Pick the largest offered size that fits inside `max`.
///
/// Falls back to the last offered size when none fits. Returns `None` only
/// when nothing is offered.
pub fn negotiate_capture_size(available: &[CaptureSize], max: CaptureSize) -> Option<CaptureSize> {
    let fitting = available
        .iter()
        .filter(|s| s.width <= max.width && s.height <= max.height)
        .max_by_key(|s| s.area());
    match fitting {
        Some(size) => Some(*size),
        None => {
            let fallback = available.last().copied();
            if let Some(size) = fallback {
                log::error!("no capture size fits within {}; falling back to {}", max, size);
            }
            fallback
        }
    }
}
