//! Pinhole geometry: pixel position plus device tilt to bearing and range.

use std::time::Instant;

use crate::camera::CameraOptics;
use crate::filter::Candidate;
use crate::frame::CaptureSize;

/// Vertical angles closer to the horizon than this leave range undefined.
pub const HORIZON_EPSILON: f64 = 1e-3;

/// Vertical offset between the camera mount and the target's middle, in
/// inches (target bottom 66 + half of 12 tall, camera at 7).
pub const DEFAULT_HEIGHT_DIFFERENCE: f64 = 65.0;

/// Pipeline output for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetEstimate {
    /// Horizontal angle from the camera's forward axis, radians, tilt-corrected.
    pub bearing: f64,
    /// Angle from the level horizon up to the target, radians.
    pub vertical_angle: f64,
    /// Distance in the unit of the configured height difference; `None` when
    /// the target sits on the camera's horizon.
    pub range: Option<f64>,
    pub captured_at: Instant,
    pub frame_id: u64,
}

/// Per-session solver. The focal length is fixed when the session's capture
/// size is known and never changes afterwards.
#[derive(Clone, Copy, Debug)]
pub struct GeometrySolver {
    focal_px: f64,
    half_width: f64,
    half_height: f64,
    height_difference: f64,
}

/// Angles for a pixel before range is derived.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelAngles {
    pub horizontal: f64,
    pub vertical: f64,
}

impl GeometrySolver {
    pub fn new(size: CaptureSize, focal_px: f64, height_difference: f64) -> Self {
        Self {
            focal_px,
            half_width: size.width as f64 / 2.0,
            half_height: size.height as f64 / 2.0,
            height_difference,
        }
    }

    pub fn from_optics(size: CaptureSize, optics: &CameraOptics, height_difference: f64) -> Self {
        Self::new(size, optics.focal_length_px(size.width), height_difference)
    }

    pub fn focal_px(&self) -> f64 {
        self.focal_px
    }

    /// Raw angles of a pixel off the optical axis (positive right and down).
    pub fn pixel_angles(&self, x: f64, y: f64) -> PixelAngles {
        PixelAngles {
            horizontal: ((x - self.half_width) / self.focal_px).atan(),
            vertical: ((y - self.half_height) / self.focal_px).atan(),
        }
    }

    /// Bearing and range for a candidate under the given tilt (radians).
    pub fn solve(
        &self,
        candidate: &Candidate,
        tilt: f64,
        captured_at: Instant,
        frame_id: u64,
    ) -> TargetEstimate {
        let angles = self.pixel_angles(candidate.center.x, candidate.center.y);
        let vertical_angle = tilt - angles.vertical;
        let bearing = (angles.horizontal.sin() / (angles.horizontal.cos() * tilt.cos())).atan();

        TargetEstimate {
            bearing,
            vertical_angle,
            range: self.range_for(vertical_angle),
            captured_at,
            frame_id,
        }
    }

    fn range_for(&self, vertical_angle: f64) -> Option<f64> {
        if !vertical_angle.is_finite() || vertical_angle.abs() < HORIZON_EPSILON {
            return None;
        }
        let range = self.height_difference / vertical_angle.tan();
        range.is_finite().then_some(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::Point;

    fn solver() -> GeometrySolver {
        GeometrySolver::new(CaptureSize::new(640, 480), 500.0, DEFAULT_HEIGHT_DIFFERENCE)
    }

    fn at(x: f64, y: f64) -> Candidate {
        Candidate {
            center: Point::new(x, y),
            width: 180.0,
            height: 100.0,
            rotation_deg: 0.0,
            area: 18000.0,
        }
    }

    #[test]
    fn image_center_with_level_camera_is_straight_ahead() {
        let s = solver();
        let angles = s.pixel_angles(320.0, 240.0);
        assert_eq!(angles.vertical, 0.0);
        let estimate = s.solve(&at(320.0, 240.0), 0.0, Instant::now(), 1);
        assert_eq!(estimate.bearing, 0.0);
        assert_eq!(estimate.vertical_angle, 0.0);
        assert_eq!(estimate.range, None);
    }

    #[test]
    fn near_horizon_range_is_undefined() {
        let s = solver();
        // Just above centre with a matching tiny downward tilt.
        let y = 240.0 - 0.1;
        let tilt = -((0.1f64) / 500.0).atan() + 1e-6;
        let estimate = s.solve(&at(320.0, y), tilt, Instant::now(), 2);
        assert!(estimate.vertical_angle.abs() < HORIZON_EPSILON);
        assert_eq!(estimate.range, None);
    }

    #[test]
    fn range_follows_height_over_tangent() {
        let s = solver();
        let tilt = 30f64.to_radians();
        let estimate = s.solve(&at(320.0, 240.0), tilt, Instant::now(), 3);
        let expected = DEFAULT_HEIGHT_DIFFERENCE / tilt.tan();
        let range = estimate.range.expect("range");
        assert!((range - expected).abs() < 1e-9);
    }

    #[test]
    fn tilt_widens_bearing() {
        let s = solver();
        let level = s.solve(&at(420.0, 240.0), 0.0, Instant::now(), 4);
        let tilted = s.solve(&at(420.0, 240.0), 0.5, Instant::now(), 4);
        assert!((level.bearing - (100.0f64 / 500.0).atan()).abs() < 1e-12);
        assert!(tilted.bearing > level.bearing);
        let left = s.solve(&at(220.0, 240.0), 0.5, Instant::now(), 4);
        assert!((left.bearing + tilted.bearing).abs() < 1e-12);
    }

    #[test]
    fn target_below_centre_raises_vertical_angle_less() {
        let s = solver();
        let tilt = 0.4;
        let centre = s.solve(&at(320.0, 240.0), tilt, Instant::now(), 5);
        let lower = s.solve(&at(320.0, 340.0), tilt, Instant::now(), 5);
        assert!(lower.vertical_angle < centre.vertical_angle);
        assert!(lower.range.expect("range") > centre.range.expect("range"));
    }
}
