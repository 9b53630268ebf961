//! Geometric filtering of contours into target candidates.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::rect::{min_area_rect, Point, RotatedRect};
use crate::segment::Contour;

pub const DEFAULT_MIN_AREA: f64 = 7500.0;
pub const DEFAULT_EXPECTED_RATIO: f64 = 1.8;
pub const DEFAULT_RATIO_TOLERANCE: f64 = 0.3;

/// A contour that survived filtering. Recomputed every frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub center: Point,
    /// Extent along the side closer to horizontal.
    pub width: f64,
    pub height: f64,
    pub rotation_deg: f64,
    pub area: f64,
}

/// How a frame's survivors become one target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// The survivor with the largest area.
    #[default]
    Largest,
    /// The two largest survivors, merged into one composite target.
    Paired,
}

impl std::str::FromStr for SelectionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "largest" => Ok(Self::Largest),
            "paired" => Ok(Self::Paired),
            other => Err(anyhow!(
                "unknown selection strategy '{}' (expected 'largest' or 'paired')",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterSettings {
    pub min_area: f64,
    pub expected_ratio: f64,
    pub ratio_tolerance: f64,
    pub strategy: SelectionStrategy,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            min_area: DEFAULT_MIN_AREA,
            expected_ratio: DEFAULT_EXPECTED_RATIO,
            ratio_tolerance: DEFAULT_RATIO_TOLERANCE,
            strategy: SelectionStrategy::Largest,
        }
    }
}

/// Why a rectangle was not accepted. These are per-frame outcomes, not errors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rejection {
    Area(f64),
    AspectRatio(f64),
    Degenerate,
}

/// The same rectangle re-expressed so that `width` is the side nearer the
/// horizontal axis. Swapping the sides turns the reference side by 90 degrees
/// toward zero.
pub fn normalized(rect: &RotatedRect) -> RotatedRect {
    if rect.angle_deg.abs() % 90.0 > 45.0 {
        RotatedRect {
            center: rect.center,
            width: rect.height,
            height: rect.width,
            angle_deg: rect.angle_deg - 90f64.copysign(rect.angle_deg),
        }
    } else {
        *rect
    }
}

/// Width and height after `normalized`.
pub fn normalized_dimensions(rect: &RotatedRect) -> (f64, f64) {
    let rect = normalized(rect);
    (rect.width, rect.height)
}

pub struct CandidateFilter {
    settings: FilterSettings,
}

impl CandidateFilter {
    pub fn new(settings: FilterSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    /// Area and aspect-ratio check for one rectangle.
    pub fn evaluate(&self, rect: &RotatedRect) -> Result<Candidate, Rejection> {
        let area = rect.area();
        if area < self.settings.min_area {
            return Err(Rejection::Area(area));
        }
        let upright = normalized(rect);
        if upright.height <= 0.0 {
            return Err(Rejection::Degenerate);
        }
        let ratio = upright.width / upright.height;
        let low = self.settings.expected_ratio - self.settings.ratio_tolerance;
        let high = self.settings.expected_ratio + self.settings.ratio_tolerance;
        if ratio < low || ratio > high {
            return Err(Rejection::AspectRatio(ratio));
        }
        Ok(Candidate {
            center: upright.center,
            width: upright.width,
            height: upright.height,
            rotation_deg: upright.angle_deg,
            area,
        })
    }

    /// Survivors among `contours`, in discovery order.
    pub fn filter(&self, contours: &[Contour]) -> Vec<Candidate> {
        let mut survivors = Vec::new();
        for contour in contours {
            let Some(rect) = min_area_rect(&contour.points) else {
                continue;
            };
            match self.evaluate(&rect) {
                Ok(candidate) => survivors.push(candidate),
                Err(Rejection::Area(area)) => {
                    log::debug!("ignoring blob with area {:.1}", area);
                }
                Err(Rejection::AspectRatio(ratio)) => {
                    log::debug!("ignoring blob with aspect ratio {:.3}", ratio);
                }
                Err(Rejection::Degenerate) => {
                    log::debug!(
                        "ignoring degenerate blob at ({:.1}, {:.1})",
                        rect.center.x,
                        rect.center.y
                    );
                }
            }
        }
        survivors
    }

    /// Pick this frame's target from the survivors.
    pub fn select(&self, candidates: &[Candidate]) -> Option<Candidate> {
        match self.settings.strategy {
            SelectionStrategy::Largest => largest(candidates).copied(),
            SelectionStrategy::Paired => paired(candidates),
        }
    }
}

fn largest(candidates: &[Candidate]) -> Option<&Candidate> {
    // First of equal areas wins, keeping discovery order as the tie-break.
    candidates
        .iter()
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.area >= c.area => Some(b),
            _ => Some(c),
        })
}

fn paired(candidates: &[Candidate]) -> Option<Candidate> {
    let first = largest(candidates)?;
    let rest: Vec<Candidate> = candidates
        .iter()
        .filter(|c| !std::ptr::eq(*c, first))
        .copied()
        .collect();
    let second = largest(&rest)?;
    Some(composite(first, second))
}

/// Merge two candidates into the rectangle enclosing both.
fn composite(a: &Candidate, b: &Candidate) -> Candidate {
    let corners: Vec<Point> = [a, b]
        .iter()
        .flat_map(|c| {
            RotatedRect {
                center: c.center,
                width: c.width,
                height: c.height,
                angle_deg: c.rotation_deg,
            }
            .corners()
        })
        .collect();
    let center = Point::new(
        (a.center.x + b.center.x) / 2.0,
        (a.center.y + b.center.y) / 2.0,
    );
    match min_area_rect(&corners) {
        Some(rect) => {
            let upright = normalized(&rect);
            Candidate {
                center,
                width: upright.width,
                height: upright.height,
                rotation_deg: upright.angle_deg,
                area: a.area + b.area,
            }
        }
        None => Candidate {
            center,
            area: a.area + b.area,
            ..*a
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(width: f64, height: f64, angle_deg: f64) -> RotatedRect {
        RotatedRect {
            center: Point::new(320.0, 240.0),
            width,
            height,
            angle_deg,
        }
    }

    fn candidate(x: f64, area: f64) -> Candidate {
        Candidate {
            center: Point::new(x, 100.0),
            width: 18.0,
            height: 10.0,
            rotation_deg: 0.0,
            area,
        }
    }

    #[test]
    fn steep_rotation_swaps_dimensions() {
        let steep = rect(10.0, 30.0, 80.0);
        let shallow = rect(30.0, 10.0, -10.0);
        assert_eq!(normalized_dimensions(&steep), (30.0, 10.0));
        assert_eq!(normalized_dimensions(&steep), normalized_dimensions(&shallow));

        let filter = CandidateFilter::new(FilterSettings {
            min_area: 0.0,
            expected_ratio: 3.0,
            ratio_tolerance: 0.1,
            strategy: SelectionStrategy::Largest,
        });
        let a = filter.evaluate(&steep).expect("steep accepted");
        let b = filter.evaluate(&shallow).expect("shallow accepted");
        assert_eq!(a, b);
    }

    #[test]
    fn candidate_rotation_follows_swapped_sides() {
        // A bar tilted 5 degrees comes out of the fit as the -85 degree form.
        let bar = rect(180.0, 100.0, 5.0);
        let fitted = min_area_rect(&bar.corners()).expect("fit");
        assert!(fitted.angle_deg < -45.0, "angle {}", fitted.angle_deg);

        let filter = CandidateFilter::new(FilterSettings::default());
        let c = filter.evaluate(&fitted).expect("bar accepted");
        assert!((c.width - 180.0).abs() < 1e-6, "width {}", c.width);
        assert!((c.height - 100.0).abs() < 1e-6, "height {}", c.height);
        assert!((c.rotation_deg - 5.0).abs() < 1e-6, "rotation {}", c.rotation_deg);

        let rebuilt = RotatedRect {
            center: c.center,
            width: c.width,
            height: c.height,
            angle_deg: c.rotation_deg,
        };
        for (p, q) in min_area_rect(&rebuilt.corners())
            .expect("refit")
            .corners()
            .iter()
            .zip(fitted.corners().iter())
        {
            assert!((p.x - q.x).abs() < 1e-6 && (p.y - q.y).abs() < 1e-6);
        }
    }

    #[test]
    fn area_threshold_applies_before_ratio() {
        let filter = CandidateFilter::new(FilterSettings::default());
        // 120 x 66.67 = 8000, ratio 1.8
        let accepted = filter.evaluate(&rect(120.0, 8000.0 / 120.0, -5.0));
        assert!(accepted.is_ok());
        // 94.87 x 52.70 = 5000, ratio 1.8
        let w = (5000.0f64 * 1.8).sqrt();
        let rejected = filter.evaluate(&rect(w, 5000.0 / w, -5.0));
        assert!(matches!(rejected, Err(Rejection::Area(a)) if (a - 5000.0).abs() < 1e-6));
    }

    #[test]
    fn ratio_window_is_inclusive_band() {
        let filter = CandidateFilter::new(FilterSettings::default());
        assert!(filter.evaluate(&rect(200.0, 100.0, 0.0)).is_ok()); // 2.0
        assert!(matches!(
            filter.evaluate(&rect(250.0, 100.0, 0.0)),
            Err(Rejection::AspectRatio(_))
        ));
        assert!(matches!(
            filter.evaluate(&rect(100.0, 100.0, 0.0)),
            Err(Rejection::AspectRatio(_))
        ));
    }

    #[test]
    fn zero_height_is_degenerate() {
        let filter = CandidateFilter::new(FilterSettings {
            min_area: 0.0,
            ..FilterSettings::default()
        });
        assert_eq!(filter.evaluate(&rect(10.0, 0.0, 0.0)), Err(Rejection::Degenerate));
    }

    #[test]
    fn largest_strategy_prefers_first_on_ties() {
        let filter = CandidateFilter::new(FilterSettings::default());
        let picked = filter
            .select(&[candidate(1.0, 8000.0), candidate(2.0, 9000.0), candidate(3.0, 9000.0)])
            .expect("target");
        assert_eq!(picked.center.x, 2.0);
        assert!(filter.select(&[]).is_none());
    }

    #[test]
    fn paired_strategy_merges_two_largest() {
        let filter = CandidateFilter::new(FilterSettings {
            strategy: SelectionStrategy::Paired,
            ..FilterSettings::default()
        });
        let picked = filter
            .select(&[candidate(100.0, 8000.0), candidate(50.0, 7600.0), candidate(200.0, 9000.0)])
            .expect("pair");
        assert_eq!(picked.center.x, 150.0);
        assert_eq!(picked.area, 17000.0);
        // Enclosing box spans 91..209 horizontally.
        assert!((picked.width - 118.0).abs() < 1e-6, "width {}", picked.width);
        assert!((picked.height - 10.0).abs() < 1e-6);
    }

    #[test]
    fn paired_strategy_keeps_tilted_bars_side_by_side() {
        let filter = CandidateFilter::new(FilterSettings {
            strategy: SelectionStrategy::Paired,
            ..FilterSettings::default()
        });
        let bars: Vec<Candidate> = [170.0, 470.0]
            .iter()
            .map(|x| {
                let bar = RotatedRect {
                    center: Point::new(*x, 240.0),
                    width: 180.0,
                    height: 100.0,
                    angle_deg: 5.0,
                };
                let fitted = min_area_rect(&bar.corners()).expect("fit");
                filter.evaluate(&fitted).expect("bar accepted")
            })
            .collect();
        let picked = filter.select(&bars).expect("pair");
        assert!((picked.center.x - 320.0).abs() < 1e-6);
        // Upright pair would be 480 x 100; the tilt widens it slightly.
        assert!(picked.width > 450.0 && picked.width < 500.0, "width {}", picked.width);
        assert!(picked.height > 100.0 && picked.height < 140.0, "height {}", picked.height);
        assert!(picked.rotation_deg.abs() < 10.0, "rotation {}", picked.rotation_deg);
    }

    #[test]
    fn paired_strategy_needs_two_survivors() {
        let filter = CandidateFilter::new(FilterSettings {
            strategy: SelectionStrategy::Paired,
            ..FilterSettings::default()
        });
        assert!(filter.select(&[candidate(1.0, 8000.0)]).is_none());
    }

    #[test]
    fn strategy_parses_from_text() {
        assert_eq!("Paired".parse::<SelectionStrategy>().unwrap(), SelectionStrategy::Paired);
        assert!("biggest".parse::<SelectionStrategy>().is_err());
    }
}
