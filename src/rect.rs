//! Convex hull and minimum-area rotated rectangle.

/// Point in pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Rectangle at arbitrary rotation.
///
/// `angle_deg` is the rotation of the `width` side from the +x axis
/// (y grows downward). `min_area_rect` reports it in `(-90, 0]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotatedRect {
    pub center: Point,
    pub width: f64,
    pub height: f64,
    pub angle_deg: f64,
}

impl RotatedRect {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Corner points, in order around the rectangle.
    pub fn corners(&self) -> [Point; 4] {
        let (sin, cos) = self.angle_deg.to_radians().sin_cos();
        let (hw, hh) = (self.width / 2.0, self.height / 2.0);
        let corner = |a: f64, b: f64| {
            Point::new(
                self.center.x + a * cos - b * sin,
                self.center.y + a * sin + b * cos,
            )
        };
        [
            corner(-hw, -hh),
            corner(hw, -hh),
            corner(hw, hh),
            corner(-hw, hh),
        ]
    }
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Convex hull by monotone chain. Collinear points are dropped.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut pts: Vec<Point> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Minimum-area enclosing rectangle of a point set.
///
/// Returns `None` for an empty set. A single point yields a zero-size
/// rectangle; collinear points yield zero height.
pub fn min_area_rect(points: &[Point]) -> Option<RotatedRect> {
    let hull = convex_hull(points);
    match hull.len() {
        0 => return None,
        1 => {
            return Some(RotatedRect {
                center: hull[0],
                width: 0.0,
                height: 0.0,
                angle_deg: 0.0,
            })
        }
        _ => {}
    }

    let mut best: Option<(f64, RotatedRect)> = None;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let (ex, ey) = (b.x - a.x, b.y - a.y);
        let len = ex.hypot(ey);
        if len == 0.0 {
            continue;
        }
        let (ux, uy) = (ex / len, ey / len);
        let (vx, vy) = (-uy, ux);

        let (mut min_u, mut max_u) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_v, mut max_v) = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &hull {
            let pu = p.x * ux + p.y * uy;
            let pv = p.x * vx + p.y * vy;
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }
        let width = max_u - min_u;
        let height = max_v - min_v;
        let area = width * height;
        if best.as_ref().is_some_and(|(best_area, _)| *best_area <= area) {
            continue;
        }
        let cu = (min_u + max_u) / 2.0;
        let cv = (min_v + max_v) / 2.0;
        let rect = RotatedRect {
            center: Point::new(cu * ux + cv * vx, cu * uy + cv * vy),
            width,
            height,
            angle_deg: uy.atan2(ux).to_degrees(),
        };
        best = Some((area, rect));
    }

    best.map(|(_, rect)| canonical_angle(rect))
}

/// Re-express a rectangle so its angle lies in `(-90, 0]`.
fn canonical_angle(mut rect: RotatedRect) -> RotatedRect {
    // Direction is unsigned: fold into (-90, 90].
    while rect.angle_deg > 90.0 {
        rect.angle_deg -= 180.0;
    }
    while rect.angle_deg <= -90.0 {
        rect.angle_deg += 180.0;
    }
    // Turning the reference side by -90 degrees swaps the side lengths.
    if rect.angle_deg > 0.0 {
        rect.angle_deg -= 90.0;
        std::mem::swap(&mut rect.width, &mut rect.height);
    }
    rect
}
