//! Flat geometry used when fitting a portal rectangle onto a surface.

use bevy::prelude::*;

/// The two world axes spanning a surface plane: the axis most aligned with the normal is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneAxes {
    u: usize,
    v: usize,
}

impl PlaneAxes {
    pub fn for_normal(normal: Vec3) -> PlaneAxes {
        let n = normal.abs();
        if n.z >= n.x && n.z >= n.y {
            PlaneAxes { u: 0, v: 1 }
        } else if n.x >= n.y {
            PlaneAxes { u: 2, v: 1 }
        } else {
            PlaneAxes { u: 0, v: 2 }
        }
    }

    pub fn project(&self, point: Vec3) -> Vec2 {
        Vec2::new(point[self.u], point[self.v])
    }

    /// Turn an in-plane displacement back into a world displacement.
    pub fn lift(&self, delta: Vec2) -> Vec3 {
        let mut out = Vec3::ZERO;
        out[self.u] = delta.x;
        out[self.v] = delta.y;
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds2 {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds2 {
    pub fn from_points(a: Vec2, b: Vec2) -> Bounds2 {
        Bounds2 {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Smallest per-axis shift bringing `self` inside `outer`; zero on axes already inside.
    pub fn correction_into(&self, outer: &Bounds2) -> Vec2 {
        let mut shift = Vec2::ZERO;
        if self.min.x < outer.min.x {
            shift.x = outer.min.x - self.min.x;
        } else if self.max.x > outer.max.x {
            shift.x = outer.max.x - self.max.x;
        }
        if self.min.y < outer.min.y {
            shift.y = outer.min.y - self.min.y;
        } else if self.max.y > outer.max.y {
            shift.y = outer.max.y - self.max.y;
        }
        shift
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    /// The vertical and horizontal sides meeting at this corner.
    fn sides(&self) -> [Side; 2] {
        match self {
            Corner::TopLeft => [Side::Left, Side::Top],
            Corner::TopRight => [Side::Right, Side::Top],
            Corner::BottomLeft => [Side::Left, Side::Bottom],
            Corner::BottomRight => [Side::Right, Side::Bottom],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
    Top,
    Bottom,
}

impl Side {
    fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
            Side::Top => Side::Bottom,
            Side::Bottom => Side::Top,
        }
    }
}

/// A possibly rotated rectangle, corners labelled by their position in the plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect2 {
    pub top_left: Vec2,
    pub top_right: Vec2,
    pub bottom_left: Vec2,
    pub bottom_right: Vec2,
    pub center: Vec2,
}

impl Rect2 {
    /// Label four corners: the two highest are the top ones, then left is the smaller x.
    pub fn from_corners(center: Vec2, mut corners: [Vec2; 4]) -> Rect2 {
        corners.sort_by(|a, b| b.y.total_cmp(&a.y));
        let (top_left, top_right) = if corners[0].x < corners[1].x {
            (corners[0], corners[1])
        } else {
            (corners[1], corners[0])
        };
        let (bottom_left, bottom_right) = if corners[2].x < corners[3].x {
            (corners[2], corners[3])
        } else {
            (corners[3], corners[2])
        };
        Rect2 {
            top_left,
            top_right,
            bottom_left,
            bottom_right,
            center,
        }
    }

    pub fn corner(&self, corner: Corner) -> Vec2 {
        match corner {
            Corner::TopLeft => self.top_left,
            Corner::TopRight => self.top_right,
            Corner::BottomLeft => self.bottom_left,
            Corner::BottomRight => self.bottom_right,
        }
    }

    fn side(&self, side: Side) -> (Vec2, Vec2) {
        match side {
            Side::Left => (self.bottom_left, self.top_left),
            Side::Right => (self.bottom_right, self.top_right),
            Side::Top => (self.top_left, self.top_right),
            Side::Bottom => (self.bottom_left, self.bottom_right),
        }
    }

    fn edge_crosses(&self, point: Vec2) -> [f32; 4] {
        let edges = [
            (self.top_left, self.top_right),
            (self.top_right, self.bottom_right),
            (self.bottom_right, self.bottom_left),
            (self.bottom_left, self.top_left),
        ];
        edges.map(|(from, to)| (point - from).perp_dot(to - from))
    }

    /// Inside or on the border.
    pub fn contains(&self, point: Vec2) -> bool {
        let crosses = self.edge_crosses(point);
        crosses.iter().all(|c| *c >= 0.) || crosses.iter().all(|c| *c <= 0.)
    }

    /// Inside and further than `tolerance` (scaled by side length) from the border.
    pub fn contains_strictly(&self, point: Vec2, tolerance: f32) -> bool {
        let crosses = self.edge_crosses(point);
        crosses.iter().all(|c| *c > tolerance) || crosses.iter().all(|c| *c < -tolerance)
    }

    /// Unit normals of two adjacent edges, the candidate separating axes.
    fn axes(&self) -> [Vec2; 2] {
        [
            (self.top_right - self.top_left).perp().normalize_or_zero(),
            (self.top_left - self.bottom_left).perp().normalize_or_zero(),
        ]
    }

    fn extent_along(&self, axis: Vec2) -> (f32, f32) {
        Corner::ALL
            .iter()
            .map(|corner| self.corner(*corner).dot(axis))
            .fold((f32::MAX, f32::MIN), |(lo, hi), d| (lo.min(d), hi.max(d)))
    }

    /// Whether the rectangles overlap by more than `tolerance` on every separating axis.
    pub fn overlaps(&self, other: &Rect2, tolerance: f32) -> bool {
        self.axes().into_iter().chain(other.axes()).all(|axis| {
            let (a0, a1) = self.extent_along(axis);
            let (b0, b1) = other.extent_along(axis);
            a1.min(b1) - a0.max(b0) > tolerance
        })
    }

    pub fn translated(&self, delta: Vec2) -> Rect2 {
        Rect2 {
            top_left: self.top_left + delta,
            top_right: self.top_right + delta,
            bottom_left: self.bottom_left + delta,
            bottom_right: self.bottom_right + delta,
            center: self.center + delta,
        }
    }
}

/// Intersection of the infinite lines AB and CD, `None` when they are parallel.
pub fn line_intersection(a: Vec2, b: Vec2, c: Vec2, d: Vec2) -> Option<Vec2> {
    let a1 = b.y - a.y;
    let b1 = a.x - b.x;
    let c1 = a1 * a.x + b1 * a.y;

    let a2 = d.y - c.y;
    let b2 = c.x - d.x;
    let c2 = a2 * c.x + b2 * c.y;

    let determinant = a1 * b2 - a2 * b1;
    if determinant.abs() < f32::EPSILON {
        return None;
    }
    Some(Vec2::new(
        (b2 * c1 - b1 * c2) / determinant,
        (a1 * c2 - a2 * c1) / determinant,
    ))
}

fn closest_to(origin: Vec2, candidates: [Option<Vec2>; 2]) -> Option<Vec2> {
    candidates
        .into_iter()
        .flatten()
        .min_by(|a, b| a.distance_squared(origin).total_cmp(&b.distance_squared(origin)))
}

/// Shift which makes `rect` tangent to `other`, moving it along the line joining their centers.
///
/// Only corners of `rect` lying inside `other` are considered; the shift is measured between
/// where that line leaves `other` and where it enters `rect`. Zero when no corner of `rect` is
/// inside `other`.
pub fn overlap_correction(rect: &Rect2, other: &Rect2) -> Vec2 {
    let away = rect.center - other.center;
    for corner in Corner::ALL {
        if !other.contains(rect.corner(corner)) {
            continue;
        }
        let own_sides = corner.sides();
        let exit = closest_to(
            other.center,
            own_sides.map(|side| {
                let (from, to) = other.side(side.opposite());
                line_intersection(other.center, rect.center, from, to)
            }),
        );
        let entry = closest_to(
            rect.center,
            own_sides.map(|side| {
                let (from, to) = rect.side(side);
                line_intersection(other.center, rect.center, from, to)
            }),
        );
        if let (Some(exit), Some(entry)) = (exit, entry) {
            let shift = exit - entry;
            // A neighbouring corner can be inside too; only accept a push away from `other`.
            if shift.dot(away) > 0. {
                return shift;
            }
        }
    }
    Vec2::ZERO
}

/// Shortest move of `rect` along `direction` after which it no longer overlaps `other`.
///
/// Works for any relative rotation. `None` for a zero direction.
pub fn separating_push(rect: &Rect2, other: &Rect2, direction: Vec2) -> Option<Vec2> {
    let direction = direction.try_normalize()?;
    rect.axes()
        .into_iter()
        .chain(other.axes())
        .filter_map(|axis| {
            let (a0, a1) = rect.extent_along(axis);
            let (b0, b1) = other.extent_along(axis);
            if a1 <= b0 || a0 >= b1 {
                return Some(0.);
            }
            let speed = direction.dot(axis);
            if speed > f32::EPSILON {
                Some((b1 - a0) / speed)
            } else if speed < -f32::EPSILON {
                Some((b0 - a1) / speed)
            } else {
                None
            }
        })
        .min_by(|a, b| a.total_cmp(b))
        .map(|distance| direction * distance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(center: Vec2, half: Vec2) -> Rect2 {
        Rect2::from_corners(
            center,
            [
                center + Vec2::new(-half.x, half.y),
                center + half,
                center - half,
                center + Vec2::new(half.x, -half.y),
            ],
        )
    }

    const HALF: Vec2 = Vec2::new(1.78, 2.62);

    #[test]
    fn plane_axes_drop_normal_axis() {
        let wall = PlaneAxes::for_normal(Vec3::new(0., 0.1, -1.));
        assert_eq!(wall.project(Vec3::new(1., 2., 3.)), Vec2::new(1., 2.));
        let side = PlaneAxes::for_normal(Vec3::X);
        assert_eq!(side.project(Vec3::new(1., 2., 3.)), Vec2::new(3., 2.));
        assert_eq!(side.lift(Vec2::new(5., 6.)), Vec3::new(0., 6., 5.));
        let floor = PlaneAxes::for_normal(Vec3::NEG_Y);
        assert_eq!(floor.project(Vec3::new(1., 2., 3.)), Vec2::new(1., 3.));
    }

    #[test]
    fn correction_only_touches_axes_out_of_bounds() {
        let outer = Bounds2::from_points(Vec2::new(-10., 0.), Vec2::new(10., 6.));
        let inside = Bounds2::from_points(Vec2::new(-1., 1.), Vec2::new(1., 5.));
        assert_eq!(inside.correction_into(&outer), Vec2::ZERO);

        let poking = Bounds2::from_points(Vec2::new(8., -1.), Vec2::new(11., 3.));
        assert_eq!(poking.correction_into(&outer), Vec2::new(-1., 1.));
    }

    #[test]
    fn corners_are_labelled_for_rotated_rectangles() {
        let r = Rect2::from_corners(
            Vec2::ZERO,
            [
                Vec2::new(0., 2.),
                Vec2::new(2., 0.1),
                Vec2::new(-2., -0.1),
                Vec2::new(0., -2.),
            ],
        );
        assert_eq!(r.top_left, Vec2::new(0., 2.));
        assert_eq!(r.top_right, Vec2::new(2., 0.1));
        assert_eq!(r.bottom_left, Vec2::new(-2., -0.1));
        assert_eq!(r.bottom_right, Vec2::new(0., -2.));
        assert!(r.contains(Vec2::new(0.5, 0.5)));
        assert!(!r.contains(Vec2::new(1.9, 1.9)));
    }

    #[test]
    fn parallel_lines_do_not_intersect() {
        let hit = line_intersection(Vec2::ZERO, Vec2::X, Vec2::new(1., -1.), Vec2::new(1., 1.));
        assert_eq!(hit, Some(Vec2::new(1., 0.)));
        assert_eq!(
            line_intersection(Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::new(1., 1.)),
            None
        );
    }

    #[test]
    fn correction_makes_rectangles_tangent() {
        let other = rect(Vec2::ZERO, HALF);
        let ours = rect(Vec2::new(1., 0.5), HALF);
        let shift = overlap_correction(&ours, &other);
        assert!(shift.abs_diff_eq(Vec2::new(2.56, 1.28), 1e-4));

        let moved = ours.translated(shift);
        assert!((moved.top_left.x - other.top_right.x).abs() < 1e-4);
        for corner in Corner::ALL {
            assert!(!other.contains_strictly(moved.corner(corner), 1e-3));
            assert!(!moved.contains_strictly(other.corner(corner), 1e-3));
        }
    }

    #[test]
    fn side_by_side_overlap_moves_horizontally() {
        let other = rect(Vec2::ZERO, HALF);
        let ours = rect(Vec2::new(-1., 0.), HALF);
        let shift = overlap_correction(&ours, &other);
        assert!(shift.abs_diff_eq(Vec2::new(-2.56, 0.), 1e-4));
    }

    #[test]
    fn small_overlaps_are_still_corrected() {
        let other = rect(Vec2::ZERO, HALF);
        let ours = rect(Vec2::new(-3.54, 1.02), HALF);
        let shift = overlap_correction(&ours, &other);
        assert!(shift != Vec2::ZERO);
        assert!(!ours.translated(shift).overlaps(&other, 1e-4));
    }

    #[test]
    fn rotated_rectangles_are_pushed_apart() {
        let other = rect(Vec2::ZERO, HALF);
        let ours = rect(Vec2::new(1., 1.), Vec2::new(HALF.y, HALF.x));
        assert!(ours.overlaps(&other, 1e-4));

        let shift = separating_push(&ours, &other, Vec2::ONE).unwrap();
        // Both axes separate after 1.78 + 2.62 - 1 on each.
        assert!(shift.abs_diff_eq(Vec2::splat(3.4), 1e-4));
        let moved = ours.translated(shift);
        assert!(!moved.overlaps(&other, 1e-4));
        assert!(moved.translated(shift * -0.01).overlaps(&other, 1e-4));
    }

    #[test]
    fn separated_rectangles_need_no_push() {
        let other = rect(Vec2::ZERO, HALF);
        let ours = rect(Vec2::new(5., 0.), HALF);
        assert!(!ours.overlaps(&other, 0.));
        assert_eq!(separating_push(&ours, &other, Vec2::X), Some(Vec2::ZERO));
        assert_eq!(separating_push(&ours, &other, Vec2::ZERO), None);
    }

    #[test]
    fn disjoint_rectangles_need_no_correction() {
        let other = rect(Vec2::ZERO, HALF);
        let ours = rect(Vec2::new(5., 0.), HALF);
        assert_eq!(overlap_correction(&ours, &other), Vec2::ZERO);
        assert_eq!(overlap_correction(&other, &ours), Vec2::ZERO);
    }
}
