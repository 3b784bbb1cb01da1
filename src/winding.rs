//! Convex planar polygon with plane clipping

use itertools::Itertools;

use crate::{error::GeometryError, geom::{BoundBox, Plane, PointRelation}, math::Vec3d};

/// Point limit for builder windings
pub const MAX_POINTS_ON_WINDING: usize = 96;

/// Edges shorter than this don't count when testing for tiny windings
pub const EDGE_LENGTH_EPSILON: f64 = 0.2;

/// Consecutive points closer than this are merged after clipping
const POINT_MERGE_EPSILON: f64 = 1e-7;

/// Distance tolerance used by `Winding::check`
const CHECK_EPSILON: f64 = 0.1;

/// Ordered convex polygon. Normal direction is determined by point order,
/// (p2 - p0) x (p1 - p0) points to the front side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Winding {
    points: Vec<Vec3d>,
}

impl From<Vec<Vec3d>> for Winding {
    fn from(points: Vec<Vec3d>) -> Self {
        Self { points }
    }
}

impl Winding {
    pub fn new(points: Vec<Vec3d>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Vec3d] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Vec3d> + '_ {
        self.points.iter().copied()
    }

    /// Edges as (start, end) pairs, last edge closes the loop
    pub fn edges(&self) -> impl Iterator<Item = (Vec3d, Vec3d)> + '_ {
        self.points.iter().copied().circular_tuple_windows()
    }

    /// Build huge square lying on plane. Winding normal matches plane normal.
    pub fn base_for_plane(plane: &Plane, extent: f64) -> Self {
        let normal = plane.normal;

        let mut up = if normal.major_axis() == 2 {
            Vec3d::new(1.0, 0.0, 0.0)
        } else {
            Vec3d::new(0.0, 0.0, 1.0)
        };

        up = (up - normal * (up ^ normal)).normalized();
        let right = up % normal;

        let origin = normal * plane.distance;
        let up = up * extent;
        let right = right * extent;

        Self {
            points: vec![
                origin - right + up,
                origin + right + up,
                origin + right - up,
                origin - right - up,
            ],
        }
    }

    /// Split winding by plane.
    ///
    /// Points within `epsilon` are on the plane and go to both parts. If whole
    /// winding lies on the plane, `keep_on` sends it to the side its normal faces,
    /// otherwise it goes back.
    pub fn clip(&self, plane: &Plane, epsilon: f64, keep_on: bool) -> (Option<Winding>, Option<Winding>) {
        let dists = self.points.iter().map(|p| plane.point_distance(*p)).collect::<Vec<_>>();
        let sides = dists.iter().map(|d| {
            if *d > epsilon {
                PointRelation::Front
            } else if *d < -epsilon {
                PointRelation::Back
            } else {
                PointRelation::OnPlane
            }
        }).collect::<Vec<_>>();

        let front_count = sides.iter().filter(|s| **s == PointRelation::Front).count();
        let back_count = sides.iter().filter(|s| **s == PointRelation::Back).count();

        if keep_on && front_count == 0 && back_count == 0 {
            let faces_front = self.plane().map(|p| (p.normal ^ plane.normal) >= 0.0).unwrap_or(true);

            return if faces_front {
                (Some(self.clone()), None)
            } else {
                (None, Some(self.clone()))
            };
        }

        if front_count == 0 {
            return (None, Some(self.clone()));
        }
        if back_count == 0 {
            return (Some(self.clone()), None);
        }

        let mut front = Vec::with_capacity(self.points.len() + 4);
        let mut back = Vec::with_capacity(self.points.len() + 4);

        for i in 0..self.points.len() {
            let j = (i + 1) % self.points.len();
            let p1 = self.points[i];

            match sides[i] {
                PointRelation::OnPlane => {
                    front.push(p1);
                    back.push(p1);
                    continue;
                }
                PointRelation::Front => front.push(p1),
                PointRelation::Back => back.push(p1),
            }

            if sides[j] == PointRelation::OnPlane || sides[j] == sides[i] {
                continue;
            }

            let p2 = self.points[j];
            let t = dists[i] / (dists[i] - dists[j]);
            let mut mid = Vec3d::zero();

            for axis in 0..3 {
                mid[axis] = if plane.normal[axis] == 1.0 {
                    plane.distance
                } else if plane.normal[axis] == -1.0 {
                    -plane.distance
                } else {
                    p1[axis] + t * (p2[axis] - p1[axis])
                };
            }

            front.push(mid);
            back.push(mid);
        }

        (Self::collapse(front), Self::collapse(back))
    }

    /// Merge coincident neighbours, drop result if it has no area left
    fn collapse(mut points: Vec<Vec3d>) -> Option<Winding> {
        points.dedup_by(|a, b| a.epsilon_eq(*b, POINT_MERGE_EPSILON));
        while points.len() > 1 && points[0].epsilon_eq(points[points.len() - 1], POINT_MERGE_EPSILON) {
            points.pop();
        }

        (points.len() >= 3).then_some(Winding { points })
    }

    /// Keep front part of the winding
    pub fn clip_front(&self, plane: &Plane, epsilon: f64, keep_on: bool) -> Option<Winding> {
        self.clip(plane, epsilon, keep_on).0
    }

    /// Keep back part of the winding
    pub fn clip_back(&self, plane: &Plane, epsilon: f64, keep_on: bool) -> Option<Winding> {
        self.clip(plane, epsilon, keep_on).1
    }

    pub fn area(&self) -> f64 {
        let Some(first) = self.points.first().copied() else {
            return 0.0;
        };

        self.points[1..]
            .iter()
            .tuple_windows()
            .map(|(a, b)| ((*b - first) % (*a - first)).length() * 0.5)
            .sum()
    }

    /// Point average
    pub fn center(&self) -> Vec3d {
        if self.points.is_empty() {
            return Vec3d::zero();
        }
        self.points.iter().fold(Vec3d::zero(), |s, p| s + *p) / self.points.len() as f64
    }

    pub fn bounds(&self) -> BoundBox {
        BoundBox::for_points(self.iter())
    }

    /// Plane of the winding, None for degenerate windings
    pub fn plane(&self) -> Option<Plane> {
        let first = *self.points.first()?;

        let normal = self.points[1..]
            .iter()
            .tuple_windows()
            .fold(Vec3d::zero(), |s, (a, b)| s + ((*b - first) % (*a - first)))
            .checked_normalized()?;

        Some(Plane::new(normal, first ^ normal))
    }

    /// Bounding sphere as (origin, radius) pair
    pub fn bounding_sphere(&self) -> (Vec3d, f64) {
        let origin = self.center();
        let radius = self.iter().map(|p| (p - origin).length()).fold(0.0, f64::max);

        (origin, radius)
    }

    /// Same polygon with opposite normal
    pub fn flipped(&self) -> Self {
        Self { points: self.points.iter().rev().copied().collect() }
    }

    /// Remove points that lie on the line through their neighbours
    pub fn remove_colinear(&self) -> Self {
        let n = self.points.len();
        let points = (0..n)
            .filter(|&i| {
                let prev = self.points[(i + n - 1) % n];
                let next = self.points[(i + 1) % n];
                let curr = self.points[i];

                match ((curr - prev).checked_normalized(), (next - curr).checked_normalized()) {
                    (Some(v1), Some(v2)) => (v1 ^ v2) < 0.999,
                    _ => false,
                }
            })
            .map(|i| self.points[i])
            .collect();

        Self { points }
    }

    /// Check if winding has fewer than 3 edges longer than `edge_epsilon`
    pub fn is_tiny(&self, edge_epsilon: f64) -> bool {
        self.edges()
            .filter(|(a, b)| (*b - *a).length() > edge_epsilon)
            .take(3)
            .count() < 3
    }

    /// Check if any coordinate reaches world extent
    pub fn is_huge(&self, world_extent: f64) -> bool {
        self.points.iter().any(|p| (0..3).any(|i| p[i].abs() >= world_extent))
    }

    /// Fail with `WindingOverflow` if winding has more than `limit` points
    pub fn check_point_limit(&self, limit: usize) -> Result<(), GeometryError> {
        if self.points.len() > limit {
            return Err(GeometryError::WindingOverflow { count: self.points.len(), limit });
        }
        Ok(())
    }

    /// Full validation: point count, range, planarity, edges and convexity
    pub fn check(&self, plane: &Plane, world_extent: f64) -> Result<(), GeometryError> {
        if self.points.len() < 3 {
            return Err(GeometryError::TooFewPoints(self.points.len()));
        }
        self.check_point_limit(MAX_POINTS_ON_WINDING)?;

        for (i, point) in self.points.iter().copied().enumerate() {
            if (0..3).any(|axis| point[axis].abs() >= world_extent) {
                return Err(GeometryError::OutOfRange { point, extent: world_extent });
            }

            let dist = plane.point_distance(point);
            if dist.abs() > CHECK_EPSILON {
                return Err(GeometryError::PointOffPlane(dist));
            }

            let next = self.points[(i + 1) % self.points.len()];
            let dir = next - point;
            if dir.length() < CHECK_EPSILON {
                return Err(GeometryError::DegenerateEdge(i));
            }

            // every other point must be on the inner side of the edge
            let edge_normal = (plane.normal % dir).normalized();
            let edge_dist = point ^ edge_normal;

            for other in self.points.iter() {
                if (*other ^ edge_normal) - edge_dist > CHECK_EPSILON {
                    return Err(GeometryError::NonConvex(i));
                }
            }
        }

        Ok(())
    }
}
