//! Deduplicated plane registry

use std::collections::HashMap;

use crate::{
    error::GeometryError,
    geom::{Plane, PlaneType, DIST_EPSILON, NORMAL_EPSILON},
    math::Vec3d,
};

/// Registered plane
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MapPlane {
    pub plane: Plane,
    pub kind: PlaneType,
}

impl std::ops::Deref for MapPlane {
    type Target = Plane;

    fn deref(&self) -> &Plane {
        &self.plane
    }
}

/// Plane registry. Planes are stored in pairs, `2k` is the canonical
/// (positive) plane and `2k + 1` is its negation, so `n ^ 1` always gives
/// the opposite plane.
#[derive(Clone, Debug, Default)]
pub struct PlaneSet {
    planes: Vec<MapPlane>,

    /// Positive plane indices by rounded distance
    hash: HashMap<i64, Vec<usize>>,
}

/// Snap almost axial normals and almost integer distances, then turn plane
/// positive. Returns canonical plane and flag set if plane was negated.
pub fn canonicalize(plane: Plane) -> (Plane, bool) {
    let mut normal = plane.normal;
    let mut distance = plane.distance;

    for axis in 0..3 {
        if (normal[axis] - 1.0).abs() < NORMAL_EPSILON {
            normal = Vec3d::zero();
            normal[axis] = 1.0;
            break;
        }
        if (normal[axis] + 1.0).abs() < NORMAL_EPSILON {
            normal = Vec3d::zero();
            normal[axis] = -1.0;
            break;
        }
    }

    let rounded = distance.round();
    if (distance - rounded).abs() < DIST_EPSILON {
        distance = rounded;
    }

    let plane = Plane::new(normal, distance);
    let axis = plane.kind().axis();

    if plane.normal[axis] < 0.0 {
        (plane.negate_direction(), true)
    } else {
        (plane, false)
    }
}

impl PlaneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered planes, negations included
    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }

    pub fn get(&self, plane_num: usize) -> &MapPlane {
        &self.planes[plane_num]
    }

    pub fn iter(&self) -> impl Iterator<Item = &MapPlane> {
        self.planes.iter()
    }

    fn find(&self, plane: &Plane) -> Option<usize> {
        let key = plane.distance.abs().round() as i64;

        (key - 1..=key + 1)
            .filter_map(|k| self.hash.get(&k))
            .flatten()
            .copied()
            .find(|index| self.planes[*index].plane.epsilon_eq(plane))
    }

    /// Find plane number or register new plane pair
    pub fn add(&mut self, plane: Plane) -> Result<usize, GeometryError> {
        let length = plane.normal.length();
        if !length.is_finite() || !plane.distance.is_finite() || (length - 1.0).abs() > 0.01 {
            return Err(GeometryError::InvalidNormal(plane.normal));
        }

        let plane = Plane::new(plane.normal / length, plane.distance / length);
        let (positive, flipped) = canonicalize(plane);

        let index = match self.find(&positive) {
            Some(index) => index,
            None => {
                let index = self.planes.len();
                let kind = positive.kind();

                self.planes.push(MapPlane { plane: positive, kind });
                self.planes.push(MapPlane { plane: positive.negate_direction(), kind });
                self.hash
                    .entry(positive.distance.abs().round() as i64)
                    .or_default()
                    .push(index);

                index
            }
        };

        Ok(index | flipped as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_and_dedup() {
        let mut planes = PlaneSet::new();

        let up = planes.add(Plane::new(Vec3d::new(0.0, 0.0, 1.0), 16.0)).unwrap();
        let down = planes.add(Plane::new(Vec3d::new(0.0, 0.0, -1.0), -16.0)).unwrap();
        let near = planes.add(Plane::new(Vec3d::new(0.000001, 0.0, 0.9999999), 16.00001)).unwrap();

        assert_eq!(up, 0);
        assert_eq!(down, 1);
        assert_eq!(near, 0);
        assert_eq!(planes.len(), 2);
        assert_eq!(planes.get(up ^ 1).normal, Vec3d::new(0.0, 0.0, -1.0));
        assert_eq!(planes.get(up).kind, PlaneType::Z);
    }

    #[test]
    fn non_axial_positive_side() {
        let mut planes = PlaneSet::new();
        let normal = Vec3d::new(-3.0, 1.0, 0.0).normalized();
        let num = planes.add(Plane::new(normal, 10.0)).unwrap();

        assert_eq!(num & 1, 1);
        assert!(planes.get(num & !1).normal.x > 0.0);
        assert_eq!(planes.get(num).kind, PlaneType::AnyX);
        assert!(planes.get(num).epsilon_eq(&Plane::new(normal, 10.0)));
    }

    #[test]
    fn invalid_normal_rejected() {
        let mut planes = PlaneSet::new();

        assert!(planes.add(Plane::new(Vec3d::zero(), 1.0)).is_err());
        assert!(planes.add(Plane::new(Vec3d::new(f64::NAN, 0.0, 0.0), 1.0)).is_err());
    }
}
