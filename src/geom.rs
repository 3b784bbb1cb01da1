use crate::math::Vec3d;

/// Normal component equality epsilon
pub const NORMAL_EPSILON: f64 = 0.00001;

/// Plane distance equality epsilon
pub const DIST_EPSILON: f64 = 0.0001;

/// Default point-on-plane epsilon
pub const ON_EPSILON: f64 = 0.0001;

/// Plane kind. Axial kinds allow cheap point and box classification.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PlaneType {
    /// Normal is exactly (±1, 0, 0)
    X,

    /// Normal is exactly (0, ±1, 0)
    Y,

    /// Normal is exactly (0, 0, ±1)
    Z,

    /// Non-axial, x is the dominant component
    AnyX,

    /// Non-axial, y is the dominant component
    AnyY,

    /// Non-axial, z is the dominant component
    AnyZ,
}

impl PlaneType {
    /// Check if plane is axial
    pub fn is_axial(self) -> bool {
        matches!(self, Self::X | Self::Y | Self::Z)
    }

    /// Axis of axial or dominant component
    pub fn axis(self) -> usize {
        match self {
            Self::X | Self::AnyX => 0,
            Self::Y | Self::AnyY => 1,
            Self::Z | Self::AnyZ => 2,
        }
    }

    /// Classify normal
    pub fn for_normal(normal: Vec3d) -> Self {
        for (axis, kind) in [(0, Self::X), (1, Self::Y), (2, Self::Z)] {
            if normal[axis] == 1.0 || normal[axis] == -1.0 {
                return kind;
            }
        }

        match normal.major_axis() {
            0 => Self::AnyX,
            1 => Self::AnyY,
            _ => Self::AnyZ,
        }
    }
}

/// Plane represetnation structure
///
/// ## Equation
/// Plane equation is Ax + By + Cz + D = 0. In this case,
/// * A = normal.x
/// * B = normal.y
/// * C = normal.z
/// * D = -distance
///
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Plane {
    /// plane normal
    pub normal: Vec3d,

    /// number to multiply normal to to get basic point
    pub distance: f64,
}

/// Relation of plane and point
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointRelation {
    /// Point it located behind plane
    Back,

    /// Point is located on plane
    OnPlane,

    /// Point is located in front of plane
    Front,
}

impl Plane {
    pub const fn new(normal: Vec3d, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Build plane from three points. Normal is (p0 - p1) x (p2 - p1), so
    /// points going clockwise when looking at the front side.
    pub fn from_points(p0: Vec3d, p1: Vec3d, p2: Vec3d) -> Option<Self> {
        let normal = ((p0 - p1) % (p2 - p1)).checked_normalized()?;

        Some(Self { normal, distance: p1 ^ normal })
    }

    /// Make plane that contains equal point set, but has counter-directional normal
    pub fn negate_direction(self) -> Self {
        Self { normal: -self.normal, distance: -self.distance }
    }

    /// Signed distance from plane to point
    pub fn point_distance(&self, point: Vec3d) -> f64 {
        (point ^ self.normal) - self.distance
    }

    /// Get relation of point and plane
    pub fn get_point_relation(&self, point: Vec3d, epsilon: f64) -> PointRelation {
        let metrics = self.point_distance(point);

        if metrics > epsilon {
            PointRelation::Front
        } else if metrics < -epsilon {
            PointRelation::Back
        } else {
            PointRelation::OnPlane
        }
    }

    /// Plane kind of this plane normal
    pub fn kind(&self) -> PlaneType {
        PlaneType::for_normal(self.normal)
    }

    /// Check if planes are equal within normal/distance epsilons
    pub fn epsilon_eq(&self, rhs: &Plane) -> bool {
        self.normal.epsilon_eq(rhs.normal, NORMAL_EPSILON)
            && (self.distance - rhs.distance).abs() <= DIST_EPSILON
    }
}

/// Bounding box
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundBox {
    /// minimal vector
    min: Vec3d,

    /// maximal vector
    max: Vec3d,
}

impl Default for BoundBox {
    fn default() -> Self {
        Self::zero()
    }
}

impl BoundBox {
    /// Build boundbox from min/max vectors, min > max component yields empty box
    pub fn from_minmax(min: Vec3d, max: Vec3d) -> Self {
        Self { min, max }
    }

    /// 'Empty' bounding box
    pub fn zero() -> Self {
        Self {
            min: Vec3d::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Vec3d::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Build minimal boundbox that contains this pair of points
    pub fn new(p1: Vec3d, p2: Vec3d) -> Self {
        Self {
            min: p1.min(p2),
            max: p1.max(p2),
        }
    }

    /// Get boundbox maximal fitting coordinates
    pub fn max(&self) -> Vec3d {
        self.max
    }

    /// Get boundbox minimal fitting coordinates
    pub fn min(&self) -> Vec3d {
        self.min
    }

    /// Mutable access to the minimal corner, used when a split tightens a child box
    pub fn min_mut(&mut self) -> &mut Vec3d {
        &mut self.min
    }

    /// Mutable access to the maximal corner
    pub fn max_mut(&mut self) -> &mut Vec3d {
        &mut self.max
    }

    /// Get boundbox dimensions
    pub fn size(&self) -> Vec3d {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3d {
        (self.min + self.max) * 0.5
    }

    /// Box volume, zero for empty boxes
    pub fn volume(&self) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        let size = self.size();
        size.x * size.y * size.z
    }

    /// Check that every min component does not exceed max
    pub fn is_valid(&self) -> bool {
        (0..3).all(|i| self.min[i] <= self.max[i])
    }

    /// Grow box by some distance on every side
    pub fn grow(self, delta: f64) -> Self {
        Self {
            min: self.min - delta,
            max: self.max + delta,
        }
    }

    /// Get minimal boundbox that contains all points from both of `self` and `rhs`
    pub fn total(&self, rhs: &BoundBox) -> Self {
        Self {
            min: self.min.min(rhs.min),
            max: self.max.max(rhs.max),
        }
    }

    /// Add point to the box
    pub fn add_point(&mut self, point: Vec3d) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Calculate common boundbox for some point set.
    pub fn for_points(iter: impl IntoIterator<Item = Vec3d>) -> Self {
        let mut result = Self::zero();
        for point in iter {
            result.add_point(point);
        }
        result
    }

    /// Check if boundbox intersection isn't empty
    pub fn is_intersecting(&self, another: &BoundBox) -> bool {
        true
            && self.max.x >= another.min.x && self.min.x <= another.max.x
            && self.max.y >= another.min.y && self.min.y <= another.max.y
            && self.max.z >= another.min.z && self.min.z <= another.max.z
    }

    /// Check if boxes are separated by more than epsilon on some axis
    pub fn is_disjoint(&self, another: &BoundBox, epsilon: f64) -> bool {
        (0..3).any(|i| self.min[i] >= another.max[i] - epsilon || self.max[i] <= another.min[i] + epsilon)
    }

    /// Check if point is inside box (borders included)
    pub fn contains_point(&self, point: Vec3d) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Check if every box coordinate magnitude is below the extent
    pub fn is_inside_extent(&self, extent: f64) -> bool {
        (0..3).all(|i| self.min[i] > -extent && self.max[i] < extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_points_orientation() {
        // Quake face winding: normal points out of the brush
        let plane = Plane::from_points(
            Vec3d::new(0.0, 0.0, 16.0),
            Vec3d::new(0.0, 16.0, 16.0),
            Vec3d::new(16.0, 16.0, 16.0),
        ).unwrap();

        assert!(plane.normal.epsilon_eq(Vec3d::new(0.0, 0.0, 1.0), NORMAL_EPSILON));
        assert_eq!(plane.point_distance(Vec3d::new(3.0, 4.0, 16.0)), 0.0);
        assert_eq!(plane.kind(), PlaneType::Z);
    }

    #[test]
    fn bound_box_ops() {
        let mut bb = BoundBox::zero();
        assert!(!bb.is_valid());
        assert_eq!(bb.volume(), 0.0);

        bb.add_point(Vec3d::new(-1.0, -2.0, -3.0));
        bb.add_point(Vec3d::new(1.0, 2.0, 3.0));
        assert_eq!(bb.volume(), 48.0);
        assert!(bb.contains_point(Vec3d::zero()));

        let other = BoundBox::new(Vec3d::new(1.0, 0.0, 0.0), Vec3d::new(2.0, 1.0, 1.0));
        assert!(bb.is_intersecting(&other));
        assert!(bb.is_disjoint(&other, 0.0));
        assert!(bb.grow(1.0).contains_point(Vec3d::new(2.0, 3.0, 4.0)));
    }
}
