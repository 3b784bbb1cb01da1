use std::ops::{Add, AddAssign, BitXor, Div, DivAssign, Index, IndexMut, Mul, MulAssign, Neg, Rem, Sub, SubAssign};

/// Double precision 3 component vector. All compiler geometry runs in f64,
/// map coordinates are big enough for f32 to lose splits.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

macro_rules! impl_vec3d_operator {
    ($op_name: ident, $op_fn_name: ident, $assign_name: ident, $assign_fn_name: ident, $op: tt) => {
        impl $op_name for Vec3d {
            type Output = Vec3d;

            fn $op_fn_name(self, rhs: Vec3d) -> Vec3d {
                Vec3d::new(self.x $op rhs.x, self.y $op rhs.y, self.z $op rhs.z)
            }
        }

        impl $op_name<f64> for Vec3d {
            type Output = Vec3d;

            fn $op_fn_name(self, rhs: f64) -> Vec3d {
                Vec3d::new(self.x $op rhs, self.y $op rhs, self.z $op rhs)
            }
        }

        impl $assign_name for Vec3d {
            fn $assign_fn_name(&mut self, rhs: Vec3d) {
                *self = *self $op rhs;
            }
        }

        impl $assign_name<f64> for Vec3d {
            fn $assign_fn_name(&mut self, rhs: f64) {
                *self = *self $op rhs;
            }
        }
    };
}

impl_vec3d_operator!(Add, add, AddAssign, add_assign, +);
impl_vec3d_operator!(Sub, sub, SubAssign, sub_assign, -);
impl_vec3d_operator!(Mul, mul, MulAssign, mul_assign, *);
impl_vec3d_operator!(Div, div, DivAssign, div_assign, /);

impl Mul<Vec3d> for f64 {
    type Output = Vec3d;

    fn mul(self, rhs: Vec3d) -> Vec3d {
        rhs * self
    }
}

impl Neg for Vec3d {
    type Output = Vec3d;

    fn neg(self) -> Vec3d {
        Vec3d::new(-self.x, -self.y, -self.z)
    }
}

/// Dot product
impl BitXor for Vec3d {
    type Output = f64;

    fn bitxor(self, rhs: Vec3d) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }
}

/// Cross product
impl Rem for Vec3d {
    type Output = Vec3d;

    fn rem(self, rhs: Vec3d) -> Vec3d {
        Vec3d::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }
}

/// Axis access, used by the builder and bound code that walks x/y/z in loops
impl Index<usize> for Vec3d {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        match index {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("Vec3d axis index {index} out of range"),
        }
    }
}

impl IndexMut<usize> for Vec3d {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        match index {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            _ => panic!("Vec3d axis index {index} out of range"),
        }
    }
}

impl From<[f64; 3]> for Vec3d {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl Vec3d {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn length2(&self) -> f64 {
        *self ^ *self
    }

    pub fn length(&self) -> f64 {
        self.length2().sqrt()
    }

    pub fn normalized(&self) -> Self {
        *self / self.length()
    }

    pub fn checked_normalized(&self) -> Option<Self> {
        let len2 = self.length2();

        if len2 > f64::EPSILON {
            Some(*self / len2.sqrt())
        } else {
            None
        }
    }

    /// Per-component absolute value
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    pub fn min(self, rhs: Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    pub fn max(self, rhs: Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }

    /// Index of the component with the largest magnitude
    pub fn major_axis(self) -> usize {
        let a = self.abs();

        if a.x >= a.y && a.x >= a.z {
            0
        } else if a.y >= a.z {
            1
        } else {
            2
        }
    }

    /// Component-wise comparison within epsilon
    pub fn epsilon_eq(self, rhs: Self, epsilon: f64) -> bool {
        (0..3).all(|i| (self[i] - rhs[i]).abs() <= epsilon)
    }
}
