use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

///Represents a vector in 2D world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Unit vector pointing along `angle` (radians).
    pub fn from_angle(angle: f32) -> Self {
        Self {
            x: angle.cos(),
            y: angle.sin(),
        }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector, or zero for a zero vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::ZERO
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    pub fn dot(&self, other: Vector2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    ///Z component of the 3D cross product.
    pub fn cross(&self, other: Vector2) -> f32 {
        self.x * other.y - self.y * other.x
    }

    ///Angle of the vector, normalized to `[0, 2π)`.
    pub fn angle(&self) -> f32 {
        normalize_angle(self.y.atan2(self.x))
    }

    ///Mirrors the vector around the line with the given unit normal.
    pub fn reflect(&self, normal: Vector2) -> Vector2 {
        *self - normal * (2.0 * self.dot(normal))
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, other: Vector2) -> Vector2 {
        Vector2::new(self.x + other.x, self.y + other.y)
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, other: Vector2) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, other: Vector2) -> Vector2 {
        Vector2::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f32> for Vector2 {
    type Output = Vector2;

    fn mul(self, scalar: f32) -> Vector2 {
        Vector2::new(self.x * scalar, self.y * scalar)
    }
}

impl Neg for Vector2 {
    type Output = Vector2;

    fn neg(self) -> Vector2 {
        Vector2::new(-self.x, -self.y)
    }
}

/// A straight obstacle or marker line between two points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub a: Vector2,
    pub b: Vector2,
}

impl Segment {
    pub const fn new(a: Vector2, b: Vector2) -> Self {
        Self { a, b }
    }

    pub fn direction(&self) -> Vector2 {
        (self.b - self.a).normalize()
    }

    /// Left-hand unit normal (rotated +90° from `a -> b`).
    pub fn normal(&self) -> Vector2 {
        let d = self.direction();
        Vector2::new(-d.y, d.x)
    }

    pub fn closest_point(&self, p: Vector2) -> Vector2 {
        let ab = self.b - self.a;
        let len_sq = ab.dot(ab);
        if len_sq == 0.0 {
            return self.a;
        }
        let t = ((p - self.a).dot(ab) / len_sq).clamp(0.0, 1.0);
        self.a + ab * t
    }

    pub fn distance_to(&self, p: Vector2) -> f32 {
        (p - self.closest_point(p)).magnitude()
    }

    /// True when the path `from -> to` strictly crosses this segment.
    pub fn crossed_by(&self, from: Vector2, to: Vector2) -> bool {
        let d1 = (self.b - self.a).cross(from - self.a);
        let d2 = (self.b - self.a).cross(to - self.a);
        let d3 = (to - from).cross(self.a - from);
        let d4 = (to - from).cross(self.b - from);
        (d1 > 0.0) != (d2 > 0.0) && d1 != 0.0 && (d3 > 0.0) != (d4 > 0.0)
    }
}

/// Wraps an angle into `[0, 2π)`.
pub fn normalize_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Wraps an angle difference into `(-π, π]`.
pub fn wrap_difference(delta: f32) -> f32 {
    let wrapped = normalize_angle(delta);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

/// Moves `value` toward `target` by at most `step`, landing exactly on the
/// target once it is within reach.
pub fn approach(value: f32, target: f32, step: f32) -> f32 {
    let diff = target - value;
    if diff.abs() <= step {
        target
    } else {
        value + step.copysign(diff)
    }
}
