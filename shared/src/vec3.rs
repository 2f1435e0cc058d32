//! 3D vector utilities for observation rays and voxel clipping.
//! Positions are in world units (one unit = one voxel edge). Directions are unit vectors
//! unless noted.

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(a: [f64; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Shorthand constructor
pub fn vec3(x: f64, y: f64, z: f64) -> Vec3 {
    Vec3::new(x, y, z)
}

/// Dot product
pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a.x * b.x + a.y * b.y + a.z * b.z
}

/// Vector length
pub fn length(v: Vec3) -> f64 {
    (v.x * v.x + v.y * v.y + v.z * v.z).sqrt()
}

/// Euclidean distance between two points
pub fn distance(a: Vec3, b: Vec3) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Normalize vector to unit length. Degenerate input maps to +X.
pub fn normalize(v: Vec3) -> Vec3 {
    let len = length(v);
    if len < 1e-10 {
        return Vec3::new(1.0, 0.0, 0.0);
    }
    Vec3::new(v.x / len, v.y / len, v.z / len)
}

/// Scale vector by scalar
pub fn scale(v: Vec3, s: f64) -> Vec3 {
    Vec3::new(v.x * s, v.y * s, v.z * s)
}

/// Add two vectors
pub fn add(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(a.x + b.x, a.y + b.y, a.z + b.z)
}

/// Subtract vectors (a - b)
pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(a.x - b.x, a.y - b.y, a.z - b.z)
}

/// Flip direction
pub fn negate(v: Vec3) -> Vec3 {
    Vec3::new(-v.x, -v.y, -v.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn near(a: Vec3, b: Vec3) -> bool {
        distance(a, b) < EPS
    }

    #[test]
    fn perpendicular_view_and_up_have_zero_dot() {
        let view = normalize(vec3(2.0, 0.0, 2.0));
        assert!(dot(view, vec3(0.0, 1.0, 0.0)).abs() < EPS);
    }

    #[test]
    fn diagonal_block_distance() {
        let a = vec3(1.0, 2.0, 3.0);
        let b = vec3(4.0, 6.0, 3.0);
        assert!((distance(a, b) - 5.0).abs() < EPS);
        assert_eq!(distance(a, b), distance(b, a));
        assert_eq!(distance(a, b), length(sub(b, a)));
    }

    #[test]
    fn look_direction_normalizes_to_unit_length() {
        let v = normalize(vec3(0.0, -3.0, 4.0));
        assert!((length(v) - 1.0).abs() < EPS);
        assert!(near(v, vec3(0.0, -0.6, 0.8)));
    }

    #[test]
    fn degenerate_direction_falls_back_to_east() {
        assert_eq!(normalize(vec3(0.0, 0.0, 0.0)), vec3(1.0, 0.0, 0.0));
        assert_eq!(normalize(vec3(1e-12, 0.0, 0.0)), vec3(1.0, 0.0, 0.0));
    }

    #[test]
    fn pull_back_along_direction() {
        // origin - direction * 4
        let origin = vec3(10.0, 64.0, -3.0);
        let dir = normalize(vec3(0.0, 0.0, 1.0));
        assert!(near(sub(origin, scale(dir, 4.0)), vec3(10.0, 64.0, -7.0)));
        assert!(near(add(origin, scale(negate(dir), 4.0)), vec3(10.0, 64.0, -7.0)));
    }

    #[test]
    fn non_finite_components_are_detected() {
        assert!(vec3(0.0, 64.0, 0.0).is_finite());
        assert!(!vec3(f64::NAN, 64.0, 0.0).is_finite());
        assert!(!vec3(0.0, 0.0, f64::INFINITY).is_finite());
    }

    #[test]
    fn array_conversion_keeps_order() {
        let v = Vec3::from_array([0.25, -1.0, 8.0]);
        assert_eq!(v.to_array(), [0.25, -1.0, 8.0]);
    }
}
