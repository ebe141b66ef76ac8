//! Spherical directions and unit vectors

use serde::{Deserialize, Serialize};

/// Direction on the sphere, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    /// Azimuth in degrees (-180 to 180, 0 = front, positive = right)
    pub azimuth: f32,
    /// Elevation in degrees (-90 to 90, positive = up)
    pub elevation: f32,
}

impl Direction {
    /// Create a direction, wrapping azimuth and clamping elevation
    pub fn new(azimuth: f32, elevation: f32) -> Self {
        Self {
            azimuth: wrap_azimuth(azimuth),
            elevation: clamp_elevation(elevation),
        }
    }

    /// Unit vector for this direction (x = right, y = front, z = up)
    pub fn to_unit_vector(&self) -> Vec3 {
        let az_rad = self.azimuth.to_radians();
        let el_rad = self.elevation.to_radians();
        let cos_el = el_rad.cos();

        Vec3 {
            x: az_rad.sin() * cos_el,
            y: az_rad.cos() * cos_el,
            z: el_rad.sin(),
        }
    }

    /// Great-circle angular distance to another direction, in degrees
    pub fn angular_distance_to(&self, other: &Direction) -> f32 {
        self.to_unit_vector().angle_between(&other.to_unit_vector())
    }
}

/// Wrap an azimuth angle into [-180, 180] degrees
pub fn wrap_azimuth(azimuth: f32) -> f32 {
    let mut az = azimuth % 360.0;
    if az > 180.0 {
        az -= 360.0;
    } else if az < -180.0 {
        az += 360.0;
    }
    az
}

/// Clamp an elevation angle into [-90, 90] degrees
pub fn clamp_elevation(elevation: f32) -> f32 {
    elevation.clamp(-90.0, 90.0)
}

/// Unit Cartesian vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate (left/right, positive = right)
    pub x: f32,
    /// Y coordinate (front/back, positive = front)
    pub y: f32,
    /// Z coordinate (up/down, positive = up)
    pub z: f32,
}

impl Vec3 {
    /// Create new vector
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Dot product
    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Get magnitude
    pub fn magnitude(&self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Normalize to unit length
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag < 1e-10 {
            return Self::new(0.0, 1.0, 0.0); // Default forward
        }
        Self::new(self.x / mag, self.y / mag, self.z / mag)
    }

    /// Angle to another unit vector, in degrees
    ///
    /// The dot product is clamped to [-1, 1] before the inverse cosine, so
    /// near-parallel vectors never produce a NaN.
    pub fn angle_between(&self, other: &Self) -> f32 {
        self.dot(other).clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Spherical direction of this vector
    pub fn to_direction(&self) -> Direction {
        let mag = self.magnitude();
        if mag < 1e-10 {
            return Direction {
                azimuth: 0.0,
                elevation: 0.0,
            };
        }
        Direction {
            azimuth: self.x.atan2(self.y).to_degrees(),
            elevation: (self.z / mag).asin().to_degrees(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_unit_vector_conventions() {
        // Front center
        let v = Direction::new(0.0, 0.0).to_unit_vector();
        assert_abs_diff_eq!(v.x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v.y, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(v.z, 0.0, epsilon = 1e-6);

        // Right
        let v = Direction::new(90.0, 0.0).to_unit_vector();
        assert_abs_diff_eq!(v.x, 1.0, epsilon = 1e-6);

        // Up
        let v = Direction::new(0.0, 90.0).to_unit_vector();
        assert_abs_diff_eq!(v.z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_azimuth_wrap() {
        assert_abs_diff_eq!(wrap_azimuth(190.0), -170.0, epsilon = 1e-6);
        assert_abs_diff_eq!(wrap_azimuth(-190.0), 170.0, epsilon = 1e-6);
        assert_abs_diff_eq!(wrap_azimuth(360.0), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(wrap_azimuth(45.0), 45.0, epsilon = 1e-6);
    }

    #[test]
    fn test_angular_distance() {
        let front = Direction::new(0.0, 0.0);
        let right = Direction::new(90.0, 0.0);
        let back = Direction::new(180.0, 0.0);

        assert_abs_diff_eq!(front.angular_distance_to(&right), 90.0, epsilon = 1e-3);
        assert_abs_diff_eq!(front.angular_distance_to(&back), 180.0, epsilon = 1e-3);
        assert_abs_diff_eq!(front.angular_distance_to(&front), 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_round_trip() {
        let dir = Direction::new(37.0, -22.0);
        let back = dir.to_unit_vector().to_direction();
        assert_abs_diff_eq!(dir.azimuth, back.azimuth, epsilon = 1e-3);
        assert_abs_diff_eq!(dir.elevation, back.elevation, epsilon = 1e-3);
    }
}
