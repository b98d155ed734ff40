use crate::Vector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn origin() -> Self {
        Self::new(0., 0., 0.)
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: Self) -> f64 {
        Vector::from_points(*self, other).length()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = f.precision().unwrap_or(2); // Default 2 decimals
        write!(
            f,
            "Point({:.prec$}, {:.prec$}, {:.prec$})",
            self.x,
            self.y,
            self.z,
            prec = prec
        )
    }
}

// Implement +
impl Add<Vector> for Point {
    type Output = Point;
    fn add(self, other: Vector) -> Self {
        Self {
            x: self.x + other.dx,
            y: self.y + other.dy,
            z: self.z + other.dz,
        }
    }
}

// Point - Point is the displacement from `other` to `self`
impl Sub for Point {
    type Output = Vector;
    fn sub(self, other: Self) -> Vector {
        Vector::from_points(other, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let p0 = Point::new(1., 2., 3.);
        let p1 = Point::new(4., 6., 3.);
        assert!((p0.distance(p1) - 5.).abs() < 1e-12);
        assert_eq!(p0.distance(p0), 0.);
    }

    #[test]
    fn test_sub_gives_displacement() {
        let p0 = Point::new(1., 1., 1.);
        let p1 = Point::new(2., 3., 4.);
        let d = p1 - p0;
        assert_eq!(d, Vector::new(1., 2., 3.));
        assert_eq!(p0 + d, p1);
    }
}
