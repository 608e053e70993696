use nalgebra::{Matrix3, Point2, Vector2};
use serde::Deserialize;

use crate::math::normalize_angle;

/// The pose of a robot in the 2D plane.
#[derive(Debug, Copy, Clone, Default, PartialEq, Deserialize)]
pub struct Pose {
    /// The x position of the robot
    pub x: f64,

    /// The y position of the robot
    pub y: f64,

    /// The rotation of the robot, measured in radians counter-clockwise from the positive x-axis.
    pub theta: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self { x, y, theta }
    }

    pub fn xy(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    /// The homogeneous transform of this pose, i.e. the element of SE(2) taking points in the
    /// robot frame into the world frame.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let (s, c) = self.theta.sin_cos();
        Matrix3::new(
            c, -s, self.x, //
            s, c, self.y, //
            0.0, 0.0, 1.0,
        )
    }

    /// Extracts a pose from a homogeneous transform. The heading is recovered with `atan2` on the
    /// first column, which projects a slightly non-orthonormal rotation block back onto SO(2).
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self {
            x: m[(0, 2)],
            y: m[(1, 2)],
            theta: m[(1, 0)].atan2(m[(0, 0)]),
        }
    }

    /// Returns `self * other`, i.e. `other` expressed in the frame of `self`.
    pub fn compose(&self, other: &Pose) -> Pose {
        let (s, c) = self.theta.sin_cos();
        Pose {
            x: self.x + c * other.x - s * other.y,
            y: self.y + s * other.x + c * other.y,
            theta: normalize_angle(self.theta + other.theta),
        }
    }

    /// Transforms a point given in the frame of this pose into the parent frame.
    pub fn transform_point(&self, p: &Point2<f64>) -> Point2<f64> {
        let (s, c) = self.theta.sin_cos();
        Point2::new(self.x + c * p.x - s * p.y, self.y + s * p.x + c * p.y)
    }

    /// Transforms a point given in the parent frame into the frame of this pose.
    pub fn inverse_transform_point(&self, p: &Point2<f64>) -> Point2<f64> {
        let (s, c) = self.theta.sin_cos();
        let dx = p.x - self.x;
        let dy = p.y - self.y;
        Point2::new(c * dx + s * dy, -s * dx + c * dy)
    }
}

impl From<Pose> for (f64, f64) {
    fn from(val: Pose) -> Self {
        (val.x, val.y)
    }
}

/// A velocity command sent to the robot, e.g. from teleoperation or a planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Command {
    /// Forward velocity in meters/second along the robot x-axis.
    pub linear: f64,

    /// Rotational velocity in radians/second, counter-clockwise positive.
    pub angular: f64,
}

impl Command {
    pub fn new(linear: f64, angular: f64) -> Self {
        Self { linear, angular }
    }
}

/// Contains all data for a single range scan. Beam `i` was measured at bearing
/// `angle_min + i * angle_increment` relative to the robot heading.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Sequence number assigned by the producer.
    pub id: usize,

    /// Bearing of the first beam in radians.
    pub angle_min: f64,

    /// Angular distance between consecutive beams in radians.
    pub angle_increment: f64,

    /// Shortest range the sensor reports, in meters.
    pub range_min: f64,

    /// Longest range the sensor reports, in meters.
    pub range_max: f64,

    /// The measured distances in meters.
    pub ranges: Vec<f64>,
}

impl Observation {
    pub fn bearing(&self, index: usize) -> f64 {
        self.angle_min + index as f64 * self.angle_increment
    }

    /// Iterates over `(bearing, range)` pairs.
    pub fn beams(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ranges
            .iter()
            .enumerate()
            .map(|(i, &r)| (self.bearing(i), r))
    }

    /// A reading is usable if it is a finite number within the sensor limits.
    pub fn is_valid_range(&self, range: f64) -> bool {
        range.is_finite() && range >= self.range_min && range <= self.range_max
    }
}
