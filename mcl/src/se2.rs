//! Elements of SE(2) and its Lie algebra.
//!
//! Twists are ordered as `(v_x, v_y, omega)`, matching the layout of the hat operator
//!
//! ```text
//!        | 0  -w  vx |
//! hat =  | w   0  vy |
//!        | 0   0   0 |
//! ```

use common::robot::{Command, Pose};
use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

/// Below this rotation angle the exponential uses the first order expansion.
const SMALL_ANGLE: f64 = 1e-9;

/// Maps a twist onto its skew-symmetric Lie algebra element.
pub fn hat(twist: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -twist.z, twist.x, //
        twist.z, 0.0, twist.y, //
        0.0, 0.0, 0.0,
    )
}

/// The twist commanded by a velocity command: forward motion along the robot x-axis plus rotation.
pub fn command_twist(command: &Command) -> Vector3<f64> {
    Vector3::new(command.linear, 0.0, command.angular)
}

/// Closed form matrix exponential of `hat(twist) * dt`.
pub fn exp(twist: &Vector3<f64>, dt: f64) -> Matrix3<f64> {
    let v = Vector2::new(twist.x, twist.y) * dt;
    let theta = twist.z * dt;

    let (s, c) = theta.sin_cos();

    let translation = if theta.abs() < SMALL_ANGLE {
        v
    } else {
        let jacobian = Matrix2::new(s, -(1.0 - c), 1.0 - c, s) / theta;
        jacobian * v
    };

    Matrix3::new(
        c, -s, translation.x, //
        s, c, translation.y, //
        0.0, 0.0, 1.0,
    )
}

/// Moves `pose` along `twist` for `dt` seconds: `pose * exp(hat(twist) * dt)`.
pub fn integrate(pose: &Pose, twist: &Vector3<f64>, dt: f64) -> Pose {
    Pose::from_matrix(&(pose.to_matrix() * exp(twist, dt)))
}
