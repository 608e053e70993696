use nalgebra::Matrix3;

use crate::robot::Pose;

/// A pose estimate with uncertainty, covariance ordered as (x, y, theta).
#[derive(Debug, Clone, Copy)]
pub struct PoseGaussian {
    pub mean: Pose,
    pub covariance: Matrix3<f64>,
}

impl Default for PoseGaussian {
    fn default() -> Self {
        Self {
            mean: Pose::default(),
            covariance: Matrix3::identity(),
        }
    }
}

impl PoseGaussian {
    /// Standard deviations along x, y and theta.
    pub fn std_dev(&self) -> (f64, f64, f64) {
        (
            self.covariance[(0, 0)].max(0.0).sqrt(),
            self.covariance[(1, 1)].max(0.0).sqrt(),
            self.covariance[(2, 2)].max(0.0).sqrt(),
        )
    }
}
