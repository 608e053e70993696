use common::robot::{Command, Pose};
use nalgebra::{Matrix3, Vector3};
use rand::{distributions::Distribution, Rng};
use statrs::distribution::Normal;

use crate::{error::ConfigError, particle::Particle, se2};

/// Allowed asymmetry of the process noise covariance, relative to its largest entry.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Zero-mean Gaussian over twist noise `(v_x, v_y, omega)`.
#[derive(Debug, Clone)]
pub struct ProcessNoise {
    covariance: Matrix3<f64>,

    /// lower triangular Cholesky factor, `covariance = L * L^T`
    l: Matrix3<f64>,

    standard: Normal,
}

impl ProcessNoise {
    /// Validates that `covariance` is symmetric positive definite.
    pub fn new(covariance: Matrix3<f64>) -> Result<Self, ConfigError> {
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::invalid(
                "process_noise",
                "entries must be finite",
            ));
        }

        let asymmetry = (covariance - covariance.transpose()).amax();
        let scale = covariance.amax().max(1.0);
        if asymmetry > SYMMETRY_TOLERANCE * scale {
            return Err(ConfigError::NotSymmetric(asymmetry));
        }

        let l = covariance
            .cholesky()
            .ok_or(ConfigError::NotPositiveDefinite)?
            .l();

        // Cholesky succeeds on some semi-definite inputs with zeros on the diagonal
        if l.diagonal().iter().any(|&d| !(d > 0.0)) {
            return Err(ConfigError::NotPositiveDefinite);
        }

        let standard = Normal::new(0.0, 1.0)
            .map_err(|e| ConfigError::invalid("process_noise", e.to_string()))?;

        Ok(Self {
            covariance,
            l,
            standard,
        })
    }

    pub fn covariance(&self) -> &Matrix3<f64> {
        &self.covariance
    }

    /// Draws one noise twist.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vector3<f64> {
        let z = Vector3::new(
            self.standard.sample(rng),
            self.standard.sample(rng),
            self.standard.sample(rng),
        );
        self.l * z
    }
}

/// Velocity motion model on SE(2): the commanded twist plus noise is integrated over `dt`.
pub fn sample_motion(pose: &Pose, command: &Command, dt: f64, noise: &Vector3<f64>) -> Pose {
    let twist = se2::command_twist(command) + noise;
    se2::integrate(pose, &twist, dt)
}

#[derive(Debug, Clone)]
pub struct MotionModel {
    noise: ProcessNoise,
}

impl MotionModel {
    pub fn new(noise: ProcessNoise) -> Self {
        Self { noise }
    }

    /// Moves every particle, drawing a fresh noise sample for each of them.
    pub fn predict<R: Rng + ?Sized>(
        &self,
        particles: &mut [Particle],
        command: &Command,
        dt: f64,
        rng: &mut R,
    ) {
        // noise is drawn up front and in order, so that seeded runs do not depend on how the
        // particles are scheduled below
        let noise: Vec<Vector3<f64>> = (0..particles.len())
            .map(|_| self.noise.sample(rng))
            .collect();

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            particles
                .par_iter_mut()
                .zip(noise.par_iter())
                .for_each(|(p, n)| p.pose = sample_motion(&p.pose, command, dt, n));
        }

        #[cfg(not(feature = "parallel"))]
        particles
            .iter_mut()
            .zip(noise.iter())
            .for_each(|(p, n)| p.pose = sample_motion(&p.pose, command, dt, n));
    }
}
