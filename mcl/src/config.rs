use common::robot::Pose;
use nalgebra::Matrix3;
use serde::Deserialize;

use crate::{
    error::ConfigError,
    motion::ProcessNoise,
    sensor::{BeamModelConfig, InvalidBeamPolicy},
};

/// What to do when every particle ends up with zero weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum DegenerateWeightPolicy {
    /// Treat all particles as equally likely and resample as usual.
    #[default]
    Uniform,
    /// Reset the weights to uniform but keep the population as is for this cycle.
    KeepParticles,
}

/// How the particle set is created when the filter is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub enum InitialPopulation {
    /// Uniform over the free cells of the map with uniform headings.
    #[default]
    Uniform,
    /// Gaussian around a known starting pose.
    Gaussian {
        pose: Pose,
        std_xy: f64,
        std_theta: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MclConfig {
    /// Number of particles N, constant for the lifetime of the filter.
    pub particle_count: usize,

    /// Covariance of the twist noise `(v_x, v_y, omega)`, row major.
    pub process_noise: [[f64; 3]; 3],

    /// Time step in seconds used by a regular cycle.
    pub cycle_period: f64,

    pub beam: BeamModelConfig,

    /// Only use every n:th beam of a scan.
    pub beam_stride: usize,

    pub invalid_beams: InvalidBeamPolicy,

    pub degenerate_weights: DegenerateWeightPolicy,

    /// Seed of the random source, drawn from the OS if missing.
    pub seed: Option<u64>,

    pub initial: InitialPopulation,
}

impl Default for MclConfig {
    fn default() -> Self {
        // scaled 3x3 Hilbert matrix
        let mut process_noise = [[0.0; 3]; 3];
        for (i, row) in process_noise.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = 0.01 / (i + j + 1) as f64;
            }
        }

        Self {
            particle_count: 100,
            process_noise,
            cycle_period: 0.1,
            beam: BeamModelConfig::default(),
            beam_stride: 1,
            invalid_beams: InvalidBeamPolicy::default(),
            degenerate_weights: DegenerateWeightPolicy::default(),
            seed: None,
            initial: InitialPopulation::default(),
        }
    }
}

impl MclConfig {
    pub fn process_noise_matrix(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|i, j| self.process_noise[i][j])
    }

    /// Checks every parameter. Constructing the filter calls this, so a filter that exists
    /// always has a valid configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.particle_count == 0 {
            return Err(ConfigError::NoParticles);
        }
        if !(self.cycle_period > 0.0 && self.cycle_period.is_finite()) {
            return Err(ConfigError::invalid("cycle_period", "must be positive"));
        }
        if self.beam_stride == 0 {
            return Err(ConfigError::invalid("beam_stride", "must be at least 1"));
        }
        if let InitialPopulation::Gaussian {
            std_xy, std_theta, ..
        } = self.initial
        {
            if !(std_xy >= 0.0 && std_theta >= 0.0) {
                return Err(ConfigError::invalid(
                    "initial",
                    "spread must be non-negative",
                ));
            }
        }

        self.beam.validate()?;
        ProcessNoise::new(self.process_noise_matrix())?;

        Ok(())
    }
}
