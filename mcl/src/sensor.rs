use common::robot::{Observation, Pose};
use serde::Deserialize;
use statrs::distribution::{Continuous, ContinuousCDF, Exp, Normal};

use crate::{error::ConfigError, map::MapAdapter};

/// Tolerance on the mixture weights summing to one.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Parameters of the beam mixture model.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BeamModelConfig {
    /// Weight of correct returns with measurement noise.
    pub w_hit: f64,
    /// Weight of returns from unexpected obstacles in front of the expected one.
    pub w_short: f64,
    /// Weight of max range readings (no return).
    pub w_max: f64,
    /// Weight of random readings.
    pub w_rand: f64,

    /// Standard deviation of a correct return, in meters.
    pub sigma_hit: f64,
    /// Rate of the exponential describing short returns, per meter.
    pub lambda_short: f64,

    /// Shortest reading the sensor reports, in meters.
    pub range_min: f64,
    /// Longest reading the sensor reports, in meters.
    pub range_max: f64,

    /// Width of the max range spike, readings in `[range_max - width, range_max]` count as
    /// max range.
    pub max_spike_width: f64,
}

impl Default for BeamModelConfig {
    fn default() -> Self {
        Self {
            w_hit: 0.25,
            w_short: 0.25,
            w_max: 0.25,
            w_rand: 0.25,
            sigma_hit: 0.1,
            lambda_short: 0.1,
            range_min: 0.12,
            range_max: 3.5,
            max_spike_width: 0.01,
        }
    }
}

impl BeamModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [self.w_hit, self.w_short, self.w_max, self.w_rand];
        let sum: f64 = weights.iter().sum();
        if weights.iter().any(|w| !(*w >= 0.0)) || (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::MixtureWeights(sum));
        }

        if !(self.sigma_hit > 0.0 && self.sigma_hit.is_finite()) {
            return Err(ConfigError::invalid("sigma_hit", "must be positive"));
        }
        if !(self.lambda_short > 0.0 && self.lambda_short.is_finite()) {
            return Err(ConfigError::invalid("lambda_short", "must be positive"));
        }
        if !(self.range_min >= 0.0 && self.range_max.is_finite() && self.range_min < self.range_max)
        {
            return Err(ConfigError::invalid(
                "range_min/range_max",
                format!(
                    "need 0 <= range_min < range_max, got [{}, {}]",
                    self.range_min, self.range_max
                ),
            ));
        }
        if !(self.max_spike_width > 0.0 && self.max_spike_width <= self.range_max - self.range_min)
        {
            return Err(ConfigError::invalid(
                "max_spike_width",
                "must be positive and fit inside the sensor range",
            ));
        }
        Ok(())
    }
}

/// What to do with readings that are not a number or lie outside the sensor range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum InvalidBeamPolicy {
    /// Ignore the offending beams, score the particle on the remaining ones.
    #[default]
    SkipBeam,
    /// Ignore the whole scan if any beam is invalid.
    SkipScan,
}

/// A single usable reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beam {
    /// Direction relative to the robot heading, in radians.
    pub bearing: f64,
    /// Measured distance in meters.
    pub range: f64,
}

/// The beam based sensor model: a mixture of a hit, short, max and random density evaluated at
/// the measured range, given the range expected from ray casting the map.
#[derive(Debug, Clone)]
pub struct BeamModel {
    config: BeamModelConfig,
    standard: Normal,
    short: Exp,
}

impl BeamModel {
    pub fn new(config: BeamModelConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let standard = Normal::new(0.0, 1.0)
            .map_err(|e| ConfigError::invalid("sigma_hit", e.to_string()))?;
        let short = Exp::new(config.lambda_short)
            .map_err(|e| ConfigError::invalid("lambda_short", e.to_string()))?;

        Ok(Self {
            config,
            standard,
            short,
        })
    }

    pub fn config(&self) -> &BeamModelConfig {
        &self.config
    }

    /// Gaussian around the expected range, truncated to the sensor range and renormalized.
    fn p_hit(&self, measured: f64, expected: f64) -> f64 {
        let c = &self.config;
        let sigma = c.sigma_hit;
        let mass = self.standard.cdf((c.range_max - expected) / sigma)
            - self.standard.cdf((c.range_min - expected) / sigma);

        if mass > 0.0 {
            self.standard.pdf((measured - expected) / sigma) / sigma / mass
        } else {
            0.0
        }
    }

    /// Exponential decay over `[range_min, expected]`, renormalized to that interval.
    fn p_short(&self, measured: f64, expected: f64) -> f64 {
        if measured > expected || expected <= self.config.range_min {
            return 0.0;
        }

        let mass = self.short.cdf(expected) - self.short.cdf(self.config.range_min);
        if mass > 0.0 {
            self.short.pdf(measured) / mass
        } else {
            0.0
        }
    }

    fn p_max(&self, measured: f64) -> f64 {
        let c = &self.config;
        if measured >= c.range_max - c.max_spike_width {
            1.0 / c.max_spike_width
        } else {
            0.0
        }
    }

    fn p_rand(&self) -> f64 {
        1.0 / (self.config.range_max - self.config.range_min)
    }

    /// Density of measuring `measured` when the map predicts `expected`. Zero outside the
    /// sensor range. `expected` is clamped into the sensor range.
    pub fn beam_likelihood(&self, measured: f64, expected: f64) -> f64 {
        let c = &self.config;
        if !(measured >= c.range_min && measured <= c.range_max) {
            return 0.0;
        }
        let expected = expected.clamp(c.range_min, c.range_max);

        c.w_hit * self.p_hit(measured, expected)
            + c.w_short * self.p_short(measured, expected)
            + c.w_max * self.p_max(measured)
            + c.w_rand * self.p_rand()
    }

    /// Whether a reading lies inside both the sensor's reported limits and the model's.
    fn is_valid(&self, scan: &Observation, range: f64) -> bool {
        scan.is_valid_range(range) && range >= self.config.range_min && range <= self.config.range_max
    }

    /// Picks every `stride`:th beam of the scan and drops invalid readings according to
    /// `policy`. Returns `None` if the whole scan must be skipped.
    pub fn select_beams(
        &self,
        scan: &Observation,
        stride: usize,
        policy: InvalidBeamPolicy,
    ) -> Option<Vec<Beam>> {
        let mut beams = Vec::with_capacity(scan.ranges.len() / stride.max(1) + 1);

        for (bearing, range) in scan.beams().step_by(stride.max(1)) {
            if self.is_valid(scan, range) {
                beams.push(Beam { bearing, range });
            } else if policy == InvalidBeamPolicy::SkipScan {
                return None;
            }
        }

        Some(beams)
    }

    /// Sum of the per-beam log likelihoods for a particle at `pose`. Beams are treated as
    /// independent given the pose. No beams means no information: 0.
    pub fn log_likelihood<M: MapAdapter + ?Sized>(&self, pose: &Pose, beams: &[Beam], map: &M) -> f64 {
        beams
            .iter()
            .map(|b| {
                let expected = map.ray_cast(pose, b.bearing, self.config.range_max);
                self.beam_likelihood(b.range, expected).ln()
            })
            .sum()
    }

    /// Scores a single particle against a full scan, skipping invalid readings.
    pub fn particle_log_likelihood<M: MapAdapter + ?Sized>(
        &self,
        pose: &Pose,
        scan: &Observation,
        map: &M,
    ) -> f64 {
        match self.select_beams(scan, 1, InvalidBeamPolicy::SkipBeam) {
            Some(beams) => self.log_likelihood(pose, &beams, map),
            None => 0.0,
        }
    }
}
