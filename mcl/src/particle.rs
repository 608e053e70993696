use std::f64::consts::PI;

use common::{gaussian::PoseGaussian, math::angle_diff, robot::Pose};
use nalgebra::{Matrix3, Vector2, Vector3};
use rand::{distributions::Distribution, Rng};
use statrs::distribution::Normal;

use crate::{
    error::{ConfigError, FilterError},
    map::MapAdapter,
    resample::{effective_sample_size, systematic_indices},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub pose: Pose,
    pub weight: f64,
}

impl Particle {
    pub fn new(pose: Pose, weight: f64) -> Self {
        Self { pose, weight }
    }
}

/// A fixed size population of weighted pose hypotheses.
#[derive(Debug, Clone)]
pub struct ParticleSet {
    particles: Vec<Particle>,
}

impl ParticleSet {
    /// Spreads `count` particles uniformly over the free space of the map, with uniform headings
    /// in `[0, 2 PI)`.
    pub fn uniform<M, R>(count: usize, map: &M, rng: &mut R) -> Result<Self, FilterError>
    where
        M: MapAdapter + ?Sized,
        R: Rng + ?Sized,
    {
        if count == 0 {
            return Err(ConfigError::NoParticles.into());
        }

        let free = map.free_cells();
        if free.is_empty() {
            return Err(FilterError::NoFreeSpace);
        }

        let weight = 1.0 / count as f64;
        let particles = (0..count)
            .map(|_| {
                let cell = free[rng.gen_range(0..free.len())];
                let fraction = Vector2::new(rng.gen::<f64>(), rng.gen::<f64>());
                let position = map.point_in_cell(cell, fraction);
                let theta = rng.gen_range(0.0..2.0 * PI);
                Particle::new(Pose::new(position.x, position.y, theta), weight)
            })
            .collect();

        Ok(Self { particles })
    }

    /// Places `count` particles around a known pose with independent Gaussian spread in position
    /// and heading. Zero spread puts every particle exactly on `pose`.
    pub fn gaussian<R: Rng + ?Sized>(
        count: usize,
        pose: Pose,
        std_xy: f64,
        std_theta: f64,
        rng: &mut R,
    ) -> Result<Self, FilterError> {
        if count == 0 {
            return Err(ConfigError::NoParticles.into());
        }
        if !(std_xy >= 0.0 && std_theta >= 0.0) {
            return Err(ConfigError::invalid("initial", "spread must be non-negative").into());
        }

        let standard = Normal::new(0.0, 1.0)
            .map_err(|e| ConfigError::invalid("initial", e.to_string()))?;

        let weight = 1.0 / count as f64;
        let particles = (0..count)
            .map(|_| {
                let pose = Pose::new(
                    pose.x + std_xy * standard.sample(rng),
                    pose.y + std_xy * standard.sample(rng),
                    pose.theta + std_theta * standard.sample(rng),
                );
                Particle::new(pose, weight)
            })
            .collect();

        Ok(Self { particles })
    }

    pub fn from_particles(particles: Vec<Particle>) -> Self {
        Self { particles }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn poses(&self) -> Vec<Pose> {
        self.particles.iter().map(|p| p.pose).collect()
    }

    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    /// Overwrites the weights, `weights` must have one entry per particle.
    pub fn set_weights(&mut self, weights: &[f64]) {
        debug_assert_eq!(weights.len(), self.particles.len());
        self.particles
            .iter_mut()
            .zip(weights)
            .for_each(|(p, &w)| p.weight = w);
    }

    pub fn set_uniform_weights(&mut self) {
        let w = 1.0 / self.particles.len() as f64;
        self.particles.iter_mut().for_each(|p| p.weight = w);
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.weights())
    }

    /// Draws a new generation with systematic resampling using a single random offset. Assumes
    /// the weights are normalized. Every particle of the new generation has weight `1/N`.
    pub fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let offset: f64 = rng.gen();
        let indices = systematic_indices(&self.weights(), offset);

        let weight = 1.0 / self.particles.len() as f64;
        // (note that this a copying operation)
        self.particles = indices
            .into_iter()
            .map(|i| Particle::new(self.particles[i].pose, weight))
            .collect();
    }

    /// Weighted mean and covariance of the particle poses. The heading uses the circular mean and
    /// wrapped differences. Weights are renormalized, so this also works mid-cycle.
    pub fn estimate(&self) -> Option<PoseGaussian> {
        let total: f64 = self.particles.iter().map(|p| p.weight).sum();
        if !(total > 0.0) {
            return None;
        }

        let (mut x, mut y, mut sin, mut cos) = (0.0, 0.0, 0.0, 0.0);
        for p in &self.particles {
            let w = p.weight / total;
            x += w * p.pose.x;
            y += w * p.pose.y;
            sin += w * p.pose.theta.sin();
            cos += w * p.pose.theta.cos();
        }
        let mean = Pose::new(x, y, sin.atan2(cos));

        let covariance = self
            .particles
            .iter()
            .map(|p| {
                let d = Vector3::new(
                    p.pose.x - mean.x,
                    p.pose.y - mean.y,
                    angle_diff(mean.theta, p.pose.theta),
                );
                d * d.transpose() * (p.weight / total)
            })
            .sum::<Matrix3<f64>>();

        Some(PoseGaussian { mean, covariance })
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{map::OccupancyGrid, testing::room};

    #[test]
    fn uniform_particles_are_in_free_space() {
        let map = room();
        let mut rng = StdRng::seed_from_u64(1);
        let set = ParticleSet::uniform(500, &map, &mut rng).unwrap();

        assert_eq!(set.len(), 500);
        for p in set.particles() {
            let cell = map
                .cell_at(&nalgebra::Point2::new(p.pose.x, p.pose.y))
                .expect("particle outside of map");
            assert!(!map.is_occupied(cell));
            assert!((0.0..2.0 * PI).contains(&p.pose.theta));
            assert_relative_eq!(p.weight, 1.0 / 500.0);
        }
    }

    #[test]
    fn uniform_needs_free_space() {
        let full = OccupancyGrid::from_rows(&["##", "##"], 1.0, Pose::default()).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            ParticleSet::uniform(10, &full, &mut rng).unwrap_err(),
            FilterError::NoFreeSpace
        );
        assert_eq!(
            ParticleSet::uniform(0, &room(), &mut rng).unwrap_err(),
            FilterError::Config(ConfigError::NoParticles)
        );
    }

    #[test]
    fn gaussian_without_spread_is_exact() {
        let pose = Pose::new(1.0, 2.0, 0.3);
        let set = ParticleSet::gaussian(20, pose, 0.0, 0.0, &mut StdRng::seed_from_u64(2)).unwrap();
        assert!(set.particles().iter().all(|p| p.pose == pose));
    }

    #[test]
    fn estimate_of_spread_population() {
        let pose = Pose::new(-1.0, 4.0, 3.0);
        let set =
            ParticleSet::gaussian(20_000, pose, 0.2, 0.1, &mut StdRng::seed_from_u64(5)).unwrap();

        let estimate = set.estimate().unwrap();
        assert_relative_eq!(estimate.mean.x, pose.x, epsilon = 0.01);
        assert_relative_eq!(estimate.mean.y, pose.y, epsilon = 0.01);
        assert_relative_eq!(estimate.mean.theta, pose.theta, epsilon = 0.01);

        let (sx, sy, st) = estimate.std_dev();
        assert_relative_eq!(sx, 0.2, epsilon = 0.01);
        assert_relative_eq!(sy, 0.2, epsilon = 0.01);
        assert_relative_eq!(st, 0.1, epsilon = 0.01);
    }

    #[test]
    fn heading_mean_wraps() {
        let set = ParticleSet::from_particles(vec![
            Particle::new(Pose::new(0.0, 0.0, PI - 0.1), 0.5),
            Particle::new(Pose::new(0.0, 0.0, -PI + 0.1), 0.5),
        ]);
        let estimate = set.estimate().unwrap();
        assert_relative_eq!(estimate.mean.theta.abs(), PI, epsilon = 1e-9);
        assert_relative_eq!(estimate.covariance[(2, 2)], 0.01, epsilon = 1e-9);
    }

    #[test]
    fn resample_keeps_size_and_resets_weights() {
        let mut set = ParticleSet::from_particles(
            (0..8)
                .map(|i| Particle::new(Pose::new(i as f64, 0.0, 0.0), if i == 5 { 1.0 } else { 0.0 }))
                .collect(),
        );

        set.resample(&mut StdRng::seed_from_u64(9));

        assert_eq!(set.len(), 8);
        for p in set.particles() {
            assert_eq!(p.pose.x, 5.0);
            assert_relative_eq!(p.weight, 1.0 / 8.0);
        }
    }
}
