use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    gaussian::PoseGaussian,
    robot::{Command, Observation, Pose},
    PerfStats,
};
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    config::{DegenerateWeightPolicy, InitialPopulation, MclConfig},
    error::{ConfigError, FilterError, Result},
    latch::InputHandle,
    map::MapAdapter,
    motion::{MotionModel, ProcessNoise},
    particle::ParticleSet,
    resample::normalize_log_weights,
    sensor::{Beam, BeamModel},
};

/// Lifecycle of the filter. Cycles are only accepted once a particle set exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Uninitialized,
    Ready,
}

enum State<M> {
    Uninitialized,
    Ready { map: Arc<M>, particles: ParticleSet },
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// A new scan was used to reweight the particles.
    pub weighted: bool,

    /// Number of beams that contributed to the weights.
    pub beams_used: usize,

    /// Effective sample size of the weights going into resampling.
    pub effective_sample_size: f64,

    /// Every particle had zero likelihood and the configured fallback was applied.
    pub degenerate: bool,

    pub resampled: bool,

    pub duration: Duration,
}

/// Monte Carlo Localization: a particle filter over SE(2) against a known, static map.
///
/// All filter state lives here. Inputs arrive through an [`InputHandle`] that can be shared with
/// producer threads; each call to [`cycle`](Self::cycle) snapshots the latest command and scan
/// and runs predict, weight and resample.
pub struct MonteCarloLocalization<M: MapAdapter> {
    config: MclConfig,
    motion: MotionModel,
    sensor: BeamModel,
    state: State<M>,
    inputs: InputHandle,

    /// latch sequence number of the last scan used for weighting
    last_scan: u64,

    rng: StdRng,
    stats: PerfStats,
}

impl<M: MapAdapter> MonteCarloLocalization<M> {
    /// Validates the configuration and creates an uninitialized filter.
    pub fn new(config: MclConfig) -> std::result::Result<Self, ConfigError> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, rng)
    }

    /// Like [`new`](Self::new) but with an explicit random source.
    pub fn with_rng(config: MclConfig, rng: StdRng) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let motion = MotionModel::new(ProcessNoise::new(config.process_noise_matrix())?);
        let sensor = BeamModel::new(config.beam)?;

        Ok(Self {
            config,
            motion,
            sensor,
            state: State::Uninitialized,
            inputs: InputHandle::new(),
            last_scan: 0,
            rng,
            stats: PerfStats::new(),
        })
    }

    /// Creates the particle set on `map` as configured by `initial`.
    pub fn initialize(&mut self, map: Arc<M>) -> Result<()> {
        match self.config.initial {
            InitialPopulation::Uniform => self.initialize_uniform(map),
            InitialPopulation::Gaussian {
                pose,
                std_xy,
                std_theta,
            } => self.initialize_gaussian(map, pose, std_xy, std_theta),
        }
    }

    /// Spreads the particles uniformly over the free space of `map`.
    pub fn initialize_uniform(&mut self, map: Arc<M>) -> Result<()> {
        let particles = ParticleSet::uniform(self.config.particle_count, &*map, &mut self.rng)?;
        tracing::info!(
            "initialized {} particles uniformly over {} free cells",
            particles.len(),
            map.free_cells().len()
        );
        self.state = State::Ready { map, particles };
        Ok(())
    }

    /// Places the particles around a known starting pose.
    pub fn initialize_gaussian(
        &mut self,
        map: Arc<M>,
        pose: Pose,
        std_xy: f64,
        std_theta: f64,
    ) -> Result<()> {
        if map.free_cells().is_empty() {
            return Err(FilterError::NoFreeSpace);
        }
        let particles = ParticleSet::gaussian(
            self.config.particle_count,
            pose,
            std_xy,
            std_theta,
            &mut self.rng,
        )?;
        tracing::info!("initialized {} particles around {pose:?}", particles.len());
        self.state = State::Ready { map, particles };
        Ok(())
    }

    pub fn state(&self) -> FilterState {
        match self.state {
            State::Uninitialized => FilterState::Uninitialized,
            State::Ready { .. } => FilterState::Ready,
        }
    }

    /// A handle producers can use to latch new inputs, possibly from other threads.
    pub fn input_handle(&self) -> InputHandle {
        self.inputs.clone()
    }

    pub fn latch_command(&self, command: Command) {
        self.inputs.latch_command(command);
    }

    pub fn latch_scan(&self, scan: Arc<Observation>) {
        self.inputs.latch_scan(scan);
    }

    pub fn config(&self) -> &MclConfig {
        &self.config
    }

    pub fn particles(&self) -> Option<&ParticleSet> {
        match &self.state {
            State::Ready { particles, .. } => Some(particles),
            State::Uninitialized => None,
        }
    }

    /// Weighted mean pose and covariance of the current particle set.
    pub fn estimate(&self) -> Option<PoseGaussian> {
        self.particles().and_then(|p| p.estimate())
    }

    /// Timing of the cycles run so far.
    pub fn stats(&self) -> &PerfStats {
        &self.stats
    }

    /// Runs one cycle with the configured period as time step.
    pub fn cycle(&mut self) -> Result<CycleReport> {
        self.step(self.config.cycle_period)
    }

    /// Runs one predict, weight, resample cycle advancing time by `dt` seconds.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn step(&mut self, dt: f64) -> Result<CycleReport> {
        if !(dt >= 0.0 && dt.is_finite()) {
            return Err(ConfigError::invalid("dt", format!("must be non-negative, got {dt}")).into());
        }

        let State::Ready { map, particles } = &mut self.state else {
            return Err(FilterError::NotInitialized);
        };

        let start = Instant::now();

        // 1. take a consistent copy of the inputs, a scan is only ever used once
        let snapshot = self.inputs.snapshot();
        let scan = snapshot.scan.filter(|(seq, _)| *seq > self.last_scan);
        if let Some((seq, _)) = &scan {
            self.last_scan = *seq;
        }

        // 2. predict
        self.motion.predict(
            particles.particles_mut(),
            &snapshot.command,
            dt,
            &mut self.rng,
        );

        // 3. weight
        let mut report = CycleReport::default();
        match scan {
            None => tracing::trace!("no new scan, motion only update"),
            Some((_, scan)) => match self.sensor.select_beams(
                &scan,
                self.config.beam_stride,
                self.config.invalid_beams,
            ) {
                None => tracing::warn!(
                    "scan {} contains invalid readings and was skipped",
                    scan.id
                ),
                Some(beams) if beams.is_empty() => {
                    tracing::debug!("scan {} has no usable beams, motion only update", scan.id)
                }
                Some(beams) => {
                    let scores = score(&self.sensor, particles, &beams, &**map);

                    let log_weights: Vec<f64> = particles
                        .particles()
                        .iter()
                        .zip(scores)
                        .map(|(p, l)| p.weight.ln() + l)
                        .collect();

                    let normalized = normalize_log_weights(&log_weights);
                    if normalized.degenerate {
                        tracing::warn!(
                            "all particles have zero likelihood for scan {}, falling back to {:?}",
                            scan.id,
                            self.config.degenerate_weights
                        );
                    }

                    particles.set_weights(&normalized.weights);
                    report.weighted = true;
                    report.beams_used = beams.len();
                    report.degenerate = normalized.degenerate;
                }
            },
        }

        // 4. resample, weights are still uniform after a motion only update
        report.effective_sample_size = particles.effective_sample_size();
        if !report.weighted {
            tracing::trace!("nothing weighted, keeping the particle set");
        } else if report.degenerate
            && self.config.degenerate_weights == DegenerateWeightPolicy::KeepParticles
        {
            particles.set_uniform_weights();
        } else {
            particles.resample(&mut self.rng);
            report.resampled = true;
        }

        report.duration = start.elapsed();
        self.stats.update(report.duration);

        tracing::debug!(
            "cycle: weighted={} beams={} ess={:.1} took {}",
            report.weighted,
            report.beams_used,
            report.effective_sample_size,
            self.stats
        );

        Ok(report)
    }
}

/// Log likelihood of every particle. The particles are independent, so this may run in parallel.
fn score<M: MapAdapter + ?Sized>(
    sensor: &BeamModel,
    particles: &ParticleSet,
    beams: &[Beam],
    map: &M,
) -> Vec<f64> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        particles
            .particles()
            .par_iter()
            .map(|p| sensor.log_likelihood(&p.pose, beams, map))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    particles
        .particles()
        .iter()
        .map(|p| sensor.log_likelihood(&p.pose, beams, map))
        .collect()
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        map::OccupancyGrid,
        se2,
        sensor::BeamModelConfig,
        testing::{corridor, perfect_scan, room},
    };

    fn config(seed: u64) -> MclConfig {
        MclConfig {
            particle_count: 100,
            seed: Some(seed),
            ..Default::default()
        }
    }

    fn tiny_noise() -> [[f64; 3]; 3] {
        [[1e-8, 0.0, 0.0], [0.0, 1e-8, 0.0], [0.0, 0.0, 1e-8]]
    }

    #[test]
    fn rejects_cycles_until_initialized() {
        let mut mcl = MonteCarloLocalization::<OccupancyGrid>::new(config(1)).unwrap();
        assert_eq!(mcl.state(), FilterState::Uninitialized);
        assert_eq!(mcl.cycle(), Err(FilterError::NotInitialized));
        assert!(mcl.estimate().is_none());

        mcl.initialize(Arc::new(room())).unwrap();
        assert_eq!(mcl.state(), FilterState::Ready);
        assert!(mcl.cycle().is_ok());
        assert_eq!(mcl.state(), FilterState::Ready);
    }

    #[test]
    fn stays_uninitialized_without_free_space() {
        let full = OccupancyGrid::from_rows(&["###"], 1.0, Pose::default()).unwrap();
        let mut mcl = MonteCarloLocalization::new(config(1)).unwrap();

        assert_eq!(mcl.initialize(Arc::new(full.clone())), Err(FilterError::NoFreeSpace));
        assert_eq!(
            mcl.initialize_gaussian(Arc::new(full), Pose::default(), 0.1, 0.1),
            Err(FilterError::NoFreeSpace)
        );
        assert_eq!(mcl.state(), FilterState::Uninitialized);
        assert_eq!(mcl.cycle(), Err(FilterError::NotInitialized));
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let config = MclConfig {
            process_noise: [[0.0; 3]; 3],
            ..Default::default()
        };
        assert_eq!(
            MonteCarloLocalization::<OccupancyGrid>::new(config).err(),
            Some(ConfigError::NotPositiveDefinite)
        );
    }

    #[test]
    fn particle_count_is_constant() {
        let map = Arc::new(corridor());
        let mut mcl = MonteCarloLocalization::new(config(3)).unwrap();
        mcl.initialize(map.clone()).unwrap();

        let truth = Pose::new(2.0, 1.5, 0.0);
        mcl.latch_command(Command::new(0.2, 0.1));
        for i in 0..10 {
            assert_eq!(mcl.particles().unwrap().len(), 100);
            if i % 2 == 0 {
                mcl.latch_scan(Arc::new(perfect_scan(map.as_ref(), &truth, 24, 0.12, 3.5)));
            }
            let report = mcl.cycle().unwrap();
            assert_eq!(report.weighted, i % 2 == 0);
            assert_eq!(report.resampled, report.weighted);
            assert_eq!(mcl.particles().unwrap().len(), 100);

            let weights = mcl.particles().unwrap().weights();
            assert!(weights.iter().all(|&w| w == 0.01));
        }
        assert_eq!(mcl.stats().sample_count(), 10);
    }

    #[test]
    fn scan_is_used_once() {
        let map = Arc::new(room());
        let mut mcl = MonteCarloLocalization::new(config(4)).unwrap();
        mcl.initialize(map.clone()).unwrap();

        mcl.latch_scan(Arc::new(perfect_scan(map.as_ref(), &Pose::new(5.0, 5.0, 0.0), 8, 0.12, 3.5)));
        assert!(mcl.cycle().unwrap().weighted);
        assert!(!mcl.cycle().unwrap().weighted);
    }

    #[test]
    fn motion_only_cycle_moves_particles() {
        let map = Arc::new(room());
        let mut mcl = MonteCarloLocalization::new(MclConfig {
            process_noise: tiny_noise(),
            ..config(5)
        })
        .unwrap();
        mcl.initialize_gaussian(map, Pose::new(2.0, 2.0, 0.0), 0.0, 0.0)
            .unwrap();

        mcl.latch_command(Command::new(1.0, 0.0));
        let report = mcl.step(0.5).unwrap();
        assert!(!report.weighted);
        assert!(!report.resampled);

        let estimate = mcl.estimate().unwrap();
        assert_relative_eq!(estimate.mean.x, 2.5, epsilon = 1e-3);
        assert_relative_eq!(estimate.mean.y, 2.0, epsilon = 1e-3);
    }

    #[test]
    fn invalid_scan_skipped_with_skip_scan_policy() {
        let map = Arc::new(room());
        let mut mcl = MonteCarloLocalization::new(MclConfig {
            invalid_beams: crate::sensor::InvalidBeamPolicy::SkipScan,
            ..config(6)
        })
        .unwrap();
        mcl.initialize(map.clone()).unwrap();

        let mut scan = perfect_scan(map.as_ref(), &Pose::new(5.0, 5.0, 0.0), 8, 0.12, 3.5);
        scan.ranges[3] = f64::NAN;
        mcl.latch_scan(Arc::new(scan));

        let report = mcl.cycle().unwrap();
        assert!(!report.weighted);
        assert_eq!(mcl.particles().unwrap().len(), 100);
    }

    #[test]
    fn motion_only_cycles_keep_every_particle() {
        let map = Arc::new(room());
        let mut mcl = MonteCarloLocalization::new(MclConfig {
            particle_count: 300,
            ..config(9)
        })
        .unwrap();
        mcl.initialize(map).unwrap();

        let before = mcl.particles().unwrap().poses();
        for _ in 0..5 {
            let report = mcl.cycle().unwrap();
            assert!(!report.resampled);
            assert_relative_eq!(report.effective_sample_size, 300.0, epsilon = 1e-6);
        }

        // no command latched, so the particles stay where they were up to process noise
        let after = mcl.particles().unwrap().poses();
        assert_eq!(after.len(), before.len());
        for (a, b) in after.iter().zip(before.iter()) {
            assert!((a.xy() - b.xy()).norm() < 0.5);
        }
    }

    #[test]
    fn scan_without_usable_beams_is_motion_only() {
        let map = Arc::new(room());
        let mut mcl = MonteCarloLocalization::new(MclConfig {
            invalid_beams: crate::sensor::InvalidBeamPolicy::SkipBeam,
            ..config(10)
        })
        .unwrap();
        mcl.initialize(map.clone()).unwrap();

        let mut scan = perfect_scan(map.as_ref(), &Pose::new(5.0, 5.0, 0.0), 8, 0.12, 3.5);
        scan.ranges.iter_mut().for_each(|r| *r = f64::NAN);
        mcl.latch_scan(Arc::new(scan));

        let report = mcl.cycle().unwrap();
        assert!(!report.weighted);
        assert!(!report.resampled);
        assert_eq!(report.beams_used, 0);
        assert!(mcl.particles().unwrap().weights().iter().all(|&w| w == 0.01));

        let mut empty = perfect_scan(map.as_ref(), &Pose::new(5.0, 5.0, 0.0), 8, 0.12, 3.5);
        empty.ranges.clear();
        mcl.latch_scan(Arc::new(empty));
        assert!(!mcl.cycle().unwrap().weighted);
    }

    #[test]
    fn degenerate_weights_fall_back() {
        // without a random component, a reading far from every expectation has zero density
        let beam = BeamModelConfig {
            w_hit: 1.0,
            w_short: 0.0,
            w_max: 0.0,
            w_rand: 0.0,
            sigma_hit: 0.01,
            ..Default::default()
        };
        let map = Arc::new(room());

        for policy in [
            DegenerateWeightPolicy::Uniform,
            DegenerateWeightPolicy::KeepParticles,
        ] {
            let mut mcl = MonteCarloLocalization::new(MclConfig {
                beam,
                degenerate_weights: policy,
                process_noise: tiny_noise(),
                ..config(7)
            })
            .unwrap();
            mcl.initialize_gaussian(map.clone(), Pose::new(5.0, 5.0, 0.0), 0.0, 0.0)
                .unwrap();

            // the wall is 3.5 m away in every direction, report 0.5 m instead
            mcl.latch_scan(Arc::new(Observation {
                id: 9,
                angle_min: 0.0,
                angle_increment: std::f64::consts::FRAC_PI_2,
                range_min: 0.12,
                range_max: 3.5,
                ranges: vec![0.5; 4],
            }));

            let report = mcl.cycle().unwrap();
            assert!(report.weighted);
            assert!(report.degenerate);
            assert_eq!(report.resampled, policy == DegenerateWeightPolicy::Uniform);

            let particles = mcl.particles().unwrap();
            assert_eq!(particles.len(), 100);
            assert!(particles.weights().iter().all(|w| w.is_finite() && *w == 0.01));
        }
    }

    #[test]
    fn same_seed_same_result() {
        let map = Arc::new(corridor());
        let scan = Arc::new(perfect_scan(map.as_ref(), &Pose::new(1.0, 1.0, 0.3), 16, 0.12, 3.5));

        let run = || {
            let mut mcl = MonteCarloLocalization::new(config(21)).unwrap();
            mcl.initialize(map.clone()).unwrap();
            mcl.latch_command(Command::new(0.1, 0.0));
            for _ in 0..3 {
                mcl.latch_scan(scan.clone());
                mcl.cycle().unwrap();
            }
            mcl.particles().unwrap().poses()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn stationary_robot_keeps_its_pose() {
        // an empty map, every beam expects max range and the scan says max range
        let rows = vec!["..........".to_string(); 10];
        let map = Arc::new(OccupancyGrid::from_rows(&rows, 1.0, Pose::default()).unwrap());
        let truth = Pose::new(5.0, 5.0, 0.0);

        let mut mcl = MonteCarloLocalization::new(MclConfig {
            process_noise: tiny_noise(),
            ..config(8)
        })
        .unwrap();
        mcl.initialize_gaussian(map.clone(), truth, 0.05, 0.02).unwrap();
        mcl.latch_command(Command::new(0.0, 0.0));

        for _ in 0..10 {
            mcl.latch_scan(Arc::new(perfect_scan(map.as_ref(), &truth, 36, 0.12, 3.5)));
            let report = mcl.cycle().unwrap();
            assert!(report.weighted);
            // all particles explain the scan equally well
            assert_relative_eq!(report.effective_sample_size, 100.0, epsilon = 1e-6);
        }

        let estimate = mcl.estimate().unwrap();
        assert_relative_eq!(estimate.mean.x, truth.x, epsilon = 0.05);
        assert_relative_eq!(estimate.mean.y, truth.y, epsilon = 0.05);
        assert_relative_eq!(estimate.mean.theta, truth.theta, epsilon = 0.05);
    }

    #[test]
    fn tracks_a_moving_robot() {
        let map = Arc::new(corridor());
        let mut truth = Pose::new(1.25, 1.25, 0.0);
        let command = Command::new(0.5, 0.2);

        let mut mcl = MonteCarloLocalization::new(MclConfig {
            particle_count: 500,
            process_noise: [[0.01, 0.0, 0.0], [0.0, 0.01, 0.0], [0.0, 0.0, 0.01]],
            beam: BeamModelConfig {
                w_hit: 0.8,
                w_short: 0.05,
                w_max: 0.05,
                w_rand: 0.1,
                sigma_hit: 0.1,
                range_max: 8.0,
                ..Default::default()
            },
            initial: InitialPopulation::Gaussian {
                pose: Pose::new(1.35, 1.15, 0.05),
                std_xy: 0.1,
                std_theta: 0.05,
            },
            ..config(12)
        })
        .unwrap();
        mcl.initialize(map.clone()).unwrap();
        mcl.latch_command(command);

        for _ in 0..20 {
            truth = se2::integrate(&truth, &se2::command_twist(&command), 0.1);
            mcl.latch_scan(Arc::new(perfect_scan(map.as_ref(), &truth, 36, 0.12, 8.0)));
            mcl.cycle().unwrap();
        }

        let estimate = mcl.estimate().unwrap();
        assert_relative_eq!(estimate.mean.x, truth.x, epsilon = 0.15);
        assert_relative_eq!(estimate.mean.y, truth.y, epsilon = 0.15);
        assert_relative_eq!(estimate.mean.theta, truth.theta, epsilon = 0.1);
    }
}
