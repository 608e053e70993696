use std::{f64::consts::PI, sync::Arc};

use common::robot::{Command, Observation, Pose};
use mcl::{map::MapAdapter, se2};
use rand::{distributions::Distribution, rngs::StdRng, SeedableRng};
use serde::Deserialize;
use statrs::distribution::Normal;

/// A command held for a fixed duration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Segment {
    /// seconds
    pub duration: f64,
    pub linear: f64,
    pub angular: f64,
}

impl Segment {
    pub fn new(duration: f64, linear: f64, angular: f64) -> Self {
        Self {
            duration,
            linear,
            angular,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct LidarParameters {
    /// number of evenly spaced beams covering a full turn
    pub beams: usize,
    pub range_min: f64,
    pub range_max: f64,
    /// standard deviation of the additive range noise, 0 for perfect readings
    pub noise_std: f64,
}

impl Default for LidarParameters {
    fn default() -> Self {
        Self {
            beams: 90,
            range_min: 0.12,
            range_max: 3.5,
            noise_std: 0.0,
        }
    }
}

/// Drives a noise free robot through the map following a command schedule and takes range
/// scans from its true pose.
pub struct Simulator<M: MapAdapter> {
    map: Arc<M>,
    schedule: Vec<Segment>,
    repeat: bool,
    lidar: LidarParameters,
    noise: Option<Normal>,
    rng: StdRng,

    pose: Pose,
    time: f64,
    scan_id: usize,
}

impl<M: MapAdapter> Simulator<M> {
    pub fn new(
        map: Arc<M>,
        start: Pose,
        schedule: Vec<Segment>,
        repeat: bool,
        lidar: LidarParameters,
        seed: Option<u64>,
    ) -> Self {
        let noise = if lidar.noise_std > 0.0 {
            match Normal::new(0.0, lidar.noise_std) {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!("disabling range noise: {e}");
                    None
                }
            }
        } else {
            None
        };

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            map,
            schedule,
            repeat,
            lidar,
            noise,
            rng,
            pose: start,
            time: 0.0,
            scan_id: 0,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// The command active at the current time. Zero once a non-repeating schedule has run out.
    pub fn command(&self) -> Command {
        let total: f64 = self.schedule.iter().map(|s| s.duration).sum();
        if !(total > 0.0) {
            return Command::default();
        }

        let mut t = self.time;
        if self.repeat {
            t %= total;
        }

        let mut start = 0.0;
        for s in &self.schedule {
            if t < start + s.duration {
                return Command::new(s.linear, s.angular);
            }
            start += s.duration;
        }
        Command::default()
    }

    /// Advances the robot by `dt` seconds with the current command. Returns the command that was
    /// applied.
    pub fn tick(&mut self, dt: f64) -> Command {
        let command = self.command();
        self.pose = se2::integrate(&self.pose, &se2::command_twist(&command), dt);
        self.time += dt;
        command
    }

    /// Takes a scan from the true pose.
    pub fn scan(&mut self) -> Observation {
        let l = self.lidar;
        let angle_increment = 2.0 * PI / l.beams.max(1) as f64;

        let ranges = (0..l.beams)
            .map(|i| {
                let mut range = self
                    .map
                    .ray_cast(&self.pose, i as f64 * angle_increment, l.range_max);
                if let Some(noise) = &self.noise {
                    range += noise.sample(&mut self.rng);
                }
                range.clamp(l.range_min, l.range_max)
            })
            .collect();

        self.scan_id += 1;
        Observation {
            id: self.scan_id,
            angle_min: 0.0,
            angle_increment,
            range_min: l.range_min,
            range_max: l.range_max,
            ranges,
        }
    }
}
