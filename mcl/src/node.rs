use std::sync::Arc;

use common::{
    gaussian::PoseGaussian,
    node::Node,
    robot::{Command, Observation, Pose},
};
use pubsub::{PubSub, Publisher, Subscription};
use serde::Deserialize;

use crate::{
    config::MclConfig,
    error::ConfigError,
    filter::{FilterState, MonteCarloLocalization},
    map::MapAdapter,
};

/// When the node runs a filter cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum CycleTrigger {
    /// Every update, advancing time by one cycle period.
    #[default]
    Periodic,
    /// Only on updates where a new scan arrived. Time advances by the cycle periods elapsed since
    /// the last cycle.
    OnScan,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MclNodeConfig {
    topic_command: String,
    topic_observation: String,
    topic_pose: String,

    #[serde(default)]
    topic_particles: Option<String>,

    #[serde(default)]
    trigger: CycleTrigger,

    #[serde(default)]
    config: MclConfig,
}

impl MclNodeConfig {
    pub fn new(
        topic_command: &str,
        topic_observation: &str,
        topic_pose: &str,
        config: MclConfig,
    ) -> Self {
        Self {
            topic_command: topic_command.to_owned(),
            topic_observation: topic_observation.to_owned(),
            topic_pose: topic_pose.to_owned(),
            topic_particles: None,
            trigger: CycleTrigger::default(),
            config,
        }
    }

    pub fn with_particles(mut self, topic: &str) -> Self {
        self.topic_particles = Some(topic.to_owned());
        self
    }

    pub fn with_trigger(mut self, trigger: CycleTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Seconds one cycle advances the filter by.
    pub fn cycle_period(&self) -> f64 {
        self.config.cycle_period
    }

    /// Builds the filter and wires it to the bus. The filter is initialized on `map` right away;
    /// if that fails it is retried on every update.
    pub fn instantiate<M: MapAdapter + 'static>(
        &self,
        pubsub: &mut PubSub,
        map: Arc<M>,
    ) -> Result<Box<dyn Node>, ConfigError> {
        let mut node = MclNode {
            sub_cmd: pubsub.try_subscribe(&self.topic_command)?,
            sub_obs: pubsub.try_subscribe(&self.topic_observation)?,
            pub_pose: pubsub.try_publish(&self.topic_pose)?,
            pub_particles: self
                .topic_particles
                .as_deref()
                .map(|t| pubsub.try_publish(t))
                .transpose()?,
            trigger: self.trigger,
            mcl: MonteCarloLocalization::new(self.config.clone())?,
            map,
            pending_ticks: 0,
        };
        node.try_initialize();

        Ok(Box::new(node))
    }
}

/// Runs a [`MonteCarloLocalization`] filter on values arriving over pubsub and publishes the
/// resulting estimate.
pub struct MclNode<M: MapAdapter> {
    sub_cmd: Subscription<Command>,
    sub_obs: Subscription<Observation>,
    pub_pose: Publisher<PoseGaussian>,
    pub_particles: Option<Publisher<Vec<Pose>>>,
    trigger: CycleTrigger,
    mcl: MonteCarloLocalization<M>,
    map: Arc<M>,

    /// updates since the last cycle
    pending_ticks: u32,
}

impl<M: MapAdapter> MclNode<M> {
    fn try_initialize(&mut self) -> bool {
        if self.mcl.state() == FilterState::Ready {
            return true;
        }

        match self.mcl.initialize(self.map.clone()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("could not initialize localization: {e}");
                false
            }
        }
    }
}

impl<M: MapAdapter> Node for MclNode<M> {
    fn update(&mut self) {
        if let Some(c) = self.sub_cmd.latest() {
            self.mcl.latch_command(*c);
        }

        let new_scan = match self.sub_obs.latest() {
            Some(o) => {
                self.mcl.latch_scan(o);
                true
            }
            None => false,
        };

        self.pending_ticks = self.pending_ticks.saturating_add(1);

        if !self.try_initialize() {
            return;
        }

        if self.trigger == CycleTrigger::OnScan && !new_scan {
            return;
        }

        let dt = self.pending_ticks as f64 * self.mcl.config().cycle_period;
        self.pending_ticks = 0;

        if let Err(e) = self.mcl.step(dt) {
            tracing::error!("localization cycle failed: {e}");
            return;
        }

        if let Some(estimate) = self.mcl.estimate() {
            self.pub_pose.publish(Arc::new(estimate));
        }

        if let (Some(p), Some(particles)) = (&mut self.pub_particles, self.mcl.particles()) {
            p.publish(Arc::new(particles.poses()));
        }
    }

    fn terminate(&mut self) {
        tracing::info!("localization stopped after {} cycles", self.mcl.stats().sample_count());
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        config::InitialPopulation,
        map::OccupancyGrid,
        testing::{perfect_scan, room},
    };

    fn config() -> MclConfig {
        MclConfig {
            particle_count: 50,
            seed: Some(3),
            process_noise: [[1e-8, 0.0, 0.0], [0.0, 1e-8, 0.0], [0.0, 0.0, 1e-8]],
            initial: InitialPopulation::Gaussian {
                pose: Pose::new(4.0, 4.0, 0.0),
                std_xy: 0.0,
                std_theta: 0.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn publishes_estimate_every_update() {
        let mut pubsub = PubSub::new();
        let mut cmd = pubsub.publish::<Command>("cmd");
        let mut pose = pubsub.subscribe::<PoseGaussian>("pose");
        let mut particles = pubsub.subscribe::<Vec<Pose>>("particles");

        let mut node = MclNodeConfig::new("cmd", "scan", "pose", config())
            .with_particles("particles")
            .instantiate(&mut pubsub, Arc::new(room()))
            .unwrap();

        cmd.publish(Arc::new(Command::new(1.0, 0.0)));
        pubsub.tick();

        for _ in 0..5 {
            node.update();
            pubsub.tick();
        }

        let estimates: Vec<_> = std::iter::from_fn(|| pose.try_recv()).collect();
        assert_eq!(estimates.len(), 5);

        // five periods of 0.1 s at 1 m/s
        let last = estimates.last().unwrap();
        assert_relative_eq!(last.mean.x, 4.5, epsilon = 1e-3);
        assert_relative_eq!(last.mean.y, 4.0, epsilon = 1e-3);

        assert_eq!(particles.latest().unwrap().len(), 50);
    }

    #[test]
    fn on_scan_waits_for_scans() {
        let mut pubsub = PubSub::new();
        let mut cmd = pubsub.publish::<Command>("cmd");
        let mut scan = pubsub.publish::<Observation>("scan");
        let mut pose = pubsub.subscribe::<PoseGaussian>("pose");

        let map = Arc::new(room());
        let mut node = MclNodeConfig::new("cmd", "scan", "pose", config())
            .with_trigger(CycleTrigger::OnScan)
            .instantiate(&mut pubsub, map.clone())
            .unwrap();

        cmd.publish(Arc::new(Command::new(1.0, 0.0)));
        pubsub.tick();

        for _ in 0..3 {
            node.update();
            pubsub.tick();
        }
        assert!(pose.try_recv().is_none());

        scan.publish(Arc::new(perfect_scan(
            map.as_ref(),
            &Pose::new(4.4, 4.0, 0.0),
            16,
            0.12,
            3.5,
        )));
        pubsub.tick();
        node.update();
        pubsub.tick();

        // the single cycle covered all four updates
        let estimate = pose.try_recv().unwrap();
        assert_relative_eq!(estimate.mean.x, 4.4, epsilon = 1e-3);
        assert!(pose.try_recv().is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut pubsub = PubSub::new();
        let node = MclNodeConfig::new(
            "cmd",
            "scan",
            "pose",
            MclConfig {
                particle_count: 0,
                ..Default::default()
            },
        )
        .instantiate(&mut pubsub, Arc::new(room()));

        assert_eq!(node.err(), Some(ConfigError::NoParticles));
    }

    #[test]
    fn topic_of_another_type_is_rejected() {
        let mut pubsub = PubSub::new();
        let _other = pubsub.publish::<Pose>("pose");

        let node = MclNodeConfig::new("cmd", "scan", "pose", config())
            .instantiate(&mut pubsub, Arc::new(room()));

        assert!(matches!(node.err(), Some(ConfigError::Topic(_))));
    }

    #[test]
    fn parse_node_config() {
        let config: MclNodeConfig = serde_yaml::from_str(
            r#"
topic_command: robot/command
topic_observation: robot/scan
topic_pose: mcl/pose
trigger: OnScan
config:
  particle_count: 10
"#,
        )
        .unwrap();

        assert_eq!(config.trigger, CycleTrigger::OnScan);
        assert_eq!(config.topic_particles, None);
        assert_eq!(config.config.particle_count, 10);
        assert_eq!(config.config.cycle_period, 0.1);
    }
}
