use std::sync::Arc;

use common::{
    node::Node,
    robot::{Command, Observation, Pose},
};
use mcl::map::MapAdapter;
use pubsub::{PubSub, Publisher, TopicError};
use serde::Deserialize;

pub use sim::{LidarParameters, Segment, Simulator};

mod sim;

fn default_scan_every() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorNodeConfig {
    topic_command: String,
    topic_observation: String,
    topic_pose: String,

    /// seconds simulated per update
    period: f64,

    #[serde(default)]
    start: Pose,

    #[serde(default)]
    schedule: Vec<Segment>,

    /// start over once the schedule has run out
    #[serde(default)]
    repeat: bool,

    /// publish a scan on every n:th update
    #[serde(default = "default_scan_every")]
    scan_every: u32,

    #[serde(default)]
    lidar: LidarParameters,

    #[serde(default)]
    seed: Option<u64>,
}

impl SimulatorNodeConfig {
    /// Seconds simulated per update.
    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn instantiate<M: MapAdapter + 'static>(
        &self,
        pubsub: &mut PubSub,
        map: Arc<M>,
    ) -> Result<Box<dyn Node>, TopicError> {
        Ok(Box::new(SimulatorNode {
            pub_cmd: pubsub.try_publish(&self.topic_command)?,
            pub_obs: pubsub.try_publish(&self.topic_observation)?,
            pub_pose: pubsub.try_publish(&self.topic_pose)?,
            simulator: Simulator::new(
                map,
                self.start,
                self.schedule.clone(),
                self.repeat,
                self.lidar,
                self.seed,
            ),
            period: self.period,
            scan_every: self.scan_every.max(1),
            updates: 0,
        }))
    }
}

/// Publishes the command the simulated robot is executing, its scans and its true pose.
pub struct SimulatorNode<M: MapAdapter> {
    pub_cmd: Publisher<Command>,
    pub_obs: Publisher<Observation>,
    pub_pose: Publisher<Pose>,
    simulator: Simulator<M>,
    period: f64,
    scan_every: u32,
    updates: u32,
}

impl<M: MapAdapter> Node for SimulatorNode<M> {
    fn update(&mut self) {
        // the command is published before it is applied, so a consumer that integrates it over
        // the same period ends up where the robot is
        let command = self.simulator.command();
        self.pub_cmd.publish(Arc::new(command));

        self.simulator.tick(self.period);
        self.pub_pose.publish(Arc::new(self.simulator.pose()));

        self.updates += 1;
        if self.updates % self.scan_every == 0 {
            self.pub_obs.publish(Arc::new(self.simulator.scan()));
        }
    }

    fn terminate(&mut self) {
        tracing::info!(
            "simulation ended at t = {:.1}s, pose {:?}",
            self.simulator.time(),
            self.simulator.pose()
        );
    }
}
