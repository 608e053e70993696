use std::{fs, path::Path, sync::Arc};

use anyhow::{anyhow, bail, Context};
use common::{node::Node, robot::Pose};
use mcl::{MclNodeConfig, OccupancyGrid};
use pubsub::PubSub;
use serde::Deserialize;
use simulator::SimulatorNodeConfig;

#[derive(Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    pub map: MapConfig,

    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// seconds between two updates of all nodes
    pub period: f64,

    /// simulated seconds to run for
    pub duration: f64,

    /// sleep between updates so that one period takes one period of wall time
    pub realtime: bool,

    /// log the estimate every n:th update
    pub report_every: u32,

    /// topics to compare when reporting, if any
    pub topic_truth: Option<String>,
    pub topic_estimate: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            period: 0.1,
            duration: 10.0,
            realtime: false,
            report_every: 10,
            topic_truth: None,
            topic_estimate: None,
        }
    }
}

fn default_occupied_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    /// meters per cell
    pub resolution: f64,

    #[serde(default)]
    pub origin: Pose,

    /// only used for grayscale maps
    #[serde(default = "default_occupied_threshold")]
    pub occupied_threshold: f64,

    pub data: MapData,
}

#[derive(Debug, Clone, Deserialize)]
pub enum MapData {
    /// One string per row, top row first. `#` is occupied.
    Rows(Vec<String>),
    /// 8-bit pixels, top row first. Dark is occupied.
    Grayscale {
        width: usize,
        height: usize,
        pixels: Vec<u8>,
    },
}

impl MapConfig {
    pub fn build(&self) -> anyhow::Result<OccupancyGrid> {
        let grid = match &self.data {
            MapData::Rows(rows) => OccupancyGrid::from_rows(rows, self.resolution, self.origin),
            MapData::Grayscale {
                width,
                height,
                pixels,
            } => OccupancyGrid::from_grayscale(
                *width,
                *height,
                pixels,
                self.resolution,
                self.origin,
                self.occupied_threshold,
            ),
        };

        grid.context("invalid map")
    }
}

#[derive(Deserialize)]
pub enum NodeConfig {
    Simulator(SimulatorNodeConfig),
    Localization(MclNodeConfig),
}

impl NodeConfig {
    fn instantiate(
        &self,
        pubsub: &mut PubSub,
        map: &Arc<OccupancyGrid>,
    ) -> anyhow::Result<Box<dyn Node>> {
        use NodeConfig::*;
        match self {
            Simulator(c) => c
                .instantiate(pubsub, map.clone())
                .context("invalid simulator configuration"),
            Localization(c) => c
                .instantiate(pubsub, map.clone())
                .context("invalid localization configuration"),
        }
    }

    fn period(&self) -> f64 {
        match self {
            NodeConfig::Simulator(c) => c.period(),
            NodeConfig::Localization(c) => c.cycle_period(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            NodeConfig::Simulator(_) => "simulator",
            NodeConfig::Localization(_) => "localization",
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        // read file contents
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("could not read {}", path.as_ref().display()))?;

        Self::from_contents(&contents)
    }

    pub fn from_contents(contents: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| anyhow!(e))
    }

    pub fn instantiate_nodes(
        &self,
        pubsub: &mut PubSub,
        map: &Arc<OccupancyGrid>,
    ) -> anyhow::Result<Vec<Box<dyn Node>>> {
        // every node is updated once per period, so each must advance time by exactly that much
        for node in &self.nodes {
            if (node.period() - self.settings.period).abs() > 1e-9 {
                bail!(
                    "{} period {} does not match the update period {}",
                    node.name(),
                    node.period(),
                    self.settings.period
                );
            }
        }

        self.nodes
            .iter()
            .map(|config| config.instantiate(pubsub, map))
            .collect()
    }
}
