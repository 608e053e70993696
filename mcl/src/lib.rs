//! Monte Carlo Localization of a planar robot against a known occupancy grid.
//!
//! The filter keeps a fixed number of pose hypotheses (particles). Every cycle it moves them with
//! the latest velocity command plus sampled process noise (an exact SE(2) integration), weights
//! them by how well they explain the latest range scan under a beam mixture model, and draws a
//! new generation with systematic resampling.

pub mod config;
pub mod error;
pub mod filter;
pub mod latch;
pub mod map;
pub mod motion;
pub mod node;
pub mod particle;
pub mod ray;
pub mod resample;
pub mod se2;
pub mod sensor;

#[cfg(test)]
mod testing;

pub use config::{DegenerateWeightPolicy, InitialPopulation, MclConfig};
pub use error::{ConfigError, FilterError, MapError};
pub use filter::{CycleReport, FilterState, MonteCarloLocalization};
pub use latch::InputHandle;
pub use map::{Cell, MapAdapter, OccupancyGrid};
pub use node::{CycleTrigger, MclNodeConfig};
pub use sensor::{BeamModelConfig, InvalidBeamPolicy};
