//! Error types for the localization filter.

use pubsub::TopicError;
use thiserror::Error;

/// Problems detected while validating a configuration. These are always raised when the
/// filter is constructed, never in the middle of a cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("process noise covariance is not symmetric (|a_ij - a_ji| = {0})")]
    NotSymmetric(f64),

    #[error("process noise covariance is not positive definite")]
    NotPositiveDefinite,

    #[error("particle count must be at least one")]
    NoParticles,

    #[error("beam mixture weights must be non-negative and sum to 1, got sum {0}")]
    MixtureWeights(f64),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error(transparent)]
    Topic(#[from] TopicError),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Problems building an occupancy grid.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error("map data has {actual} cells, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("map resolution must be positive and finite, got {0}")]
    InvalidResolution(f64),

    #[error("map row {row} has {actual} columns, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("map has no cells")]
    Empty,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("filter has not been initialized with a particle set")]
    NotInitialized,

    #[error("map has no free cells to place particles in")]
    NoFreeSpace,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, FilterError>;
