use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use common::{gaussian::PoseGaussian, math::angle_diff, robot::Pose};
use pubsub::{PubSub, Subscription};

use crate::config::Config;

pub mod config;

/// Distance between an estimate and the true pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseError {
    pub position: f64,
    pub heading: f64,
}

impl PoseError {
    pub fn between(estimate: &Pose, truth: &Pose) -> Self {
        Self {
            position: (estimate.xy() - truth.xy()).norm(),
            heading: angle_diff(truth.theta, estimate.theta).abs(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub updates: u64,
    pub final_error: Option<PoseError>,
}

/// Compares the latest estimate with the latest ground truth.
struct Monitor {
    sub_truth: Subscription<Pose>,
    sub_estimate: Subscription<PoseGaussian>,
    truth: Option<Arc<Pose>>,
    estimate: Option<Arc<PoseGaussian>>,
}

impl Monitor {
    fn update(&mut self) {
        if let Some(t) = self.sub_truth.latest() {
            self.truth = Some(t);
        }
        if let Some(e) = self.sub_estimate.latest() {
            self.estimate = Some(e);
        }
    }

    fn error(&self) -> Option<PoseError> {
        match (&self.truth, &self.estimate) {
            (Some(t), Some(e)) => Some(PoseError::between(&e.mean, t)),
            _ => None,
        }
    }
}

/// Builds the map and the nodes, then updates all nodes once per period until the configured
/// duration has been simulated.
pub fn run(config: &Config) -> anyhow::Result<Summary> {
    let settings = &config.settings;
    if !(settings.period > 0.0 && settings.duration >= 0.0) {
        anyhow::bail!(
            "period must be positive and duration non-negative, got {} and {}",
            settings.period,
            settings.duration
        );
    }

    let map = Arc::new(config.map.build()?);
    let size = map.size();
    tracing::info!(
        "loaded {}x{} map at {} m per cell",
        size.x,
        size.y,
        map.resolution()
    );

    let mut pubsub = PubSub::new();
    let mut nodes = config.instantiate_nodes(&mut pubsub, &map)?;

    let mut monitor = match (&settings.topic_truth, &settings.topic_estimate) {
        (Some(truth), Some(estimate)) => Some(Monitor {
            sub_truth: pubsub.try_subscribe(truth)?,
            sub_estimate: pubsub.try_subscribe(estimate)?,
            truth: None,
            estimate: None,
        }),
        _ => None,
    };

    let updates = (settings.duration / settings.period).round() as u64;
    let period = Duration::from_secs_f64(settings.period);
    let report_every = settings.report_every.max(1) as u64;

    tracing::info!("running {} nodes for {updates} updates", nodes.len());

    for i in 1..=updates {
        let start = Instant::now();

        for n in nodes.iter_mut() {
            n.update();
        }
        pubsub.tick();

        if let Some(m) = &mut monitor {
            m.update();
            if i % report_every == 0 {
                match m.error() {
                    Some(e) => tracing::info!(
                        "t = {:.1}s: position error {:.3} m, heading error {:.3} rad",
                        i as f64 * settings.period,
                        e.position,
                        e.heading
                    ),
                    None => tracing::info!("t = {:.1}s: no estimate yet", i as f64 * settings.period),
                }
            }
        }

        if settings.realtime {
            if let Some(left) = period.checked_sub(start.elapsed()) {
                thread::sleep(left);
            }
        }
    }

    for n in nodes.iter_mut() {
        n.terminate();
    }

    Ok(Summary {
        updates,
        final_error: monitor.as_ref().and_then(Monitor::error),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pose_error_wraps_heading() {
        let e = PoseError::between(&Pose::new(3.0, 4.0, 3.1), &Pose::new(0.0, 0.0, -3.1));
        approx::assert_relative_eq!(e.position, 5.0);
        approx::assert_relative_eq!(e.heading, 2.0 * std::f64::consts::PI - 6.2, epsilon = 1e-9);
    }

    #[test]
    fn localizes_in_bundled_configuration() {
        let config = Config::from_contents(include_str!("../config.yaml")).unwrap();
        let summary = run(&config).unwrap();

        assert_eq!(summary.updates, 200);
        let error = summary.final_error.unwrap();
        assert!(error.position < 0.3, "position error {}", error.position);
        assert!(error.heading < 0.2, "heading error {}", error.heading);
    }

    #[test]
    fn monitoring_topic_of_another_type_is_an_error() {
        let mut config = Config::from_contents(include_str!("../config.yaml")).unwrap();
        config.settings.topic_estimate = config.settings.topic_truth.clone();

        assert!(run(&config).is_err());
    }
}
