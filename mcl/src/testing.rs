//! Fixtures shared by the unit tests of this crate.

use common::robot::{Observation, Pose};

use crate::map::{MapAdapter, OccupancyGrid};

/// A 10x10 room (1 m cells) with walls along the border.
pub(crate) fn room() -> OccupancyGrid {
    let mut rows = vec!["##########".to_string()];
    rows.extend((0..8).map(|_| "#........#".to_string()));
    rows.push("##########".to_string());
    OccupancyGrid::from_rows(&rows, 1.0, Pose::default()).unwrap()
}

/// A room with an internal wall so that most places look different from each other.
pub(crate) fn corridor() -> OccupancyGrid {
    let rows = [
        "##############",
        "#............#",
        "#............#",
        "#....####....#",
        "#.......#....#",
        "#.......#....#",
        "#............#",
        "##############",
    ];
    OccupancyGrid::from_rows(&rows, 0.5, Pose::default()).unwrap()
}

/// A noise free scan of `beams` evenly spaced readings taken from `pose`.
pub(crate) fn perfect_scan<M: MapAdapter>(
    map: &M,
    pose: &Pose,
    beams: usize,
    range_min: f64,
    range_max: f64,
) -> Observation {
    let angle_increment = 2.0 * std::f64::consts::PI / beams as f64;
    let ranges = (0..beams)
        .map(|i| map.ray_cast(pose, i as f64 * angle_increment, range_max))
        .map(|r| r.max(range_min))
        .collect();

    Observation {
        id: 0,
        angle_min: 0.0,
        angle_increment,
        range_min,
        range_max,
        ranges,
    }
}
