use nalgebra::Vector2;

use crate::map::Cell;

/// Walks all grid cells pierced by a ray, in order, using the traversal of Amanatides & Woo
/// ("A Fast Voxel Traversal Algorithm for Ray Tracing", 1987).
///
/// Coordinates are continuous grid coordinates measured in cells, with the origin at the bottom
/// left corner of cell (0, 0). Each item is the visited `Cell` together with the distance along
/// the ray (in cells) at which the ray enters it. Rays starting outside the grid are clipped to
/// it first; iteration stops when the ray leaves the grid or exceeds its length.
pub struct GridRayIterator {
    /// Number of columns (x) and rows (y) in the grid.
    size: Vector2<usize>,

    cell: Vector2<isize>,
    step: Vector2<isize>,

    /// Ray parameter at which the next column (x) or row (y) boundary is crossed.
    t_max: Vector2<f64>,

    /// Ray parameter needed to move one full cell along each axis.
    t_delta: Vector2<f64>,

    /// Ray parameter where the current cell was entered.
    t: f64,
    t_end: f64,
    done: bool,
}

impl GridRayIterator {
    /// Creates an iterator over the cells of a grid of `size` visited by the ray
    /// `start + t * direction` for `t` in `[0, length]`. `direction` is normalized internally.
    pub fn new(start: Vector2<f64>, direction: Vector2<f64>, length: f64, size: Vector2<usize>) -> Self {
        let mut it = Self {
            size,
            cell: Vector2::zeros(),
            step: Vector2::zeros(),
            t_max: Vector2::repeat(f64::INFINITY),
            t_delta: Vector2::repeat(f64::INFINITY),
            t: 0.0,
            t_end: length,
            done: true,
        };

        let norm = direction.norm();
        if !(norm > 0.0) || !length.is_finite() || length < 0.0 || size.x == 0 || size.y == 0 {
            return it;
        }
        let direction = direction / norm;

        let Some((t_enter, t_exit)) = clip(&start, &direction, &size) else {
            return it;
        };

        let t0 = t_enter.max(0.0);
        if t0 > length {
            return it;
        }

        let p = start + direction * t0;

        // entering through the far edge lands exactly on `size`, pull it into the last cell
        it.cell = Vector2::new(
            (p.x.floor() as isize).clamp(0, size.x as isize - 1),
            (p.y.floor() as isize).clamp(0, size.y as isize - 1),
        );

        for axis in 0..2 {
            let d = direction[axis];
            let c = it.cell[axis] as f64;
            if d > 0.0 {
                it.step[axis] = 1;
                it.t_max[axis] = t0 + (c + 1.0 - p[axis]) / d;
                it.t_delta[axis] = 1.0 / d;
            } else if d < 0.0 {
                it.step[axis] = -1;
                it.t_max[axis] = t0 + (c - p[axis]) / d;
                it.t_delta[axis] = -1.0 / d;
            }
        }

        it.t = t0;
        it.t_end = length.min(t_exit);
        it.done = false;
        it
    }

    fn inside(&self) -> bool {
        self.cell.x >= 0
            && self.cell.y >= 0
            && self.cell.x < self.size.x as isize
            && self.cell.y < self.size.y as isize
    }
}

/// Intersects the ray with the grid rectangle `[0, size.x] x [0, size.y]` and returns the ray
/// parameters where it enters and exits, or `None` if it misses (or the grid lies behind it).
fn clip(start: &Vector2<f64>, direction: &Vector2<f64>, size: &Vector2<usize>) -> Option<(f64, f64)> {
    let mut t_min = f64::NEG_INFINITY;
    let mut t_max = f64::INFINITY;

    for axis in 0..2 {
        let lo = 0.0;
        let hi = size[axis] as f64;
        let s = start[axis];
        let d = direction[axis];

        if d == 0.0 {
            if s < lo || s > hi {
                return None;
            }
        } else {
            let t1 = (lo - s) / d;
            let t2 = (hi - s) / d;
            t_min = t_min.max(t1.min(t2));
            t_max = t_max.min(t1.max(t2));
        }
    }

    if t_min > t_max || t_max < 0.0 {
        None
    } else {
        Some((t_min, t_max))
    }
}

impl Iterator for GridRayIterator {
    type Item = (Cell, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || !self.inside() || self.t > self.t_end {
            self.done = true;
            return None;
        }

        let item = (
            Cell::new(self.cell.x as usize, self.cell.y as usize),
            self.t,
        );

        // move to the neighbour whose boundary is closest along the ray
        if self.t_max.x < self.t_max.y {
            self.t = self.t_max.x;
            self.t_max.x += self.t_delta.x;
            self.cell.x += self.step.x;
        } else {
            self.t = self.t_max.y;
            self.t_max.y += self.t_delta.y;
            self.cell.y += self.step.y;
        }

        Some(item)
    }
}
