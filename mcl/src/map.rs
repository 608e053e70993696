use common::robot::Pose;
use nalgebra::{Point2, Vector2};

use crate::{error::MapError, ray::GridRayIterator};

/// The query surface the filter needs from a map. The filter only ever reads through this trait;
/// building the map (decoding images, thresholding, placing it in the world) happens elsewhere.
pub trait MapAdapter: Send + Sync {
    /// Whether the cell is an obstacle. Cells outside the map are never occupied.
    fn is_occupied(&self, cell: Cell) -> bool;

    /// Distance from `origin` to the nearest occupied cell along the ray pointing at `bearing`
    /// (relative to the origin heading), or `max_range` if nothing is hit within range. Rays
    /// leaving the map count as hitting nothing.
    fn ray_cast(&self, origin: &Pose, bearing: f64, max_range: f64) -> f64;

    /// All cells that are not occupied, used to spread the initial particle set.
    fn free_cells(&self) -> &[Cell];

    /// Converts a position inside a cell, given as fractions `[0, 1)` of the cell size along
    /// the grid axes, to world coordinates.
    fn point_in_cell(&self, cell: Cell, fraction: Vector2<f64>) -> Point2<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cell {
    pub row: usize,
    pub column: usize,
}

impl Cell {
    pub fn new(column: usize, row: usize) -> Self {
        Cell { column, row }
    }
}

#[derive(Debug, Clone)]
pub struct GridData<T> {
    /// the size of the grid in cells, x is the number of columns and y the number of rows
    size: Vector2<usize>,

    /// Vector containing all the data values
    data: Vec<T>,
}

impl<T> GridData<T> {
    pub fn from_vec(size: Vector2<usize>, data: Vec<T>) -> Result<Self, MapError> {
        let expected = size.x * size.y;
        if data.len() != expected {
            return Err(MapError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { size, data })
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        // Row-major order
        (cell.column < self.size.x && cell.row < self.size.y)
            .then(|| cell.row * self.size.x + cell.column)
    }

    fn cell(&self, index: usize) -> Cell {
        Cell {
            row: index / self.size.x,
            column: index % self.size.x,
        }
    }

    pub fn get(&self, cell: Cell) -> Option<&T> {
        self.index(cell).map(|i| &self.data[i])
    }

    pub fn iter_cells(&self) -> impl Iterator<Item = (Cell, &T)> {
        self.data.iter().enumerate().map(|(i, v)| (self.cell(i), v))
    }

    pub fn size(&self) -> Vector2<usize> {
        self.size
    }
}

/// A static occupancy grid placed in the world.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    /// Transform from the grid frame (lower left corner of cell (0, 0), x along columns) to the world.
    origin: Pose,

    /// the resolution of this grid, given in meters per cell
    resolution: f64,

    occupied: GridData<bool>,

    /// cached list of all free cells
    free: Vec<Cell>,
}

impl OccupancyGrid {
    /// Creates a grid from row-major cell data where row 0 is the bottom row.
    pub fn new(
        width: usize,
        height: usize,
        resolution: f64,
        origin: Pose,
        occupied: Vec<bool>,
    ) -> Result<Self, MapError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(MapError::InvalidResolution(resolution));
        }
        if width == 0 || height == 0 {
            return Err(MapError::Empty);
        }

        let occupied = GridData::from_vec(Vector2::new(width, height), occupied)?;
        let free = occupied
            .iter_cells()
            .filter(|(_, &o)| !o)
            .map(|(c, _)| c)
            .collect();

        Ok(Self {
            origin,
            resolution,
            occupied,
            free,
        })
    }

    /// Parses a textual map where `#` marks an occupied cell and any other character a free one.
    /// The first row is the top of the map, as it would be drawn.
    pub fn from_rows<S: AsRef<str>>(
        rows: &[S],
        resolution: f64,
        origin: Pose,
    ) -> Result<Self, MapError> {
        let height = rows.len();
        let width = rows.first().map(|r| r.as_ref().chars().count()).unwrap_or(0);

        let mut occupied = vec![false; width * height];
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            let columns = row.chars().count();
            if columns != width {
                return Err(MapError::RaggedRows {
                    row: i,
                    expected: width,
                    actual: columns,
                });
            }

            let grid_row = height - 1 - i;
            for (column, c) in row.chars().enumerate() {
                occupied[grid_row * width + column] = c == '#';
            }
        }

        Self::new(width, height, resolution, origin, occupied)
    }

    /// Thresholds an 8-bit grayscale image (top row first, white is free space). A pixel is
    /// occupied when its darkness `1 - value / 255` exceeds `occupied_threshold`.
    pub fn from_grayscale(
        width: usize,
        height: usize,
        pixels: &[u8],
        resolution: f64,
        origin: Pose,
        occupied_threshold: f64,
    ) -> Result<Self, MapError> {
        if pixels.len() != width * height {
            return Err(MapError::SizeMismatch {
                expected: width * height,
                actual: pixels.len(),
            });
        }

        let mut occupied = vec![false; width * height];
        for (i, row) in pixels.chunks(width.max(1)).enumerate() {
            let grid_row = height - 1 - i;
            for (column, &value) in row.iter().enumerate() {
                let darkness = 1.0 - value as f64 / 255.0;
                occupied[grid_row * width + column] = darkness > occupied_threshold;
            }
        }

        Self::new(width, height, resolution, origin, occupied)
    }

    pub fn origin(&self) -> Pose {
        self.origin
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn size(&self) -> Vector2<usize> {
        self.occupied.size()
    }

    /// Converts a position in the world into continuous grid coordinates (in cells). Note that
    /// the returned value is not guaranteed to lie _within_ the bounds of this grid.
    pub fn world_to_grid(&self, world: &Point2<f64>) -> Vector2<f64> {
        self.origin.inverse_transform_point(world).coords / self.resolution
    }

    /// The cell containing a world position, if it lies on the map.
    pub fn cell_at(&self, world: &Point2<f64>) -> Option<Cell> {
        let g = self.world_to_grid(world);
        let size = self.size();
        if g.x < 0.0 || g.y < 0.0 || g.x >= size.x as f64 || g.y >= size.y as f64 {
            return None;
        }
        Some(Cell::new(g.x as usize, g.y as usize))
    }
}

impl MapAdapter for OccupancyGrid {
    fn is_occupied(&self, cell: Cell) -> bool {
        self.occupied.get(cell).copied().unwrap_or(false)
    }

    fn ray_cast(&self, origin: &Pose, bearing: f64, max_range: f64) -> f64 {
        if !(max_range > 0.0) {
            return max_range;
        }

        let start = self.world_to_grid(&Point2::new(origin.x, origin.y));
        let angle = origin.theta + bearing - self.origin.theta;
        let direction = Vector2::new(angle.cos(), angle.sin());

        GridRayIterator::new(start, direction, max_range / self.resolution, self.size())
            .find(|(cell, _)| self.is_occupied(*cell))
            .map(|(_, t)| (t * self.resolution).min(max_range))
            .unwrap_or(max_range)
    }

    fn free_cells(&self) -> &[Cell] {
        &self.free
    }

    fn point_in_cell(&self, cell: Cell, fraction: Vector2<f64>) -> Point2<f64> {
        let local = Point2::new(
            (cell.column as f64 + fraction.x) * self.resolution,
            (cell.row as f64 + fraction.y) * self.resolution,
        );
        self.origin.transform_point(&local)
    }
}
