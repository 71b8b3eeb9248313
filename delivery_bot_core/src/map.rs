use std::ops::{Index, IndexMut};

use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};

use crate::{
    Position,
    config::{ConfigError, ObstacleConfig},
};

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Coordinates ({x}, {y}) are out of bounds for grid size ({width}, {height})")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
}

/// A generic 2D grid stored as a flat row-major vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a new grid filled with default values.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` overflows `usize`.
    pub fn new(width: usize, height: usize) -> Self
    where
        T: Default + Clone,
    {
        let size = width.checked_mul(height).expect("Grid size overflow");
        Grid {
            width,
            height,
            cells: vec![T::default(); size],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Converts a position to a flat vector index, or `None` when out of bounds.
    #[inline]
    pub fn position_to_index(&self, position: Position) -> Option<usize> {
        if self.contains(position) {
            Some(position.y * self.width + position.x)
        } else {
            None
        }
    }

    /// Checks if the given position is within the grid boundaries.
    #[inline]
    pub fn contains(&self, position: Position) -> bool {
        position.x < self.width && position.y < self.height
    }

    pub fn get(&self, position: Position) -> Option<&T> {
        self.position_to_index(position)
            .and_then(|index| self.cells.get(index))
    }

    /// Sets the value of the cell at `position`.
    ///
    /// Returns `Err(GridError::OutOfBounds)` if the position is invalid.
    pub fn set(&mut self, position: Position, value: T) -> Result<(), GridError> {
        let index = self
            .position_to_index(position)
            .ok_or(GridError::OutOfBounds {
                x: position.x,
                y: position.y,
                width: self.width,
                height: self.height,
            })?;
        self.cells[index] = value;
        Ok(())
    }

    /// Returns an iterator that yields `(Position, &T)` for each cell in row-major order.
    pub fn enumerate(&self) -> impl Iterator<Item = (Position, &T)> {
        let width = self.width;
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| (Position::new(index % width, index / width), cell))
    }
}

impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, position: Position) -> &Self::Output {
        match self.position_to_index(position) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index {} out of bounds for grid size ({}, {})",
                position, self.width, self.height
            ),
        }
    }
}

impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, position: Position) -> &mut Self::Output {
        let (width, height) = (self.width, self.height);
        match self.position_to_index(position) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index {} out of bounds for grid size ({}, {})",
                position, width, height
            ),
        }
    }
}

/// Occupancy of a single map cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellType {
    #[default]
    Free,
    Blocked,
}

/// Moves considered by the planner: right, left, down, up.
pub const NEIGHBOR_OFFSETS: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Static occupancy map the agent navigates.
///
/// Built once per run and never mutated afterwards, so it can be shared
/// freely behind `&` by the planner, the strategies and any renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridMap {
    cells: Grid<CellType>,
}

impl GridMap {
    /// Creates a map with every cell free.
    pub fn open(width: usize, height: usize) -> Self {
        Self {
            cells: Grid::new(width, height),
        }
    }

    pub fn from_grid(cells: Grid<CellType>) -> Self {
        Self { cells }
    }

    /// Generates the warehouse-style obstacle layout for a `size` x `size` map.
    ///
    /// Horizontal runs are stamped first, then vertical runs, then one solid
    /// square block. Every random draw comes from `rng`, so the layout is a
    /// pure function of the generator state.
    ///
    /// Fails without drawing anything when `obstacles` does not validate.
    pub fn generate<R: Rng + ?Sized>(
        size: usize,
        obstacles: &ObstacleConfig,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        obstacles.validate()?;
        let mut cells: Grid<CellType> = Grid::new(size, size);

        // Runs sit on lines inside [margin, size - margin - 1].
        let band = size
            .checked_sub(obstacles.band_margin + 1)
            .filter(|high| *high >= obstacles.band_margin)
            .map(|high| obstacles.band_margin..=high);

        if let Some(band) = band {
            let start_max = size.saturating_sub(obstacles.max_run_length);
            for horizontal in [true, false] {
                for _ in 0..obstacles.runs_per_axis {
                    let line = rng.random_range(band.clone());
                    let start = rng.random_range(0..=start_max);
                    let length =
                        rng.random_range(obstacles.min_run_length..=obstacles.max_run_length);
                    for along in start..(start + length).min(size) {
                        if rng.random_bool(obstacles.run_fill_probability) {
                            let position = if horizontal {
                                Position::new(along, line)
                            } else {
                                Position::new(line, along)
                            };
                            cells[position] = CellType::Blocked;
                        }
                    }
                }
            }
        }

        if let Some(&side) = obstacles.block_sides.choose(rng) {
            if side > 0 && side <= size {
                let top = rng.random_range(0..=size - side);
                let left = rng.random_range(0..=size - side);
                for y in top..top + side {
                    for x in left..left + side {
                        cells[Position::new(x, y)] = CellType::Blocked;
                    }
                }
            }
        }

        Ok(Self { cells })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.cells.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.cells.height()
    }

    #[inline]
    pub fn contains(&self, position: Position) -> bool {
        self.cells.contains(position)
    }

    /// Returns true for blocked cells and for anything outside the map.
    #[inline]
    pub fn is_blocked(&self, position: Position) -> bool {
        !matches!(self.cells.get(position), Some(CellType::Free))
    }

    #[inline]
    pub fn is_free(&self, position: Position) -> bool {
        !self.is_blocked(position)
    }

    pub fn cell(&self, position: Position) -> Option<CellType> {
        self.cells.get(position).copied()
    }

    pub fn free_cell_count(&self) -> usize {
        self.cells
            .enumerate()
            .filter(|(_, cell)| **cell == CellType::Free)
            .count()
    }

    /// Positions of all blocked cells in row-major order.
    pub fn blocked_cells(&self) -> impl Iterator<Item = Position> + '_ {
        self.cells
            .enumerate()
            .filter_map(|(position, cell)| (*cell == CellType::Blocked).then_some(position))
    }

    /// Free 4-neighbours of `position`, in [`NEIGHBOR_OFFSETS`] order.
    pub fn neighbors(&self, position: Position) -> impl Iterator<Item = Position> + '_ {
        NEIGHBOR_OFFSETS
            .into_iter()
            .filter_map(move |(dx, dy)| position.offset(dx, dy))
            .filter(move |neighbor| self.is_free(*neighbor))
    }
}

#[cfg(test)]
mod tests {
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn grid_set_rejects_out_of_bounds() {
        let mut grid: Grid<u8> = Grid::new(3, 2);
        assert!(grid.set(Position::new(2, 1), 7).is_ok());
        assert_eq!(grid[Position::new(2, 1)], 7);
        assert_eq!(
            grid.set(Position::new(3, 0), 1),
            Err(GridError::OutOfBounds {
                x: 3,
                y: 0,
                width: 3,
                height: 2
            })
        );
    }

    #[test]
    fn grid_enumerate_is_row_major() {
        let grid: Grid<u8> = Grid::new(2, 2);
        let order: Vec<Position> = grid.enumerate().map(|(position, _)| position).collect();
        assert_eq!(
            order,
            vec![
                Position::new(0, 0),
                Position::new(1, 0),
                Position::new(0, 1),
                Position::new(1, 1)
            ]
        );
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn grid_index_panics_out_of_bounds() {
        let grid: Grid<u8> = Grid::new(2, 2);
        let _ = grid[Position::new(5, 5)];
    }

    #[test]
    fn out_of_bounds_is_blocked() {
        let map = GridMap::open(4, 4);
        assert!(map.is_free(Position::new(3, 3)));
        assert!(map.is_blocked(Position::new(4, 0)));
        assert!(map.is_blocked(Position::new(0, 4)));
    }

    #[test]
    fn neighbors_skip_walls_and_edges() {
        let mut cells: Grid<CellType> = Grid::new(3, 3);
        cells[Position::new(1, 0)] = CellType::Blocked;
        let map = GridMap::from_grid(cells);

        let corner: Vec<Position> = map.neighbors(Position::new(0, 0)).collect();
        assert_eq!(corner, vec![Position::new(0, 1)]);

        let center: Vec<Position> = map.neighbors(Position::new(1, 1)).collect();
        assert_eq!(
            center,
            vec![
                Position::new(2, 1),
                Position::new(0, 1),
                Position::new(1, 2)
            ]
        );
    }

    #[test]
    fn generation_is_deterministic_per_seed() {
        let obstacles = ObstacleConfig::default();
        let a = GridMap::generate(30, &obstacles, &mut StdRng::seed_from_u64(11))
            .expect("obstacles");
        let b = GridMap::generate(30, &obstacles, &mut StdRng::seed_from_u64(11))
            .expect("obstacles");
        assert_eq!(a, b);
    }

    #[test]
    fn generation_stamps_a_solid_block() {
        let obstacles = ObstacleConfig {
            runs_per_axis: 0,
            block_sides: vec![4],
            ..ObstacleConfig::default()
        };
        let map = GridMap::generate(30, &obstacles, &mut StdRng::seed_from_u64(3))
            .expect("obstacles");
        assert_eq!(map.blocked_cells().count(), 16);
        assert_eq!(map.free_cell_count(), 30 * 30 - 16);
    }

    #[test]
    fn runs_stay_inside_the_band() {
        let obstacles = ObstacleConfig {
            block_sides: Vec::new(),
            run_fill_probability: 1.0,
            ..ObstacleConfig::default()
        };
        let map = GridMap::generate(30, &obstacles, &mut StdRng::seed_from_u64(99))
            .expect("obstacles");
        assert!(map.blocked_cells().count() > 0);
        for position in map.blocked_cells() {
            let in_row_band = (5..=24).contains(&position.y);
            let in_col_band = (5..=24).contains(&position.x);
            assert!(in_row_band || in_col_band, "{position} outside band");
        }
    }

    #[test]
    fn tiny_maps_skip_stages_that_do_not_fit() {
        let map = GridMap::generate(3, &ObstacleConfig::default(), &mut StdRng::seed_from_u64(1))
            .expect("obstacles");
        assert_eq!(map.free_cell_count(), 9);
    }

    #[test]
    fn generation_rejects_invalid_obstacles() {
        let mut rng = StdRng::seed_from_u64(5);
        let overfilled = ObstacleConfig {
            run_fill_probability: 1.5,
            ..ObstacleConfig::default()
        };
        assert_eq!(
            GridMap::generate(30, &overfilled, &mut rng),
            Err(ConfigError::InvalidFillProbability(1.5))
        );

        let inverted = ObstacleConfig {
            min_run_length: 9,
            max_run_length: 2,
            ..ObstacleConfig::default()
        };
        assert_eq!(
            GridMap::generate(30, &inverted, &mut rng),
            Err(ConfigError::InvalidRunLength { min: 9, max: 2 })
        );
    }
}
