use serde::{Deserialize, Serialize};

/// Errors raised when a configuration cannot produce a valid world.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("grid size must be at least {min}, got {actual}")]
    GridTooSmall { min: usize, actual: usize },
    #[error("grid size must be at most {max}, got {actual}")]
    GridTooLarge { max: usize, actual: usize },
    #[error("total item count must be at least 1")]
    NoItems,
    #[error(
        "{required} free cells are needed for {items} items, but a {grid_size}x{grid_size} grid only has {available}"
    )]
    TooManyItems {
        items: usize,
        grid_size: usize,
        required: usize,
        available: usize,
    },
    #[error("run fill probability must lie in [0, 1], got {0}")]
    InvalidFillProbability(f64),
    #[error("run length range {min}..={max} is empty")]
    InvalidRunLength { min: usize, max: usize },
    #[error("block side list contains a zero")]
    ZeroBlockSide,
    #[error("max placement attempts must be positive")]
    ZeroPlacementAttempts,
}

/// Shape of the procedurally generated obstacles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleConfig {
    /// Number of runs stamped along each axis.
    pub runs_per_axis: usize,
    /// Distance from the map edge to the band that run lines are drawn from.
    pub band_margin: usize,
    pub min_run_length: usize,
    pub max_run_length: usize,
    /// Chance that any one cell of a run is blocked.
    pub run_fill_probability: f64,
    /// Candidate side lengths for the solid block; empty disables it.
    pub block_sides: Vec<usize>,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            runs_per_axis: 7,
            band_margin: 5,
            min_run_length: 5,
            max_run_length: 10,
            run_fill_probability: 0.7,
            block_sides: vec![4, 6],
        }
    }
}

/// Static configuration for one delivery run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Side length of the square map.
    pub grid_size: usize,
    /// Deliveries required to finish; one extra pickup site is generated.
    pub total_items: usize,
    /// Optional RNG seed for reproducible worlds.
    pub seed: Option<u64>,
    pub initial_battery: i32,
    /// Battery level set on entering the recharge site.
    pub recharge_battery: i32,
    /// Score penalty per move while the battery is non-negative.
    pub step_cost: i64,
    /// Score penalty per move once the battery has gone negative.
    pub depleted_step_cost: i64,
    pub delivery_reward: i64,
    /// Draws allowed per site before world generation gives up.
    pub max_placement_attempts: usize,
    pub obstacles: ObstacleConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            grid_size: 30,
            total_items: 4,
            seed: None,
            initial_battery: 70,
            recharge_battery: 60,
            step_cost: 1,
            depleted_step_cost: 5,
            delivery_reward: 50,
            max_placement_attempts: 10_000,
            obstacles: ObstacleConfig::default(),
        }
    }
}

impl ObstacleConfig {
    /// Rejects values the generator cannot draw from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.run_fill_probability) {
            return Err(ConfigError::InvalidFillProbability(
                self.run_fill_probability,
            ));
        }
        if self.min_run_length > self.max_run_length {
            return Err(ConfigError::InvalidRunLength {
                min: self.min_run_length,
                max: self.max_run_length,
            });
        }
        if self.block_sides.contains(&0) {
            return Err(ConfigError::ZeroBlockSide);
        }
        Ok(())
    }
}

impl SimulationConfig {
    /// Smallest grid that still has a 3x3 centre area for the recharge site.
    pub const MIN_GRID_SIZE: usize = 3;
    /// Largest accepted side length.
    pub const MAX_GRID_SIZE: usize = 1024;

    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Pickups, drop-offs, the start cell and the recharge cell.
    pub fn required_free_cells(&self) -> usize {
        self.total_items.saturating_mul(2).saturating_add(3)
    }

    /// Checks everything that can be rejected before any cell is generated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size < Self::MIN_GRID_SIZE {
            return Err(ConfigError::GridTooSmall {
                min: Self::MIN_GRID_SIZE,
                actual: self.grid_size,
            });
        }
        if self.grid_size > Self::MAX_GRID_SIZE {
            return Err(ConfigError::GridTooLarge {
                max: Self::MAX_GRID_SIZE,
                actual: self.grid_size,
            });
        }
        if self.total_items == 0 {
            return Err(ConfigError::NoItems);
        }
        let available = self.grid_size * self.grid_size;
        let required = self.required_free_cells();
        if required > available {
            return Err(ConfigError::TooManyItems {
                items: self.total_items,
                grid_size: self.grid_size,
                required,
                available,
            });
        }
        if self.max_placement_attempts == 0 {
            return Err(ConfigError::ZeroPlacementAttempts);
        }

        self.obstacles.validate()
    }
}
