use serde::{Deserialize, Serialize};

pub mod agent;
pub mod config;
pub mod environment;
pub mod map;
pub mod pathfinding;
pub mod simulation;

pub use agent::{
    AgentState, NearestTargetStrategy, RechargeAwareStrategy, TargetStrategy, WorldView,
};
pub use config::{ConfigError, ObstacleConfig, SimulationConfig};
pub use environment::{SiteKind, World, WorldError, load_world_from_string};
pub use map::{CellType, Grid, GridError, GridMap};
pub use pathfinding::find_path;
pub use simulation::{
    AbortHandle, FinishReason, ObserverError, PlanRecord, RunStatus, Simulation,
    SimulationResult, SimulationState, StepFrame, StepObserver, run_simulation, run_with_config,
};

/// Represents a 2D grid coordinate: `x` is the column, `y` is the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Returns |dx| + |dy| between two positions.
    #[inline]
    pub fn manhattan_distance(&self, other: &Position) -> usize {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// Returns the neighbouring position offset by `(dx, dy)`, or `None` on underflow.
    #[inline]
    pub fn offset(&self, dx: isize, dy: isize) -> Option<Position> {
        Some(Position {
            x: self.x.checked_add_signed(dx)?,
            y: self.y.checked_add_signed(dy)?,
        })
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
