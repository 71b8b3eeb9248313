use serde::{Deserialize, Serialize};

use crate::Position;

/// Mutable state of the delivery robot, owned by the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub position: Position,
    /// Items currently carried.
    pub cargo: u32,
    /// Remaining charge. Keeps decreasing below zero; there is no floor.
    pub battery: i32,
}

impl AgentState {
    pub fn new(position: Position, battery: i32) -> Self {
        Self {
            position,
            cargo: 0,
            battery,
        }
    }
}

/// Read-only snapshot handed to a [`TargetStrategy`].
#[derive(Debug, Clone, Copy)]
pub struct WorldView<'a> {
    pub agent: &'a AgentState,
    pub pickups: &'a [Position],
    pub dropoffs: &'a [Position],
    pub recharge: Option<Position>,
}

/// Decides where the agent heads next.
///
/// Returning `None` ends the run. Implementations only see a [`WorldView`],
/// so swapping strategies never touches the planner or the simulation.
pub trait TargetStrategy {
    /// Short label used in logs and the status panel.
    fn name(&self) -> &str;

    fn choose_target(&mut self, view: &WorldView) -> Option<Position>;
}

/// Returns the site closest to `from` by Manhattan distance.
///
/// Ties go to the site that appears first in `sites`.
pub fn nearest(from: Position, sites: &[Position]) -> Option<Position> {
    let mut best = None;
    let mut best_distance = usize::MAX;
    for site in sites {
        let distance = from.manhattan_distance(site);
        if distance < best_distance {
            best_distance = distance;
            best = Some(*site);
        }
    }
    best
}

/// Fetches the nearest pickup while empty-handed, otherwise the nearest drop-off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NearestTargetStrategy;

impl TargetStrategy for NearestTargetStrategy {
    fn name(&self) -> &str {
        "nearest"
    }

    fn choose_target(&mut self, view: &WorldView) -> Option<Position> {
        let position = view.agent.position;
        if view.agent.cargo == 0 && !view.pickups.is_empty() {
            return nearest(position, view.pickups);
        }
        nearest(position, view.dropoffs)
    }
}

/// Detours to the recharge site when the battery runs low, otherwise defers
/// to the wrapped strategy.
pub struct RechargeAwareStrategy {
    inner: Box<dyn TargetStrategy>,
    threshold: i32,
}

impl RechargeAwareStrategy {
    /// `threshold` should stay below the recharge level, or the agent would
    /// head straight back after every recharge.
    pub fn new(inner: Box<dyn TargetStrategy>, threshold: i32) -> Self {
        Self { inner, threshold }
    }
}

impl TargetStrategy for RechargeAwareStrategy {
    fn name(&self) -> &str {
        "recharge-aware"
    }

    fn choose_target(&mut self, view: &WorldView) -> Option<Position> {
        match view.recharge {
            Some(recharge)
                if view.agent.battery < self.threshold && view.agent.position != recharge =>
            {
                Some(recharge)
            }
            _ => self.inner.choose_target(view),
        }
    }
}
