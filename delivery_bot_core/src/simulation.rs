use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Position,
    agent::{AgentState, NearestTargetStrategy, TargetStrategy, WorldView},
    config::SimulationConfig,
    environment::{World, WorldError},
    map::GridMap,
    pathfinding::find_path,
};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinishReason {
    AllDeliveriesComplete,
    NoTargetAvailable,
    NoPathFound,
    Aborted,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FinishReason::AllDeliveriesComplete => "all deliveries complete",
            FinishReason::NoTargetAvailable => "no target available",
            FinishReason::NoPathFound => "no path found",
            FinishReason::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Finished(FinishReason),
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationState {
    pub steps: u64,
    pub score: i64,
    pub deliveries: usize,
}

/// One call into the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub target: Position,
    /// Zero when the target was unreachable.
    pub path_len: usize,
    pub elapsed: Duration,
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub score: i64,
    pub steps: u64,
    pub deliveries: usize,
    pub reason: FinishReason,
    pub plans: Vec<PlanRecord>,
}

impl SimulationResult {
    pub fn total_path_length(&self) -> usize {
        self.plans.iter().map(|plan| plan.path_len).sum()
    }

    pub fn planning_time(&self) -> Duration {
        self.plans.iter().map(|plan| plan.elapsed).sum()
    }
}

/// What an observer sees after every move.
#[derive(Debug, Clone, Copy)]
pub struct StepFrame<'a> {
    pub agent: &'a AgentState,
    /// Cells still ahead on the current path.
    pub planned_path: &'a [Position],
    pub pickups: &'a [Position],
    pub dropoffs: &'a [Position],
    pub recharge: Option<Position>,
    pub state: SimulationState,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("step observer failed: {0}")]
pub struct ObserverError(pub String);

/// Hook called once per moved cell, typically a renderer.
///
/// Errors are logged and the step carries on.
pub trait StepObserver {
    fn on_step(&mut self, frame: &StepFrame) -> Result<(), ObserverError>;
}

/// Shared flag that asks a running simulation to stop.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
struct Rules {
    total_items: usize,
    recharge_battery: i32,
    step_cost: i64,
    depleted_step_cost: i64,
    delivery_reward: i64,
}

impl From<&SimulationConfig> for Rules {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            total_items: config.total_items,
            recharge_battery: config.recharge_battery,
            step_cost: config.step_cost,
            depleted_step_cost: config.depleted_step_cost,
            delivery_reward: config.delivery_reward,
        }
    }
}

/// Drives one agent through a [`World`].
///
/// Each call to [`Simulation::step`] moves the agent by at most one cell,
/// planning a new path first when none is in flight. [`Simulation::run`]
/// repeats that until the run finishes.
pub struct Simulation {
    map: GridMap,
    recharge: Option<Position>,
    pickups: Vec<Position>,
    dropoffs: Vec<Position>,
    agent: AgentState,
    state: SimulationState,
    rules: Rules,
    strategy: Box<dyn TargetStrategy>,
    observer: Option<Box<dyn StepObserver>>,
    abort: AbortHandle,
    target: Option<Position>,
    route: Vec<Position>,
    next_index: usize,
    plans: Vec<PlanRecord>,
    status: RunStatus,
}

impl Simulation {
    pub fn new(world: World, config: &SimulationConfig, strategy: Box<dyn TargetStrategy>) -> Self {
        Self {
            map: world.map,
            recharge: world.recharge,
            pickups: world.pickups,
            dropoffs: world.dropoffs,
            agent: AgentState::new(world.start, config.initial_battery),
            state: SimulationState::default(),
            rules: Rules::from(config),
            strategy,
            observer: None,
            abort: AbortHandle::new(),
            target: None,
            route: Vec::new(),
            next_index: 0,
            plans: Vec::new(),
            status: RunStatus::Running,
        }
    }

    /// Generates a world from `config` and pairs it with the nearest-target strategy.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, WorldError> {
        let world = World::generate(config)?;
        Ok(Self::new(world, config, Box::new(NearestTargetStrategy)))
    }

    pub fn with_observer(mut self, observer: Box<dyn StepObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn map(&self) -> &GridMap {
        &self.map
    }

    pub fn agent(&self) -> &AgentState {
        &self.agent
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn pickups(&self) -> &[Position] {
        &self.pickups
    }

    pub fn dropoffs(&self) -> &[Position] {
        &self.dropoffs
    }

    pub fn recharge(&self) -> Option<Position> {
        self.recharge
    }

    pub fn total_items(&self) -> usize {
        self.rules.total_items
    }

    pub fn current_target(&self) -> Option<Position> {
        self.target
    }

    /// Remaining cells of the path being walked.
    pub fn planned_path(&self) -> &[Position] {
        &self.route[self.next_index..]
    }

    pub fn plans(&self) -> &[PlanRecord] {
        &self.plans
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Advances the run by at most one cell and returns the new status.
    pub fn step(&mut self) -> RunStatus {
        if self.status != RunStatus::Running {
            return self.status;
        }
        if self.abort.is_aborted() {
            return self.finish(FinishReason::Aborted);
        }
        if self.planned_path().is_empty() {
            if let Some(reason) = self.plan() {
                return self.finish(reason);
            }
        }

        self.advance();

        if self.planned_path().is_empty() {
            self.arrive();
            if self.state.deliveries >= self.rules.total_items {
                return self.finish(FinishReason::AllDeliveriesComplete);
            }
        }
        self.status
    }

    /// Steps until the run finishes.
    pub fn run(&mut self) -> SimulationResult {
        loop {
            if let RunStatus::Finished(reason) = self.step() {
                return self.build_result(reason);
            }
        }
    }

    /// The outcome, once the run has finished.
    pub fn result(&self) -> Option<SimulationResult> {
        match self.status {
            RunStatus::Finished(reason) => Some(self.build_result(reason)),
            RunStatus::Running => None,
        }
    }

    fn build_result(&self, reason: FinishReason) -> SimulationResult {
        SimulationResult {
            score: self.state.score,
            steps: self.state.steps,
            deliveries: self.state.deliveries,
            reason,
            plans: self.plans.clone(),
        }
    }

    /// Picks the next target and a path to it, or says why the run is over.
    fn plan(&mut self) -> Option<FinishReason> {
        if self.state.deliveries >= self.rules.total_items {
            return Some(FinishReason::AllDeliveriesComplete);
        }

        let view = WorldView {
            agent: &self.agent,
            pickups: &self.pickups,
            dropoffs: &self.dropoffs,
            recharge: self.recharge,
        };
        let Some(target) = self.strategy.choose_target(&view) else {
            return Some(FinishReason::NoTargetAvailable);
        };

        let started = Instant::now();
        let path = find_path(&self.map, self.agent.position, target);
        self.plans.push(PlanRecord {
            target,
            path_len: path.len(),
            elapsed: started.elapsed(),
        });

        if path.is_empty() {
            warn!(from = %self.agent.position, to = %target, "no path to target");
            return Some(FinishReason::NoPathFound);
        }

        debug!(
            from = %self.agent.position,
            to = %target,
            length = path.len(),
            "planned path"
        );
        self.target = Some(target);
        self.route = path;
        self.next_index = 0;
        None
    }

    fn advance(&mut self) {
        let Some(&next) = self.route.get(self.next_index) else {
            return;
        };
        self.next_index += 1;

        self.agent.position = next;
        self.state.steps += 1;
        self.agent.battery -= 1;
        self.state.score -= if self.agent.battery >= 0 {
            self.rules.step_cost
        } else {
            self.rules.depleted_step_cost
        };
        if self.recharge == Some(next) {
            self.agent.battery = self.rules.recharge_battery;
            info!(battery = self.agent.battery, "battery recharged");
        }

        debug!(
            position = %next,
            battery = self.agent.battery,
            score = self.state.score,
            steps = self.state.steps,
            "moved"
        );
        self.notify();
    }

    fn notify(&mut self) {
        let Some(observer) = self.observer.as_mut() else {
            return;
        };
        let frame = StepFrame {
            agent: &self.agent,
            planned_path: &self.route[self.next_index..],
            pickups: &self.pickups,
            dropoffs: &self.dropoffs,
            recharge: self.recharge,
            state: self.state,
        };
        if let Err(error) = observer.on_step(&frame) {
            warn!(%error, "step observer failed, continuing");
        }
    }

    /// Resolves a pickup or delivery at the end of a completed path.
    fn arrive(&mut self) {
        let Some(target) = self.target.take() else {
            return;
        };
        if self.agent.position != target {
            return;
        }

        if let Some(index) = self.pickups.iter().position(|site| *site == target) {
            self.pickups.remove(index);
            self.agent.cargo += 1;
            info!(site = %target, cargo = self.agent.cargo, "picked up item");
        } else if self.agent.cargo > 0 {
            if let Some(index) = self.dropoffs.iter().position(|site| *site == target) {
                self.dropoffs.remove(index);
                self.agent.cargo -= 1;
                self.state.deliveries += 1;
                self.state.score += self.rules.delivery_reward;
                info!(
                    site = %target,
                    cargo = self.agent.cargo,
                    deliveries = self.state.deliveries,
                    "delivered item"
                );
            }
        }
    }

    fn finish(&mut self, reason: FinishReason) -> RunStatus {
        self.status = RunStatus::Finished(reason);
        self.route.clear();
        self.next_index = 0;
        info!(
            %reason,
            score = self.state.score,
            steps = self.state.steps,
            deliveries = self.state.deliveries,
            "simulation finished"
        );
        self.status
    }
}

/// Runs the reference configuration with an optional seed.
pub fn run_simulation(seed: Option<u64>) -> Result<SimulationResult, WorldError> {
    run_with_config(&SimulationConfig {
        seed,
        ..SimulationConfig::default()
    })
}

/// Generates a world from `config` and runs it to completion with the default strategy.
pub fn run_with_config(config: &SimulationConfig) -> Result<SimulationResult, WorldError> {
    let mut simulation = Simulation::from_config(config)?;
    Ok(simulation.run())
}
