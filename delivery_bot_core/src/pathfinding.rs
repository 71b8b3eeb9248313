//! A* search over a [`GridMap`].
//!
//! Moves are 4-connected with unit cost and the heuristic is the Manhattan
//! distance, which is consistent on such grids, so the first time the goal is
//! popped its path is optimal.
//!
//! When several frontier entries share the lowest `f = g + h`, the one with
//! the smaller `h` (closest to the goal) is expanded first; remaining ties go
//! to the entry discovered earliest. Neighbours are discovered in
//! right, left, down, up order. Together these fix which of several optimal
//! paths is returned.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet},
};

use crate::{Position, map::GridMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrontierEntry {
    f: usize,
    h: usize,
    sequence: u64,
    position: Position,
}

impl Ord for FrontierEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on every key so the max-heap pops the smallest entry.
        other
            .f
            .cmp(&self.f)
            .then_with(|| other.h.cmp(&self.h))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for FrontierEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Finds a shortest 4-connected path from `start` to `goal`.
///
/// The returned cells exclude `start` and end with `goal`. An empty vector
/// means there is nothing to walk: the goal is unreachable, one endpoint is
/// blocked, or `start == goal`.
pub fn find_path(map: &GridMap, start: Position, goal: Position) -> Vec<Position> {
    if start == goal || map.is_blocked(start) || map.is_blocked(goal) {
        return Vec::new();
    }

    let mut frontier = BinaryHeap::new();
    let mut came_from: HashMap<Position, Position> = HashMap::new();
    let mut cost_so_far: HashMap<Position, usize> = HashMap::new();
    let mut closed: HashSet<Position> = HashSet::new();
    let mut sequence = 0u64;

    cost_so_far.insert(start, 0);
    let h = start.manhattan_distance(&goal);
    frontier.push(FrontierEntry {
        f: h,
        h,
        sequence,
        position: start,
    });

    while let Some(FrontierEntry {
        position: current, ..
    }) = frontier.pop()
    {
        if current == goal {
            return reconstruct_path(&came_from, start, goal);
        }
        // Stale duplicates of an already expanded cell.
        if !closed.insert(current) {
            continue;
        }

        let new_cost = cost_so_far[&current] + 1;
        for neighbor in map.neighbors(current) {
            if closed.contains(&neighbor) {
                continue;
            }
            if cost_so_far
                .get(&neighbor)
                .is_none_or(|&known| new_cost < known)
            {
                cost_so_far.insert(neighbor, new_cost);
                came_from.insert(neighbor, current);
                sequence += 1;
                let h = neighbor.manhattan_distance(&goal);
                frontier.push(FrontierEntry {
                    f: new_cost + h,
                    h,
                    sequence,
                    position: neighbor,
                });
            }
        }
    }

    Vec::new()
}

fn reconstruct_path(
    came_from: &HashMap<Position, Position>,
    start: Position,
    goal: Position,
) -> Vec<Position> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(&previous) = came_from.get(&current) {
        if previous == start {
            break;
        }
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}
