//! Authoritative world state and the simulation oracle that steps it.
//!
//! [`WorldState`] is the single source of truth for taxi and passenger state;
//! every mutation flows through a [`SimulationOracle`] applying one
//! `(TaxiId, Action)` at a time and returning a reward signal. The oracle is
//! stored as a boxed resource so an external environment can stand in for
//! [`GridOracle`] without touching the coordination code.

use std::fmt;

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::grid::{Cell, GridGraph};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TaxiId(pub usize);

impl fmt::Display for TaxiId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "taxi-{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PassengerId(pub usize);

impl fmt::Display for PassengerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "passenger-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    South,
    North,
    East,
    West,
    Pickup,
    Dropoff,
    Refuel,
    Standby,
}

impl Action {
    pub fn is_move(self) -> bool {
        matches!(
            self,
            Action::South | Action::North | Action::East | Action::West
        )
    }

    /// The move connecting two adjacent cells, if any.
    pub fn between(from: Cell, to: Cell) -> Option<Action> {
        if from.row == to.row {
            if to.col == from.col + 1 {
                return Some(Action::East);
            }
            if from.col == to.col + 1 {
                return Some(Action::West);
            }
        }
        if from.col == to.col {
            if to.row == from.row + 1 {
                return Some(Action::South);
            }
            if from.row == to.row + 1 {
                return Some(Action::North);
            }
        }
        None
    }

    /// Target cell of a move from `from`. `None` for non-moves and for moves
    /// off the top or left edge; the oracle treats those as blocked.
    pub fn target(self, from: Cell) -> Option<Cell> {
        match self {
            Action::South => Some(Cell::new(from.row + 1, from.col)),
            Action::North => from.row.checked_sub(1).map(|row| Cell::new(row, from.col)),
            Action::East => Some(Cell::new(from.row, from.col + 1)),
            Action::West => from.col.checked_sub(1).map(|col| Cell::new(from.row, col)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassengerStatus {
    /// Not yet assigned to any vehicle.
    Waiting,
    /// Assigned; the vehicle is on its way to the pickup cell.
    Assigned,
    /// Aboard a vehicle.
    InVehicle,
    /// Aboard a vehicle that has committed to a hand-off.
    TransferPending,
    /// Grounded at a transfer cell between vehicles.
    Transferred,
    Delivered,
    Stranded,
}

impl PassengerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PassengerStatus::Delivered | PassengerStatus::Stranded)
    }
}

#[derive(Debug, Clone)]
pub struct TaxiState {
    pub position: Cell,
    pub fuel: u32,
    pub fuel_capacity: u32,
    pub seats: usize,
}

#[derive(Debug, Clone)]
pub struct PassengerState {
    pub location: Cell,
    pub destination: Cell,
    pub status: PassengerStatus,
    pub holder: Option<TaxiId>,
}

/// The oracle's authoritative grid/vehicle/passenger state. Exactly one
/// system mutates it per logical event.
#[derive(Debug, Default, Resource)]
pub struct WorldState {
    taxis: Vec<TaxiState>,
    passengers: Vec<PassengerState>,
}

impl WorldState {
    pub fn new(taxis: Vec<TaxiState>, passengers: Vec<PassengerState>) -> Self {
        Self { taxis, passengers }
    }

    pub fn num_taxis(&self) -> usize {
        self.taxis.len()
    }

    pub fn num_passengers(&self) -> usize {
        self.passengers.len()
    }

    pub fn taxi(&self, id: TaxiId) -> &TaxiState {
        &self.taxis[id.0]
    }

    pub fn taxi_mut(&mut self, id: TaxiId) -> &mut TaxiState {
        &mut self.taxis[id.0]
    }

    pub fn passenger(&self, id: PassengerId) -> &PassengerState {
        &self.passengers[id.0]
    }

    pub fn passenger_mut(&mut self, id: PassengerId) -> &mut PassengerState {
        &mut self.passengers[id.0]
    }

    pub fn taxi_ids(&self) -> impl Iterator<Item = TaxiId> {
        (0..self.taxis.len()).map(TaxiId)
    }

    pub fn passenger_ids(&self) -> impl Iterator<Item = PassengerId> {
        (0..self.passengers.len()).map(PassengerId)
    }

    /// Passengers currently held by `taxi`, in id order.
    pub fn held_by(&self, taxi: TaxiId) -> Vec<PassengerId> {
        self.passenger_ids()
            .filter(|p| self.passenger(*p).holder == Some(taxi))
            .collect()
    }

    /// True once every passenger reached a terminal status.
    pub fn all_settled(&self) -> bool {
        self.passengers.iter().all(|p| p.status.is_terminal())
    }
}

/// Reward signal table, following the original environment's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardTable {
    pub step: i32,
    pub no_fuel: i32,
    pub bad_pickup: i32,
    pub bad_dropoff: i32,
    pub bad_refuel: i32,
    pub pickup: i32,
    pub intermediate_dropoff: i32,
    pub final_dropoff: i32,
    pub hit_wall: i32,
    pub standby: i32,
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            step: -1,
            no_fuel: -20,
            bad_pickup: -15,
            bad_dropoff: -15,
            bad_refuel: -10,
            pickup: 50,
            intermediate_dropoff: 500,
            final_dropoff: 10_000,
            hit_wall: -2,
            standby: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionEffect {
    Moved(Cell),
    BlockedByWall,
    PickedUp(PassengerId),
    NothingToPickUp,
    DroppedAtDestination(PassengerId),
    DroppedEnRoute(PassengerId),
    NoPassengerToDrop,
    Refueled,
    RefuelRejected,
    OutOfFuel,
    Idled,
}

#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    pub reward: i32,
    pub effect: ActionEffect,
}

/// Applies one action against the authoritative state. `Send + Sync` so it
/// can live in a boxed ECS resource.
pub trait SimulationOracle: Send + Sync {
    fn apply(
        &self,
        graph: &GridGraph,
        state: &mut WorldState,
        taxi: TaxiId,
        action: Action,
    ) -> StepOutcome;
}

#[derive(Resource)]
pub struct OracleResource(pub Box<dyn SimulationOracle>);

/// Default in-process oracle over the grid map.
#[derive(Debug, Default)]
pub struct GridOracle {
    rewards: RewardTable,
}

impl GridOracle {
    pub fn new(rewards: RewardTable) -> Self {
        Self { rewards }
    }

    fn apply_move(
        &self,
        graph: &GridGraph,
        state: &mut WorldState,
        taxi: TaxiId,
        action: Action,
    ) -> StepOutcome {
        if state.taxi(taxi).fuel == 0 {
            return StepOutcome {
                reward: self.rewards.no_fuel,
                effect: ActionEffect::OutOfFuel,
            };
        }
        let from = state.taxi(taxi).position;
        let target = action.target(from).filter(|c| graph.map().is_traversable(*c));
        let Some(target) = target else {
            return StepOutcome {
                reward: self.rewards.hit_wall,
                effect: ActionEffect::BlockedByWall,
            };
        };

        let taxi_state = state.taxi_mut(taxi);
        taxi_state.position = target;
        taxi_state.fuel -= 1;
        // Carried passengers move with the vehicle.
        for p in state.held_by(taxi) {
            state.passenger_mut(p).location = target;
        }
        StepOutcome {
            reward: self.rewards.step,
            effect: ActionEffect::Moved(target),
        }
    }

    fn apply_pickup(&self, state: &mut WorldState, taxi: TaxiId) -> StepOutcome {
        let position = state.taxi(taxi).position;
        let seats = state.taxi(taxi).seats;
        if state.held_by(taxi).len() >= seats {
            return StepOutcome {
                reward: self.rewards.bad_pickup,
                effect: ActionEffect::NothingToPickUp,
            };
        }
        let candidate = state.passenger_ids().find(|p| {
            let pass = state.passenger(*p);
            pass.holder.is_none()
                && pass.location == position
                && matches!(
                    pass.status,
                    PassengerStatus::Waiting
                        | PassengerStatus::Assigned
                        | PassengerStatus::Transferred
                )
        });
        let Some(p) = candidate else {
            return StepOutcome {
                reward: self.rewards.bad_pickup,
                effect: ActionEffect::NothingToPickUp,
            };
        };
        let pass = state.passenger_mut(p);
        pass.holder = Some(taxi);
        pass.status = PassengerStatus::InVehicle;
        StepOutcome {
            reward: self.rewards.pickup,
            effect: ActionEffect::PickedUp(p),
        }
    }

    fn apply_dropoff(&self, state: &mut WorldState, taxi: TaxiId) -> StepOutcome {
        let position = state.taxi(taxi).position;
        let Some(p) = state.held_by(taxi).first().copied() else {
            return StepOutcome {
                reward: self.rewards.bad_dropoff,
                effect: ActionEffect::NoPassengerToDrop,
            };
        };
        let pass = state.passenger_mut(p);
        pass.holder = None;
        pass.location = position;
        if position == pass.destination {
            pass.status = PassengerStatus::Delivered;
            StepOutcome {
                reward: self.rewards.final_dropoff,
                effect: ActionEffect::DroppedAtDestination(p),
            }
        } else {
            pass.status = PassengerStatus::Transferred;
            StepOutcome {
                reward: self.rewards.intermediate_dropoff,
                effect: ActionEffect::DroppedEnRoute(p),
            }
        }
    }

    fn apply_refuel(&self, graph: &GridGraph, state: &mut WorldState, taxi: TaxiId) -> StepOutcome {
        let taxi_state = state.taxi_mut(taxi);
        if graph.map().is_depot(taxi_state.position) {
            taxi_state.fuel = taxi_state.fuel_capacity;
            StepOutcome {
                reward: self.rewards.step,
                effect: ActionEffect::Refueled,
            }
        } else {
            StepOutcome {
                reward: self.rewards.bad_refuel,
                effect: ActionEffect::RefuelRejected,
            }
        }
    }
}

impl SimulationOracle for GridOracle {
    fn apply(
        &self,
        graph: &GridGraph,
        state: &mut WorldState,
        taxi: TaxiId,
        action: Action,
    ) -> StepOutcome {
        match action {
            _ if action.is_move() => self.apply_move(graph, state, taxi, action),
            Action::Pickup => self.apply_pickup(state, taxi),
            Action::Dropoff => self.apply_dropoff(state, taxi),
            Action::Refuel => self.apply_refuel(graph, state, taxi),
            _ => StepOutcome {
                reward: self.rewards.standby,
                effect: ActionEffect::Idled,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world(taxi_pos: Cell, fuel: u32, passenger: (Cell, Cell)) -> WorldState {
        WorldState::new(
            vec![TaxiState {
                position: taxi_pos,
                fuel,
                fuel_capacity: fuel,
                seats: 1,
            }],
            vec![PassengerState {
                location: passenger.0,
                destination: passenger.1,
                status: PassengerStatus::Waiting,
                holder: None,
            }],
        )
    }

    #[test]
    fn moves_consume_fuel_and_carry_passengers() {
        let graph = GridGraph::build("...\n...").expect("graph");
        let oracle = GridOracle::default();
        let mut state = world(Cell::new(0, 0), 5, (Cell::new(0, 0), Cell::new(0, 2)));

        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::Pickup);
        assert_eq!(outcome.effect, ActionEffect::PickedUp(PassengerId(0)));
        assert_eq!(state.passenger(PassengerId(0)).status, PassengerStatus::InVehicle);

        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::East);
        assert_eq!(outcome.effect, ActionEffect::Moved(Cell::new(0, 1)));
        assert_eq!(state.taxi(TaxiId(0)).fuel, 4);
        assert_eq!(state.passenger(PassengerId(0)).location, Cell::new(0, 1));
    }

    #[test]
    fn blocked_moves_keep_position_and_fuel() {
        let graph = GridGraph::build(".#").expect("graph");
        let oracle = GridOracle::default();
        let mut state = world(Cell::new(0, 0), 3, (Cell::new(0, 0), Cell::new(0, 0)));

        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::East);
        assert_eq!(outcome.effect, ActionEffect::BlockedByWall);
        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::North);
        assert_eq!(outcome.effect, ActionEffect::BlockedByWall);
        assert_eq!(state.taxi(TaxiId(0)).position, Cell::new(0, 0));
        assert_eq!(state.taxi(TaxiId(0)).fuel, 3);
    }

    #[test]
    fn dropoff_short_of_destination_grounds_the_passenger() {
        let graph = GridGraph::build("....").expect("graph");
        let oracle = GridOracle::default();
        let mut state = world(Cell::new(0, 0), 10, (Cell::new(0, 0), Cell::new(0, 3)));

        oracle.apply(&graph, &mut state, TaxiId(0), Action::Pickup);
        oracle.apply(&graph, &mut state, TaxiId(0), Action::East);
        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::Dropoff);
        assert_eq!(outcome.effect, ActionEffect::DroppedEnRoute(PassengerId(0)));
        let pass = state.passenger(PassengerId(0));
        assert_eq!(pass.status, PassengerStatus::Transferred);
        assert_eq!(pass.location, Cell::new(0, 1));
        assert_eq!(pass.holder, None);

        // A second pickup resumes the relay.
        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::Pickup);
        assert_eq!(outcome.effect, ActionEffect::PickedUp(PassengerId(0)));
        oracle.apply(&graph, &mut state, TaxiId(0), Action::East);
        oracle.apply(&graph, &mut state, TaxiId(0), Action::East);
        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::Dropoff);
        assert_eq!(
            outcome.effect,
            ActionEffect::DroppedAtDestination(PassengerId(0))
        );
        assert_eq!(
            state.passenger(PassengerId(0)).status,
            PassengerStatus::Delivered
        );
    }

    #[test]
    fn misplaced_pickup_and_dropoff_are_penalized() {
        let graph = GridGraph::build("..").expect("graph");
        let oracle = GridOracle::default();
        let mut state = world(Cell::new(0, 1), 5, (Cell::new(0, 0), Cell::new(0, 1)));

        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::Pickup);
        assert_eq!(outcome.effect, ActionEffect::NothingToPickUp);
        assert!(outcome.reward < 0);
        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::Dropoff);
        assert_eq!(outcome.effect, ActionEffect::NoPassengerToDrop);
        assert_eq!(state.passenger(PassengerId(0)).status, PassengerStatus::Waiting);
    }

    #[test]
    fn refuel_works_only_at_depots() {
        let graph = GridGraph::build(".F").expect("graph");
        let oracle = GridOracle::default();
        let mut state = world(Cell::new(0, 0), 2, (Cell::new(0, 0), Cell::new(0, 1)));
        state.taxi_mut(TaxiId(0)).fuel_capacity = 5;

        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::Refuel);
        assert_eq!(outcome.effect, ActionEffect::RefuelRejected);

        oracle.apply(&graph, &mut state, TaxiId(0), Action::East);
        let outcome = oracle.apply(&graph, &mut state, TaxiId(0), Action::Refuel);
        assert_eq!(outcome.effect, ActionEffect::Refueled);
        assert_eq!(state.taxi(TaxiId(0)).fuel, 5);
    }
}
