//! Vehicle agent: the per-taxi plan queue and action primitives.
//!
//! A [`Taxi`] component owns one vehicle's plan and assignment bookkeeping.
//! All knowledge of other vehicles arrives through messages or coordinator
//! snapshots; the agent itself only ever reads its own slice of the
//! authoritative [`WorldState`].

use std::collections::VecDeque;

use bevy_ecs::prelude::Component;

use crate::error::{RelayError, Result};
use crate::grid::{Cell, GridGraph};
use crate::oracle::{Action, PassengerId, SimulationOracle, StepOutcome, TaxiId, WorldState};

/// A planned route annotated with its cumulative fuel cost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    pub cells: Vec<Cell>,
    pub actions: Vec<Action>,
    pub fuel_cost: u32,
}

impl RoutePlan {
    /// Derive the move sequence for a path of adjacent cells.
    pub fn from_path(path: &[Cell]) -> Self {
        let actions: Vec<Action> = path
            .windows(2)
            .filter_map(|pair| Action::between(pair[0], pair[1]))
            .collect();
        let fuel_cost = actions.len() as u32;
        Self {
            cells: path.to_vec(),
            actions,
            fuel_cost,
        }
    }
}

/// What the vehicle is currently trying to accomplish once its plan drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// Driving to a waiting passenger's cell to pick them up.
    PickupPassenger(PassengerId),
    /// Carrying a passenger to their destination.
    DeliverPassenger(PassengerId),
    /// Holder side of a hand-off: drop the passenger at the transfer cell.
    /// `to` is `None` when the holder is only carrying the passenger as far
    /// as it can, with no receiving vehicle committed yet.
    HandOff {
        passenger: PassengerId,
        cell: Cell,
        to: Option<TaxiId>,
    },
    /// Helper side of a hand-off: wait at the transfer cell for the
    /// passenger to be grounded there.
    AwaitTransfer {
        passenger: PassengerId,
        cell: Cell,
        from: TaxiId,
    },
}

/// Decentralized negotiation bookkeeping for a help requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationState {
    pub passenger: PassengerId,
    pub round: u32,
}

#[derive(Debug, Component)]
pub struct Taxi {
    pub id: TaxiId,
    pub plan: VecDeque<Action>,
    pub assigned: Vec<PassengerId>,
    pub objective: Option<Objective>,
    pub negotiation: Option<NegotiationState>,
    /// Decentralized allocation rounds this taxi has seen.
    pub allocation_round: u32,
    /// True while a `MoveStep` event is already queued for this taxi.
    pub move_scheduled: bool,
}

impl Taxi {
    pub fn new(id: TaxiId) -> Self {
        Self {
            id,
            plan: VecDeque::new(),
            assigned: Vec::new(),
            objective: None,
            negotiation: None,
            allocation_round: 0,
            move_scheduled: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.plan.is_empty() && self.objective.is_none()
    }

    /// Shortest route from the vehicle's current position, annotated with
    /// fuel cost. Pure; does not modify the plan.
    pub fn plan_route_to(
        &self,
        graph: &GridGraph,
        state: &WorldState,
        dest: Cell,
    ) -> Result<RoutePlan> {
        let path = graph.shortest_path(state.taxi(self.id).position, dest)?;
        Ok(RoutePlan::from_path(&path))
    }

    /// Replace the plan with a route to `dest`. Refuses routes that would
    /// consume more fuel than the vehicle currently has.
    pub fn route_to_point(
        &mut self,
        graph: &GridGraph,
        state: &WorldState,
        dest: Cell,
    ) -> Result<u32> {
        let plan = self.plan_route_to(graph, state, dest)?;
        if plan.fuel_cost > state.taxi(self.id).fuel {
            return Err(RelayError::OutOfFuel { taxi: self.id });
        }
        self.plan.clear();
        self.plan.extend(plan.actions.iter().copied());
        Ok(plan.fuel_cost)
    }

    /// Route to the passenger's current cell and pick them up there.
    pub fn route_to_pickup(
        &mut self,
        graph: &GridGraph,
        state: &WorldState,
        passenger: PassengerId,
    ) -> Result<u32> {
        let cost = self.route_to_point(graph, state, state.passenger(passenger).location)?;
        self.plan.push_back(Action::Pickup);
        Ok(cost)
    }

    /// Route to `point` (the passenger's destination when `None`) and drop
    /// the passenger off there.
    pub fn route_to_dropoff(
        &mut self,
        graph: &GridGraph,
        state: &WorldState,
        passenger: PassengerId,
        point: Option<Cell>,
    ) -> Result<u32> {
        let dest = point.unwrap_or(state.passenger(passenger).destination);
        let cost = self.route_to_point(graph, state, dest)?;
        self.plan.push_back(Action::Dropoff);
        Ok(cost)
    }

    /// Consume one unit of the plan and apply it through the oracle.
    /// `Ok(None)` when the plan is empty; `Err(OutOfFuel)` when the next
    /// action is a move and fuel would go negative; the caller must catch it
    /// and transition any held passenger to `Stranded`.
    pub fn step(
        &mut self,
        graph: &GridGraph,
        oracle: &dyn SimulationOracle,
        state: &mut WorldState,
    ) -> Result<Option<StepOutcome>> {
        let Some(action) = self.plan.pop_front() else {
            return Ok(None);
        };
        if action.is_move() && state.taxi(self.id).fuel == 0 {
            self.plan.clear();
            return Err(RelayError::OutOfFuel { taxi: self.id });
        }
        Ok(Some(oracle.apply(graph, state, self.id, action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{GridOracle, PassengerState, PassengerStatus, TaxiState};

    fn setup(fuel: u32) -> (GridGraph, WorldState, Taxi) {
        let graph = GridGraph::build(".....\n.....").expect("graph");
        let state = WorldState::new(
            vec![TaxiState {
                position: Cell::new(0, 0),
                fuel,
                fuel_capacity: fuel,
                seats: 1,
            }],
            vec![PassengerState {
                location: Cell::new(0, 3),
                destination: Cell::new(1, 4),
                status: PassengerStatus::Waiting,
                holder: None,
            }],
        );
        (graph, state, Taxi::new(TaxiId(0)))
    }

    #[test]
    fn plan_route_annotates_fuel_cost() {
        let (graph, state, taxi) = setup(10);
        let plan = taxi
            .plan_route_to(&graph, &state, Cell::new(1, 4))
            .expect("plan");
        assert_eq!(plan.fuel_cost, 5);
        assert_eq!(plan.actions.len(), 5);
        assert_eq!(plan.cells.first(), Some(&Cell::new(0, 0)));
        assert_eq!(plan.cells.last(), Some(&Cell::new(1, 4)));
    }

    #[test]
    fn routing_beyond_fuel_is_refused() {
        let (graph, state, mut taxi) = setup(2);
        let err = taxi
            .route_to_point(&graph, &state, Cell::new(1, 4))
            .unwrap_err();
        assert_eq!(err, RelayError::OutOfFuel { taxi: TaxiId(0) });
        assert!(taxi.plan.is_empty());
    }

    #[test]
    fn pickup_route_ends_with_pickup_action() {
        let (graph, state, mut taxi) = setup(10);
        let cost = taxi
            .route_to_pickup(&graph, &state, PassengerId(0))
            .expect("route");
        assert_eq!(cost, 3);
        assert_eq!(taxi.plan.back(), Some(&Action::Pickup));
        assert_eq!(taxi.plan.len(), 4);
    }

    #[test]
    fn step_consumes_plan_and_fuel() {
        let (graph, mut state, mut taxi) = setup(10);
        let oracle = GridOracle::default();
        taxi.route_to_point(&graph, &state, Cell::new(0, 2))
            .expect("route");

        let outcome = taxi
            .step(&graph, &oracle, &mut state)
            .expect("step")
            .expect("outcome");
        assert!(matches!(outcome.effect, crate::oracle::ActionEffect::Moved(_)));
        assert_eq!(state.taxi(TaxiId(0)).fuel, 9);
        assert_eq!(taxi.plan.len(), 1);

        taxi.step(&graph, &oracle, &mut state).expect("step");
        assert!(taxi
            .step(&graph, &oracle, &mut state)
            .expect("empty plan")
            .is_none());
    }

    #[test]
    fn step_errors_when_fuel_would_go_negative() {
        let (graph, mut state, mut taxi) = setup(1);
        let oracle = GridOracle::default();
        taxi.route_to_point(&graph, &state, Cell::new(0, 1))
            .expect("route");
        taxi.step(&graph, &oracle, &mut state).expect("first move");
        assert_eq!(state.taxi(TaxiId(0)).fuel, 0);

        // Plan another leg by hand; the fuel guard must fire before the oracle.
        taxi.plan.push_back(Action::East);
        let err = taxi.step(&graph, &oracle, &mut state).unwrap_err();
        assert_eq!(err, RelayError::OutOfFuel { taxi: TaxiId(0) });
        assert!(taxi.plan.is_empty());
        assert_eq!(state.taxi(TaxiId(0)).fuel, 0, "fuel never goes negative");
    }
}
