use bevy_ecs::prelude::World;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agent::Taxi;
use crate::clock::SimulationClock;
use crate::error::{RelayError, Result};
use crate::grid::{Cell, GridGraph};
use crate::messaging::{Mailbox, MessageBus};
use crate::oracle::{
    GridOracle, OracleResource, PassengerState, PassengerStatus, TaxiId, TaxiState, WorldState,
};
use crate::scenario::params::{ControlConfig, ScenarioParams, SimulationEndTick};
use crate::systems::control_cycle::CoordinatorState;
use crate::telemetry::SimTelemetry;
use crate::transfer::{build_transfer_strategy, TransferStrategyResource};

/// Attempts to sample a random passenger trip with distinct endpoints.
const MAX_PLACEMENT_ATTEMPTS: usize = 1_000;

fn validate_cell(graph: &GridGraph, cell: Cell, what: &str) -> Result<()> {
    if graph.map().is_traversable(cell) {
        Ok(())
    } else {
        Err(RelayError::InvalidMap {
            reason: format!("{} placed on non-traversable cell {}", what, cell),
        })
    }
}

fn random_cell(rng: &mut StdRng, cells: &[Cell]) -> Cell {
    cells[rng.gen_range(0..cells.len())]
}

/// Build a ready-to-run world from scenario parameters. Malformed maps,
/// non-traversable placements, and inconsistent fleet descriptions are fatal
/// here; nothing later in the episode is.
pub fn build_scenario(params: &ScenarioParams) -> Result<World> {
    let graph = GridGraph::build(&params.map_layout)?;
    let traversable: Vec<Cell> = graph.map().traversable_cells().collect();
    let mut rng = StdRng::seed_from_u64(params.seed.unwrap_or(0));

    let positions: Vec<Cell> = match &params.taxi_positions {
        Some(positions) => {
            if positions.len() != params.taxi_fuels.len() {
                return Err(RelayError::InvalidMap {
                    reason: format!(
                        "{} taxi positions for {} fuel entries",
                        positions.len(),
                        params.taxi_fuels.len()
                    ),
                });
            }
            for (i, cell) in positions.iter().enumerate() {
                validate_cell(&graph, *cell, &format!("taxi {}", i))?;
            }
            positions.clone()
        }
        None => (0..params.taxi_fuels.len())
            .map(|_| random_cell(&mut rng, &traversable))
            .collect(),
    };

    let taxis: Vec<TaxiState> = positions
        .iter()
        .zip(&params.taxi_fuels)
        .map(|(position, fuel)| TaxiState {
            position: *position,
            fuel: *fuel,
            fuel_capacity: *fuel,
            seats: params.taxi_seats,
        })
        .collect();

    let trips: Vec<(Cell, Cell)> = if params.passengers.is_empty() {
        let mut trips = Vec::with_capacity(params.num_random_passengers);
        for _ in 0..params.num_random_passengers {
            let mut attempts = 0;
            let trip = loop {
                let origin = random_cell(&mut rng, &traversable);
                let destination = random_cell(&mut rng, &traversable);
                if origin != destination {
                    break (origin, destination);
                }
                attempts += 1;
                if attempts >= MAX_PLACEMENT_ATTEMPTS {
                    return Err(RelayError::InvalidMap {
                        reason: "could not place a random passenger trip".to_string(),
                    });
                }
            };
            trips.push(trip);
        }
        trips
    } else {
        for (i, (origin, destination)) in params.passengers.iter().enumerate() {
            validate_cell(&graph, *origin, &format!("passenger {} origin", i))?;
            validate_cell(&graph, *destination, &format!("passenger {} destination", i))?;
        }
        params.passengers.clone()
    };

    let passengers: Vec<PassengerState> = trips
        .iter()
        .map(|(origin, destination)| PassengerState {
            location: *origin,
            destination: *destination,
            status: PassengerStatus::Waiting,
            holder: None,
        })
        .collect();

    let num_taxis = taxis.len();
    let mut world = World::new();
    world.insert_resource(SimulationClock::default());
    world.insert_resource(graph);
    world.insert_resource(WorldState::new(taxis, passengers));
    world.insert_resource(OracleResource(Box::new(GridOracle::new(
        params.rewards.clone(),
    ))));
    world.insert_resource(params.mode);
    world.insert_resource(ControlConfig {
        control_interval: params.control_interval,
    });
    world.insert_resource(params.negotiation);
    world.insert_resource(MessageBus::default());
    world.insert_resource(SimTelemetry::default());
    world.insert_resource(CoordinatorState::default());
    if let Some(kind) = params.strategy {
        world.insert_resource(TransferStrategyResource(build_transfer_strategy(kind)));
    }
    if let Some(end_tick) = params.end_tick {
        world.insert_resource(SimulationEndTick(end_tick));
    }

    for i in 0..num_taxis {
        world.spawn((Taxi::new(TaxiId(i)), Mailbox::default()));
    }

    Ok(world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::params::NegotiationConfig;

    const MAP: &str = ".....\n.....\n.....";

    #[test]
    fn builds_a_world_with_all_resources() {
        let params = ScenarioParams::new(MAP)
            .with_taxi_positions(vec![Cell::new(0, 0), Cell::new(2, 4)])
            .with_passenger(Cell::new(0, 4), Cell::new(2, 0));
        let mut world = build_scenario(&params).expect("world");

        assert!(world.get_resource::<GridGraph>().is_some());
        assert!(world.get_resource::<TransferStrategyResource>().is_some());
        let state = world.resource::<WorldState>();
        assert_eq!(state.num_taxis(), 2);
        assert_eq!(state.num_passengers(), 1);
        let taxis = world.query::<&Taxi>().iter(&world).count();
        assert_eq!(taxis, 2);
    }

    #[test]
    fn bad_map_and_bad_placement_fail_fast() {
        let params = ScenarioParams::new("..\n.x");
        assert!(matches!(
            build_scenario(&params),
            Err(RelayError::InvalidMap { .. })
        ));

        let params = ScenarioParams::new(".#\n..")
            .with_taxi_positions(vec![Cell::new(0, 1), Cell::new(0, 0)]);
        assert!(matches!(
            build_scenario(&params),
            Err(RelayError::InvalidMap { .. })
        ));
    }

    #[test]
    fn unknown_strategy_name_is_fatal() {
        let err = ScenarioParams::new(MAP)
            .with_strategy_name("shortest-detour")
            .unwrap_err();
        assert!(matches!(err, RelayError::UnknownStrategy { .. }));
    }

    #[test]
    fn random_placement_is_reproducible_from_the_seed() {
        let params = ScenarioParams::new(MAP)
            .with_seed(7)
            .with_random_passengers(3)
            .with_negotiation(NegotiationConfig::default());
        let mut world_a = build_scenario(&params).expect("world a");
        let mut world_b = build_scenario(&params).expect("world b");

        let snapshot = |world: &mut World| {
            let state = world.resource::<WorldState>();
            let taxis: Vec<Cell> = state.taxi_ids().map(|t| state.taxi(t).position).collect();
            let trips: Vec<(Cell, Cell)> = state
                .passenger_ids()
                .map(|p| {
                    let pass = state.passenger(p);
                    (pass.location, pass.destination)
                })
                .collect();
            (taxis, trips)
        };
        assert_eq!(snapshot(&mut world_a), snapshot(&mut world_b));
    }
}
