#![allow(dead_code)]

use bevy_ecs::prelude::World;

use relay_core::grid::{Cell, GridGraph};
use relay_core::oracle::{PassengerId, PassengerStatus, TaxiId, WorldState};
use relay_core::runner::run_scenario;
use relay_core::scenario::ScenarioParams;
use relay_core::telemetry::SimTelemetry;

/// Build, initialize, and run an episode; panics on setup errors so tests
/// fail loudly on misconfiguration.
pub fn run(params: &ScenarioParams, max_steps: usize) -> World {
    run_scenario(params, max_steps).expect("scenario must build")
}

pub fn passenger_status(world: &World, p: PassengerId) -> PassengerStatus {
    world.resource::<WorldState>().passenger(p).status
}

pub fn passenger_location(world: &World, p: PassengerId) -> Cell {
    world.resource::<WorldState>().passenger(p).location
}

pub fn taxi_fuel(world: &World, id: TaxiId) -> u32 {
    world.resource::<WorldState>().taxi(id).fuel
}

pub fn telemetry(world: &World) -> &SimTelemetry {
    world.resource::<SimTelemetry>()
}

pub fn distance(world: &World, from: Cell, to: Cell) -> u32 {
    world
        .resource::<GridGraph>()
        .shortest_distance(from, to)
        .expect("cells must be connected")
}
