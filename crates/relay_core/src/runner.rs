//! Simulation runner: advances the clock and routes events into the ECS.
//!
//! Clock progression happens here, outside systems. Each step pops the next
//! event, inserts it as [`CurrentEvent`], then runs the schedule; systems
//! are gated per event kind so only the relevant one does work.

use bevy_ecs::prelude::Res;
use bevy_ecs::prelude::{Schedule, World};
use bevy_ecs::schedule::IntoSystemConfigs;

use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::error::Result;
use crate::oracle::WorldState;
use crate::scenario::{build_scenario, ScenarioParams, SimulationEndTick};
use crate::systems::{
    allocation::allocation_round_system,
    control_cycle::control_cycle_system,
    message_delivery::message_delivery_system,
    movement::move_step_system,
    negotiation::{
        await_transfer_system, bid_deadline_system, evaluate_delivery_system,
        process_mailbox_system,
    },
    start::simulation_started_system,
};

fn is_simulation_started(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::SimulationStarted)
        .unwrap_or(false)
}

fn is_message_delivery(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::MessageDelivery)
        .unwrap_or(false)
}

fn is_allocation_round(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::AllocationRound)
        .unwrap_or(false)
}

fn is_process_mailbox(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::ProcessMailbox)
        .unwrap_or(false)
}

fn is_bid_deadline(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::BidDeadline)
        .unwrap_or(false)
}

fn is_evaluate_delivery(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::EvaluateDelivery)
        .unwrap_or(false)
}

fn is_control_cycle(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::ControlCycle)
        .unwrap_or(false)
}

fn is_move_step(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::MoveStep)
        .unwrap_or(false)
}

fn is_await_transfer(event: Option<Res<CurrentEvent>>) -> bool {
    event
        .map(|e| e.0.kind == EventKind::AwaitTransfer)
        .unwrap_or(false)
}

/// Runs one simulation step: pops the next event, inserts it as
/// [`CurrentEvent`], then runs the schedule. Returns `false` when the clock
/// is empty or the next event is at or past [`SimulationEndTick`].
pub fn run_next_event(world: &mut World, schedule: &mut Schedule) -> bool {
    let stop_at = world.get_resource::<SimulationEndTick>().map(|e| e.0);
    let next_tick = world
        .get_resource::<SimulationClock>()
        .and_then(|c| c.next_event_tick());
    if let (Some(end_tick), Some(tick)) = (stop_at, next_tick) {
        if tick >= end_tick {
            return false;
        }
    }

    let event = match world.resource_mut::<SimulationClock>().pop_next() {
        Some(event) => event,
        None => return false,
    };
    world.insert_resource(CurrentEvent(event));
    schedule.run(world);
    true
}

/// Runs steps until the event queue drains or `max_steps` is reached.
/// Returns the number of steps executed.
pub fn run_until_empty(world: &mut World, schedule: &mut Schedule, max_steps: usize) -> usize {
    let mut steps = 0;
    while steps < max_steps && run_next_event(world, schedule) {
        steps += 1;
    }
    steps
}

/// Runs steps until every passenger reaches a terminal status, the queue
/// drains, or `max_steps` is reached.
pub fn run_until_settled(world: &mut World, schedule: &mut Schedule, max_steps: usize) -> usize {
    let mut steps = 0;
    while steps < max_steps {
        if world.resource::<WorldState>().all_settled() {
            break;
        }
        if !run_next_event(world, schedule) {
            break;
        }
        steps += 1;
    }
    steps
}

/// Builds the simulation schedule: every event-reacting system, gated on the
/// current event kind.
pub fn simulation_schedule() -> Schedule {
    let mut schedule = Schedule::default();
    schedule.add_systems((
        simulation_started_system.run_if(is_simulation_started),
        message_delivery_system.run_if(is_message_delivery),
        allocation_round_system.run_if(is_allocation_round),
        process_mailbox_system.run_if(is_process_mailbox),
        bid_deadline_system.run_if(is_bid_deadline),
        evaluate_delivery_system.run_if(is_evaluate_delivery),
        control_cycle_system.run_if(is_control_cycle),
        move_step_system.run_if(is_move_step),
        await_transfer_system.run_if(is_await_transfer),
    ));
    schedule
}

/// Schedules the opening event. Call after building the scenario, before
/// running events.
pub fn initialize_simulation(world: &mut World) {
    let mut clock = world.resource_mut::<SimulationClock>();
    clock.schedule_at(0, EventKind::SimulationStarted, None);
}

/// Convenience for drivers and tests: build, initialize, and run an episode
/// to settlement (or `max_steps`).
pub fn run_scenario(params: &ScenarioParams, max_steps: usize) -> Result<World> {
    let mut world = build_scenario(params)?;
    let mut schedule = simulation_schedule();
    initialize_simulation(&mut world);
    run_until_settled(&mut world, &mut schedule, max_steps);
    Ok(world)
}
