//! Centralized coordinator: one control cycle over every passenger.
//!
//! The coordinator owns the fleet for the centralized variant. It works off
//! explicitly gathered [`VehicleSnapshot`]s and issues commands through the
//! agents' plan queues; it never reads one vehicle's state on behalf of
//! another. Per passenger and cycle it advances the state machine
//! `Waiting -> Assigned -> InVehicle -> TransferPending -> Transferred ->
//! ... -> Delivered`, with `Stranded` only after a Heuristic-2 fallback
//! replan found no way to make progress.

use std::collections::BTreeMap;

use bevy_ecs::prelude::{Entity, Query, Res, ResMut, Resource};
use log::{debug, warn};

use crate::agent::{Objective, Taxi};
use crate::clock::{CurrentEvent, EventKind, SimulationClock};
use crate::grid::{Cell, GridGraph};
use crate::oracle::{Action, PassengerId, PassengerStatus, TaxiId, WorldState};
use crate::scenario::{ControlConfig, CoordinationMode};
use crate::systems::movement::schedule_move;
use crate::telemetry::SimTelemetry;
use crate::transfer::{
    FarthestOnPath, TransferProposal, TransferRequest, TransferStrategy,
    TransferStrategyResource, VehicleSnapshot,
};

/// A committed hand-off between two vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransfer {
    pub cell: Cell,
    pub from: TaxiId,
    pub to: TaxiId,
}

/// The coordinator's exclusive bookkeeping: which vehicle serves which
/// passenger and which hand-offs are in flight.
#[derive(Debug, Default, Resource)]
pub struct CoordinatorState {
    pub assignments: BTreeMap<PassengerId, TaxiId>,
    pub pending: BTreeMap<PassengerId, PendingTransfer>,
}

fn snapshot(state: &WorldState, id: TaxiId) -> VehicleSnapshot {
    let taxi = state.taxi(id);
    VehicleSnapshot {
        id,
        position: taxi.position,
        fuel: taxi.fuel,
    }
}

/// A vehicle that can take on new work: empty plan, no objective, no
/// assignment, nobody aboard.
fn is_free(taxi: &Taxi, state: &WorldState) -> bool {
    taxi.is_idle() && taxi.assigned.is_empty() && state.held_by(taxi.id).is_empty()
}

#[allow(clippy::too_many_arguments)]
pub fn control_cycle_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    mode: Res<CoordinationMode>,
    config: Res<ControlConfig>,
    graph: Res<GridGraph>,
    strategy: Option<Res<TransferStrategyResource>>,
    mut state: ResMut<WorldState>,
    mut coordinator: ResMut<CoordinatorState>,
    mut telemetry: ResMut<SimTelemetry>,
    mut taxis: Query<(Entity, &mut Taxi)>,
) {
    if event.0.kind != EventKind::ControlCycle || *mode != CoordinationMode::Centralized {
        return;
    }

    let entity_of: BTreeMap<TaxiId, Entity> =
        taxis.iter().map(|(entity, taxi)| (taxi.id, entity)).collect();
    let passengers: Vec<PassengerId> = state.passenger_ids().collect();

    for p in passengers {
        match state.passenger(p).status {
            PassengerStatus::Delivered | PassengerStatus::Stranded => {
                coordinator.assignments.remove(&p);
                coordinator.pending.remove(&p);
                continue;
            }
            PassengerStatus::Assigned => {
                verify_assignment(p, &mut state, &mut coordinator, &entity_of, &mut taxis);
                continue;
            }
            PassengerStatus::TransferPending => {
                watch_pending_transfer(
                    p,
                    &mut clock,
                    &graph,
                    &state,
                    &mut coordinator,
                    &entity_of,
                    &mut taxis,
                );
                continue;
            }
            PassengerStatus::InVehicle => {
                plan_delivery_or_transfer(
                    p,
                    &mut clock,
                    &graph,
                    strategy.as_deref(),
                    &mut state,
                    &mut coordinator,
                    &mut telemetry,
                    &entity_of,
                    &mut taxis,
                );
                continue;
            }
            PassengerStatus::Transferred => {
                if coordinator.pending.contains_key(&p) {
                    complete_handoff(
                        p,
                        &mut clock,
                        &graph,
                        &state,
                        &mut coordinator,
                        &entity_of,
                        &mut taxis,
                    );
                    continue;
                }
                // Keep waiting while a vehicle is actively re-routing to the
                // grounded passenger; otherwise release the stale assignment
                // and re-relay below.
                if let Some(&tid) = coordinator.assignments.get(&p) {
                    let active = entity_of
                        .get(&tid)
                        .and_then(|&entity| taxis.get(entity).ok())
                        .map_or(false, |(_, taxi)| {
                            !taxi.plan.is_empty()
                                && matches!(
                                    taxi.objective,
                                    Some(Objective::PickupPassenger(pp)) if pp == p
                                )
                        });
                    if active {
                        continue;
                    }
                    release_assignment(p, &mut coordinator, &entity_of, &mut taxis);
                }
            }
            PassengerStatus::Waiting => {
                if coordinator.assignments.contains_key(&p) {
                    continue;
                }
            }
        }
        assign_nearest_vehicle(p, &mut clock, &graph, &mut state, &mut coordinator, &mut taxis);
    }

    if !state.all_settled() {
        clock.schedule_in(config.control_interval.max(1), EventKind::ControlCycle, None);
    }
}

/// Waiting (or re-grounded) passenger: route the nearest capable free
/// vehicle to the pickup. If none exists the passenger simply stays put
/// (reported, never fatal).
fn assign_nearest_vehicle(
    p: PassengerId,
    clock: &mut SimulationClock,
    graph: &GridGraph,
    state: &mut WorldState,
    coordinator: &mut CoordinatorState,
    taxis: &mut Query<(Entity, &mut Taxi)>,
) {
    let location = state.passenger(p).location;
    let mut best: Option<(u32, TaxiId, Entity)> = None;
    for (entity, taxi) in taxis.iter() {
        if !is_free(taxi, state) {
            continue;
        }
        let ts = state.taxi(taxi.id);
        let Ok(distance) = graph.shortest_distance(ts.position, location) else {
            continue;
        };
        // Strictly less: the vehicle needs fuel left to move on afterwards.
        if distance < ts.fuel
            && best.map_or(true, |(bd, bid, _)| (distance, taxi.id) < (bd, bid))
        {
            best = Some((distance, taxi.id, entity));
        }
    }

    let Some((distance, id, entity)) = best else {
        debug!("no capable vehicle for {}; it stays where it is", p);
        return;
    };
    let Ok((_, mut taxi)) = taxis.get_mut(entity) else {
        return;
    };
    match taxi.route_to_pickup(graph, state, p) {
        Ok(_) => {
            taxi.assigned.push(p);
            taxi.objective = Some(Objective::PickupPassenger(p));
            if state.passenger(p).status == PassengerStatus::Waiting {
                state.passenger_mut(p).status = PassengerStatus::Assigned;
            }
            coordinator.assignments.insert(p, id);
            schedule_move(clock, entity, &mut taxi);
            debug!("{} assigned to {} ({} moves to pickup)", p, id, distance);
        }
        Err(err) => debug!("pickup routing for {} via {} failed: {}", p, id, err),
    }
}

/// Drop a passenger's assignment and clear the vehicle-side bookkeeping.
fn release_assignment(
    p: PassengerId,
    coordinator: &mut CoordinatorState,
    entity_of: &BTreeMap<TaxiId, Entity>,
    taxis: &mut Query<(Entity, &mut Taxi)>,
) {
    let Some(tid) = coordinator.assignments.remove(&p) else {
        return;
    };
    if let Some(&entity) = entity_of.get(&tid) {
        if let Ok((_, mut taxi)) = taxis.get_mut(entity) {
            if matches!(taxi.objective, Some(Objective::PickupPassenger(pp)) if pp == p) {
                taxi.objective = None;
            }
            taxi.assigned.retain(|x| *x != p);
        }
    }
}

/// Assigned passenger: make sure the assigned vehicle is still making
/// progress; unassign if its plan died (fuel exhaustion en route).
fn verify_assignment(
    p: PassengerId,
    state: &mut WorldState,
    coordinator: &mut CoordinatorState,
    entity_of: &BTreeMap<TaxiId, Entity>,
    taxis: &mut Query<(Entity, &mut Taxi)>,
) {
    let Some(&id) = coordinator.assignments.get(&p) else {
        if state.passenger(p).status == PassengerStatus::Assigned {
            state.passenger_mut(p).status = PassengerStatus::Waiting;
        }
        return;
    };
    let Some(&entity) = entity_of.get(&id) else {
        return;
    };
    let stalled = {
        let Ok((_, taxi)) = taxis.get(entity) else {
            return;
        };
        taxi.plan.is_empty()
            && matches!(taxi.objective, Some(Objective::PickupPassenger(pp)) if pp == p)
    };
    if stalled {
        debug!("{} could not complete pickup of {}; unassigning", id, p);
        if let Ok((_, mut taxi)) = taxis.get_mut(entity) {
            taxi.objective = None;
            taxi.assigned.retain(|x| *x != p);
        }
        coordinator.assignments.remove(&p);
        if state.passenger(p).status == PassengerStatus::Assigned {
            state.passenger_mut(p).status = PassengerStatus::Waiting;
        }
    }
}

/// In-vehicle passenger with an idle holder: deliver directly when fuel
/// allows, otherwise commit the cheapest feasible transfer under the
/// configured strategy, otherwise fall back to Heuristic 2 and carry the
/// passenger as far as possible. Only when even that makes no progress is
/// the passenger declared stranded.
#[allow(clippy::too_many_arguments)]
fn plan_delivery_or_transfer(
    p: PassengerId,
    clock: &mut SimulationClock,
    graph: &GridGraph,
    strategy: Option<&TransferStrategyResource>,
    state: &mut WorldState,
    coordinator: &mut CoordinatorState,
    telemetry: &mut SimTelemetry,
    entity_of: &BTreeMap<TaxiId, Entity>,
    taxis: &mut Query<(Entity, &mut Taxi)>,
) {
    let Some(holder) = state.passenger(p).holder else {
        return;
    };
    let Some(&holder_entity) = entity_of.get(&holder) else {
        return;
    };
    {
        let Ok((_, taxi)) = taxis.get(holder_entity) else {
            return;
        };
        if !taxi.plan.is_empty() {
            return;
        }
    }

    let holder_snap = snapshot(state, holder);
    let destination = state.passenger(p).destination;

    if let Ok(distance) = graph.shortest_distance(holder_snap.position, destination) {
        if distance <= holder_snap.fuel {
            if let Ok((_, mut taxi)) = taxis.get_mut(holder_entity) {
                if taxi.route_to_dropoff(graph, state, p, None).is_ok() {
                    taxi.objective = Some(Objective::DeliverPassenger(p));
                    schedule_move(clock, holder_entity, &mut taxi);
                    debug!("{} delivers {} directly ({} moves)", holder, p, distance);
                }
            }
            return;
        }
    }

    // Second vehicle needed. Evaluate the configured strategy against every
    // free vehicle and commit the cheapest proposal the helper can honor.
    if let Some(strategy) = strategy {
        let mut best: Option<(u32, TransferProposal, TaxiId, Entity)> = None;
        for (helper_entity, helper_taxi) in taxis.iter() {
            if helper_taxi.id == holder || !is_free(helper_taxi, state) {
                continue;
            }
            let helper_snap = snapshot(state, helper_taxi.id);
            let request = TransferRequest {
                holder: holder_snap,
                helper: Some(helper_snap),
                origin: holder_snap.position,
                destination,
            };
            let Some(proposal) = strategy.0.plan(graph, &request) else {
                continue;
            };
            if proposal.holder_cost > holder_snap.fuel {
                continue;
            }
            let Some(helper_cost) = proposal.helper_cost else {
                continue;
            };
            if helper_cost > helper_snap.fuel {
                continue;
            }
            let total = proposal.holder_cost + helper_cost;
            if best
                .as_ref()
                .map_or(true, |(bt, _, bid, _)| (total, helper_taxi.id) < (*bt, *bid))
            {
                best = Some((total, proposal, helper_taxi.id, helper_entity));
            }
        }

        if let Some((_, proposal, helper_id, helper_entity)) = best {
            let committed = {
                let Ok((_, mut holder_taxi)) = taxis.get_mut(holder_entity) else {
                    return;
                };
                if holder_taxi
                    .route_to_dropoff(graph, state, p, Some(proposal.cell))
                    .is_ok()
                {
                    holder_taxi.objective = Some(Objective::HandOff {
                        passenger: p,
                        cell: proposal.cell,
                        to: Some(helper_id),
                    });
                    schedule_move(clock, holder_entity, &mut holder_taxi);
                    true
                } else {
                    false
                }
            };
            if committed {
                if let Ok((_, mut helper_taxi)) = taxis.get_mut(helper_entity) {
                    if helper_taxi.route_to_point(graph, state, proposal.cell).is_ok() {
                        schedule_move(clock, helper_entity, &mut helper_taxi);
                    }
                }
                state.passenger_mut(p).status = PassengerStatus::TransferPending;
                coordinator.pending.insert(
                    p,
                    PendingTransfer {
                        cell: proposal.cell,
                        from: holder,
                        to: helper_id,
                    },
                );
                debug!(
                    "transfer of {} committed at {} ({} -> {}, {:?})",
                    p, proposal.cell, holder, helper_id, proposal.strategy
                );
                return;
            }
        }
    }

    // Fallback: no usable pair proposal. Carry the passenger as far as
    // possible along their own shortest path and ground them there; the next
    // cycles relay them onward if any vehicle can.
    let request = TransferRequest {
        holder: holder_snap,
        helper: None,
        origin: holder_snap.position,
        destination,
    };
    match FarthestOnPath.plan(graph, &request) {
        Some(proposal) if proposal.cell != holder_snap.position => {
            if let Ok((_, mut taxi)) = taxis.get_mut(holder_entity) {
                if taxi
                    .route_to_dropoff(graph, state, p, Some(proposal.cell))
                    .is_ok()
                {
                    taxi.objective = Some(Objective::HandOff {
                        passenger: p,
                        cell: proposal.cell,
                        to: None,
                    });
                    state.passenger_mut(p).status = PassengerStatus::TransferPending;
                    schedule_move(clock, holder_entity, &mut taxi);
                    debug!("{} carries {} as far as {}", holder, p, proposal.cell);
                }
            }
        }
        _ => {
            let location = state.passenger(p).location;
            state.passenger_mut(p).status = PassengerStatus::Stranded;
            telemetry.record_stranding(p, location, clock.now());
            coordinator.assignments.remove(&p);
            warn!("{} stranded at {}: no vehicle can make progress", p, location);
            if let Ok((_, mut taxi)) = taxis.get_mut(holder_entity) {
                taxi.assigned.retain(|x| *x != p);
                taxi.objective = None;
            }
        }
    }
}

/// Transfer committed, holder still carrying: keep an eye on the helper and
/// drop the commitment if it can no longer reach the cell (the grounded
/// passenger is re-relayed later).
fn watch_pending_transfer(
    p: PassengerId,
    clock: &mut SimulationClock,
    graph: &GridGraph,
    state: &WorldState,
    coordinator: &mut CoordinatorState,
    entity_of: &BTreeMap<TaxiId, Entity>,
    taxis: &mut Query<(Entity, &mut Taxi)>,
) {
    let Some(&pending) = coordinator.pending.get(&p) else {
        return;
    };
    let Some(&helper_entity) = entity_of.get(&pending.to) else {
        return;
    };
    let helper = state.taxi(pending.to);
    let idle_off_cell = {
        let Ok((_, helper_taxi)) = taxis.get(helper_entity) else {
            return;
        };
        helper_taxi.plan.is_empty() && helper.position != pending.cell
    };
    if !idle_off_cell {
        return;
    }
    let reachable = graph
        .shortest_distance(helper.position, pending.cell)
        .map_or(false, |d| d <= helper.fuel);
    if reachable {
        if let Ok((_, mut helper_taxi)) = taxis.get_mut(helper_entity) {
            if helper_taxi.route_to_point(graph, state, pending.cell).is_ok() {
                schedule_move(clock, helper_entity, &mut helper_taxi);
            }
        }
    } else {
        debug!(
            "helper {} can no longer reach {}; dropping the commitment",
            pending.to, pending.cell
        );
        coordinator.pending.remove(&p);
    }
}

/// Passenger grounded at the transfer cell: issue the helper's pickup once
/// it is co-located, completing the hand-off atomically from the
/// passenger's perspective.
fn complete_handoff(
    p: PassengerId,
    clock: &mut SimulationClock,
    graph: &GridGraph,
    state: &WorldState,
    coordinator: &mut CoordinatorState,
    entity_of: &BTreeMap<TaxiId, Entity>,
    taxis: &mut Query<(Entity, &mut Taxi)>,
) {
    let Some(&pending) = coordinator.pending.get(&p) else {
        return;
    };
    let Some(&helper_entity) = entity_of.get(&pending.to) else {
        return;
    };
    let helper_pos = state.taxi(pending.to).position;
    let ready = {
        let Ok((_, helper_taxi)) = taxis.get(helper_entity) else {
            return;
        };
        helper_taxi.plan.is_empty()
    };
    if !ready {
        return;
    }

    if helper_pos == pending.cell && state.passenger(p).location == pending.cell {
        if let Ok((_, mut helper_taxi)) = taxis.get_mut(helper_entity) {
            helper_taxi.plan.push_back(Action::Pickup);
            helper_taxi.assigned.push(p);
            helper_taxi.objective = Some(Objective::PickupPassenger(p));
            coordinator.pending.remove(&p);
            coordinator.assignments.insert(p, pending.to);
            schedule_move(clock, helper_entity, &mut helper_taxi);
            debug!("{} takes over {} at {}", pending.to, p, pending.cell);
        }
        return;
    }

    // Helper stalled away from the cell: re-route or give up on it.
    let reachable = graph
        .shortest_distance(helper_pos, pending.cell)
        .map_or(false, |d| d <= state.taxi(pending.to).fuel);
    if reachable {
        if let Ok((_, mut helper_taxi)) = taxis.get_mut(helper_entity) {
            if helper_taxi.route_to_point(graph, state, pending.cell).is_ok() {
                schedule_move(clock, helper_entity, &mut helper_taxi);
            }
        }
    } else {
        debug!(
            "helper {} stalled short of {}; abandoning the hand-off",
            pending.to, pending.cell
        );
        coordinator.pending.remove(&p);
    }
}
