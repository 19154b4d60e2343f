//! Decentralized allocation: every taxi broadcasts its pickup cost for each
//! waiting passenger, and one round later each taxi independently applies
//! the same winner rule (lowest cost, then lowest id). All mailboxes saw the
//! same bids, so the decisions agree without any shared state.

use bevy_ecs::prelude::{Entity, Query, Res, ResMut};
use log::{debug, warn};

use std::collections::BTreeMap;

use crate::agent::{Objective, Taxi};
use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::grid::GridGraph;
use crate::messaging::{Envelope, Mailbox, Message, MessageBus};
use crate::oracle::{PassengerId, PassengerStatus, TaxiId, WorldState};
use crate::scenario::{CoordinationMode, NegotiationConfig};
use crate::systems::movement::schedule_move;
use crate::telemetry::SimTelemetry;

/// Broadcast this taxi's pickup cost for every waiting passenger it could
/// actually serve (distance strictly below fuel) to all taxis, itself
/// included, so every mailbox sees the identical bid set.
pub(crate) fn broadcast_allocation_bids(
    clock: &mut SimulationClock,
    bus: &mut MessageBus,
    graph: &GridGraph,
    state: &WorldState,
    taxi: &Taxi,
    recipients: &[TaxiId],
) {
    let position = state.taxi(taxi.id).position;
    let fuel = state.taxi(taxi.id).fuel;
    let now = clock.now();
    for p in state.passenger_ids() {
        if state.passenger(p).status != PassengerStatus::Waiting {
            continue;
        }
        let Ok(cost) = graph.shortest_distance(position, state.passenger(p).location) else {
            continue;
        };
        if cost >= fuel {
            continue;
        }
        for &to in recipients {
            bus.post(
                clock,
                Envelope {
                    from: taxi.id,
                    to,
                    sent_at: now,
                    message: Message::AllocationBid { passenger: p, cost },
                },
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn allocation_round_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    mode: Res<CoordinationMode>,
    negotiation: Res<NegotiationConfig>,
    graph: Res<GridGraph>,
    mut state: ResMut<WorldState>,
    mut bus: ResMut<MessageBus>,
    mut telemetry: ResMut<SimTelemetry>,
    mut taxis: Query<(Entity, &mut Taxi, &mut Mailbox)>,
) {
    if event.0.kind != EventKind::AllocationRound || *mode != CoordinationMode::Decentralized {
        return;
    }
    let Some(EventSubject::Taxi(entity)) = event.0.subject else {
        return;
    };
    let recipients: Vec<TaxiId> = taxis.iter().map(|(_, taxi, _)| taxi.id).collect();
    let Ok((_, mut taxi, mut mailbox)) = taxis.get_mut(entity) else {
        return;
    };

    let bids = mailbox.drain_matching(|env| matches!(env.message, Message::AllocationBid { .. }));
    let mut winners: BTreeMap<PassengerId, (u32, TaxiId)> = BTreeMap::new();
    for env in &bids {
        let Message::AllocationBid { passenger, cost } = env.message else {
            continue;
        };
        let entry = winners.entry(passenger).or_insert((cost, env.from));
        if (cost, env.from) < *entry {
            *entry = (cost, env.from);
        }
    }

    for (&p, &(cost, winner)) in &winners {
        if winner != taxi.id || state.passenger(p).status != PassengerStatus::Waiting {
            continue;
        }
        if !taxi.assigned.is_empty() {
            // One passenger per vehicle in the allocation phase.
            break;
        }
        match taxi.route_to_pickup(&graph, &state, p) {
            Ok(_) => {
                taxi.assigned.push(p);
                taxi.objective = Some(Objective::PickupPassenger(p));
                state.passenger_mut(p).status = PassengerStatus::Assigned;
                schedule_move(&mut clock, entity, &mut taxi);
                debug!("{} won {} with pickup cost {}", taxi.id, p, cost);
            }
            Err(err) => debug!("{} could not route to {}: {}", taxi.id, p, err),
        }
    }

    let unclaimed: Vec<PassengerId> = state
        .passenger_ids()
        .filter(|p| state.passenger(*p).status == PassengerStatus::Waiting)
        .collect();
    if unclaimed.is_empty() {
        return;
    }

    if taxi.allocation_round >= negotiation.max_rounds {
        // Nobody can serve them. The lowest-id taxi records the outcome so
        // the transition happens exactly once.
        let reporter = state.taxi_ids().min();
        if reporter == Some(taxi.id) {
            for p in unclaimed {
                let location = state.passenger(p).location;
                state.passenger_mut(p).status = PassengerStatus::Stranded;
                telemetry.record_stranding(p, location, clock.now());
                warn!(
                    "{} unreachable after {} allocation rounds; stranded",
                    p, negotiation.max_rounds
                );
            }
        }
        return;
    }

    taxi.allocation_round += 1;
    if taxi.assigned.is_empty() && state.held_by(taxi.id).is_empty() {
        broadcast_allocation_bids(&mut clock, &mut bus, &graph, &state, &taxi, &recipients);
    }
    clock.schedule_in(
        negotiation.round_ticks.max(1),
        EventKind::AllocationRound,
        Some(EventSubject::Taxi(entity)),
    );
}
