//! Decentralized transfer negotiation: broadcast, bid, select, commit.
//!
//! A holder that cannot finish its delivery broadcasts a help request with
//! the passenger's remaining route and its own fuel. Peers answer with a
//! Heuristic-2 candidate computed from the payload alone, plus a
//! self-estimated cost. At the bid deadline the holder commits to the lowest
//! bid; both parties then derive the final cell with Heuristic 1 from the
//! now mutually known snapshots, so they agree without further traffic.
//! Every wait is bounded and every cancellation is a message or a status
//! transition, never a silent drop.

use bevy_ecs::prelude::{Entity, Query, Res, ResMut};
use log::{debug, warn};

use crate::agent::{NegotiationState, Objective, Taxi};
use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::error::RelayError;
use crate::grid::{Cell, GridGraph};
use crate::messaging::{Envelope, Mailbox, Message, MessageBus, StatusNote};
use crate::oracle::{Action, PassengerId, PassengerStatus, TaxiId, WorldState};
use crate::scenario::{CoordinationMode, NegotiationConfig};
use crate::systems::movement::schedule_move;
use crate::telemetry::SimTelemetry;
use crate::transfer::{RouteProjection, TransferRequest, TransferStrategy, VehicleSnapshot};

/// Both ends of a committed hand-off run this with the same snapshots: the
/// route-projection cell when one exists, otherwise the bid candidate both
/// already know. Identical inputs, identical cell.
fn final_transfer_cell(
    graph: &GridGraph,
    holder: VehicleSnapshot,
    helper: VehicleSnapshot,
    destination: Cell,
    fallback: Cell,
) -> Cell {
    let request = TransferRequest {
        holder,
        helper: Some(helper),
        origin: holder.position,
        destination,
    };
    RouteProjection
        .plan(graph, &request)
        .map(|proposal| proposal.cell)
        .unwrap_or(fallback)
}

fn snapshot_of(state: &WorldState, id: TaxiId) -> VehicleSnapshot {
    let taxi = state.taxi(id);
    VehicleSnapshot {
        id,
        position: taxi.position,
        fuel: taxi.fuel,
    }
}

fn strand(
    state: &mut WorldState,
    telemetry: &mut SimTelemetry,
    clock: &SimulationClock,
    p: PassengerId,
) {
    let location = state.passenger(p).location;
    state.passenger_mut(p).status = PassengerStatus::Stranded;
    telemetry.record_stranding(p, location, clock.now());
}

fn broadcast_help(
    clock: &mut SimulationClock,
    bus: &mut MessageBus,
    graph: &GridGraph,
    state: &WorldState,
    taxi: &Taxi,
    p: PassengerId,
) {
    let position = state.taxi(taxi.id).position;
    let fuel = state.taxi(taxi.id).fuel;
    let destination = state.passenger(p).destination;
    let Ok(route) = graph.shortest_path(position, destination) else {
        return;
    };
    let now = clock.now();
    for to in state.taxi_ids() {
        if to == taxi.id {
            continue;
        }
        bus.post(
            clock,
            Envelope {
                from: taxi.id,
                to,
                sent_at: now,
                message: Message::HelpRequest {
                    passenger: p,
                    origin: position,
                    destination,
                    route: route.clone(),
                    fuel,
                },
            },
        );
    }
}

/// A holder just picked someone up (or lost its committed helper): deliver
/// directly if fuel allows, otherwise open a negotiation round.
#[allow(clippy::too_many_arguments)]
pub fn evaluate_delivery_system(
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
    if event.0.kind != EventKind::EvaluateDelivery || *mode != CoordinationMode::Decentralized {
        return;
    }
    let Some(EventSubject::Taxi(entity)) = event.0.subject else {
        return;
    };
    let Ok((_, mut taxi, _)) = taxis.get_mut(entity) else {
        return;
    };
    let Some(&p) = state.held_by(taxi.id).first() else {
        return;
    };
    if state.passenger(p).status.is_terminal() {
        return;
    }

    let position = state.taxi(taxi.id).position;
    let fuel = state.taxi(taxi.id).fuel;
    match graph.shortest_distance(position, state.passenger(p).destination) {
        Ok(distance) if distance <= fuel => {
            if taxi.route_to_dropoff(&graph, &state, p, None).is_ok() {
                taxi.objective = Some(Objective::DeliverPassenger(p));
                taxi.negotiation = None;
                schedule_move(&mut clock, entity, &mut taxi);
            }
        }
        Ok(_) => {
            let round = taxi.negotiation.map_or(1, |n| n.round);
            if round > negotiation.max_rounds {
                let err = RelayError::NegotiationTimeout {
                    rounds: negotiation.max_rounds,
                };
                warn!("{} gives up on {}: {}", taxi.id, p, err);
                strand(&mut state, &mut telemetry, &clock, p);
                taxi.negotiation = None;
                taxi.assigned.retain(|x| *x != p);
                return;
            }
            taxi.negotiation = Some(NegotiationState {
                passenger: p,
                round,
            });
            broadcast_help(&mut clock, &mut bus, &graph, &state, &taxi, p);
            clock.schedule_in(
                negotiation.round_ticks.max(1),
                EventKind::BidDeadline,
                Some(EventSubject::Taxi(entity)),
            );
            debug!("{} requested help for {} (round {})", taxi.id, p, round);
        }
        Err(_) => {
            // Destination unreachable from here; no relay can fix that.
            warn!("{} cannot reach the destination of {} at all", taxi.id, p);
            strand(&mut state, &mut telemetry, &clock, p);
            taxi.assigned.retain(|x| *x != p);
            taxi.negotiation = None;
        }
    }
}

/// React to newly delivered help requests, accepts, rejects, and status
/// updates. Allocation bids and transfer bids stay queued for their round
/// systems.
#[allow(clippy::too_many_arguments)]
pub fn process_mailbox_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    mode: Res<CoordinationMode>,
    graph: Res<GridGraph>,
    state: Res<WorldState>,
    mut bus: ResMut<MessageBus>,
    mut taxis: Query<(Entity, &mut Taxi, &mut Mailbox)>,
) {
    if event.0.kind != EventKind::ProcessMailbox || *mode != CoordinationMode::Decentralized {
        return;
    }
    let Some(EventSubject::Taxi(entity)) = event.0.subject else {
        return;
    };
    let Ok((_, mut taxi, mut mailbox)) = taxis.get_mut(entity) else {
        return;
    };

    let messages = mailbox.drain_matching(|env| {
        !matches!(
            env.message,
            Message::AllocationBid { .. } | Message::Bid { .. }
        )
    });

    for env in messages {
        match env.message {
            Message::HelpRequest {
                passenger,
                origin: _,
                destination,
                route,
                fuel,
            } => {
                // Bid only when free and able to finish the whole relay.
                if !(taxi.is_idle()
                    && taxi.assigned.is_empty()
                    && state.held_by(taxi.id).is_empty())
                {
                    continue;
                }
                let me = snapshot_of(&state, taxi.id);
                // Heuristic 2 from the payload alone: the farthest cell of
                // the requester's route it can still reach.
                let index = (fuel as usize).min(route.len().saturating_sub(1));
                let candidate = route[index];
                let Ok(leg) = graph.shortest_distance(me.position, candidate) else {
                    continue;
                };
                let Ok(tail) = graph.shortest_distance(candidate, destination) else {
                    continue;
                };
                let cost = leg + tail;
                if cost > me.fuel {
                    continue;
                }
                let now = clock.now();
                bus.post(
                    &mut clock,
                    Envelope {
                        from: taxi.id,
                        to: env.from,
                        sent_at: now,
                        message: Message::Bid {
                            passenger,
                            candidate,
                            cost,
                            position: me.position,
                            fuel: me.fuel,
                        },
                    },
                );
                debug!("{} bids {} for {} at {}", taxi.id, cost, passenger, candidate);
            }
            Message::Accept {
                passenger,
                destination,
                position,
                fuel,
                candidate,
            } => {
                if !(taxi.is_idle() && state.held_by(taxi.id).is_empty()) {
                    // No longer free; tell the requester instead of ghosting it.
                    let now = clock.now();
                    bus.post(
                        &mut clock,
                        Envelope {
                            from: taxi.id,
                            to: env.from,
                            sent_at: now,
                            message: Message::StatusUpdate {
                                passenger,
                                note: StatusNote::TransferCancelled,
                            },
                        },
                    );
                    continue;
                }
                let holder = VehicleSnapshot {
                    id: env.from,
                    position,
                    fuel,
                };
                let me = snapshot_of(&state, taxi.id);
                let cell = final_transfer_cell(&graph, holder, me, destination, candidate);
                if taxi.route_to_point(&graph, &state, cell).is_ok() {
                    taxi.objective = Some(Objective::AwaitTransfer {
                        passenger,
                        cell,
                        from: env.from,
                    });
                    taxi.assigned.push(passenger);
                    if taxi.plan.is_empty() {
                        clock.schedule_in(
                            1,
                            EventKind::AwaitTransfer,
                            Some(EventSubject::Taxi(entity)),
                        );
                    } else {
                        schedule_move(&mut clock, entity, &mut taxi);
                    }
                    debug!("{} meets {} at {}", taxi.id, env.from, cell);
                } else {
                    let now = clock.now();
                    bus.post(
                        &mut clock,
                        Envelope {
                            from: taxi.id,
                            to: env.from,
                            sent_at: now,
                            message: Message::StatusUpdate {
                                passenger,
                                note: StatusNote::TransferCancelled,
                            },
                        },
                    );
                }
            }
            Message::Reject { .. } => {}
            Message::StatusUpdate { passenger, note } => match note {
                StatusNote::TransferCancelled => {
                    match taxi.objective {
                        Some(Objective::HandOff {
                            passenger: hp,
                            to: Some(to),
                            ..
                        }) if hp == passenger && to == env.from => {
                            // The committed helper bailed; count the failed
                            // round and re-evaluate from wherever we are.
                            taxi.objective = None;
                            taxi.plan.clear();
                            if let Some(neg) = taxi.negotiation.as_mut() {
                                neg.round += 1;
                            }
                            clock.schedule_in(
                                0,
                                EventKind::EvaluateDelivery,
                                Some(EventSubject::Taxi(entity)),
                            );
                        }
                        Some(Objective::AwaitTransfer {
                            passenger: ap,
                            from,
                            ..
                        }) if ap == passenger && from == env.from => {
                            taxi.objective = None;
                            taxi.plan.clear();
                            taxi.assigned.retain(|x| *x != passenger);
                        }
                        _ => {}
                    }
                }
                StatusNote::PassengerStranded => {
                    if let Some(Objective::AwaitTransfer {
                        passenger: ap,
                        from,
                        ..
                    }) = taxi.objective
                    {
                        if ap == passenger && from == env.from {
                            taxi.objective = None;
                            taxi.plan.clear();
                            taxi.assigned.retain(|x| *x != passenger);
                        }
                    }
                }
            },
            Message::AllocationBid { .. } | Message::Bid { .. } => {}
        }
    }
}

/// The requester's bid window closed: pick the lowest bid (ties to the
/// lowest vehicle id), commit both sides, or spend a round and re-broadcast.
#[allow(clippy::too_many_arguments)]
pub fn bid_deadline_system(
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
    if event.0.kind != EventKind::BidDeadline || *mode != CoordinationMode::Decentralized {
        return;
    }
    let Some(EventSubject::Taxi(entity)) = event.0.subject else {
        return;
    };
    let Ok((_, mut taxi, mut mailbox)) = taxis.get_mut(entity) else {
        return;
    };
    let Some(neg) = taxi.negotiation else {
        return;
    };
    let p = neg.passenger;
    if state.passenger(p).status.is_terminal() || !state.held_by(taxi.id).contains(&p) {
        taxi.negotiation = None;
        return;
    }
    if matches!(taxi.objective, Some(Objective::HandOff { .. })) {
        // Already committed in an earlier round; stale deadline.
        return;
    }

    let bids: Vec<(TaxiId, Cell, u32, Cell, u32)> = mailbox
        .drain_matching(|env| {
            matches!(env.message, Message::Bid { passenger, .. } if passenger == p)
        })
        .into_iter()
        .filter_map(|env| match env.message {
            Message::Bid {
                candidate,
                cost,
                position,
                fuel,
                ..
            } => Some((env.from, candidate, cost, position, fuel)),
            _ => None,
        })
        .collect();

    if bids.is_empty() {
        if neg.round >= negotiation.max_rounds {
            let err = RelayError::NegotiationTimeout {
                rounds: negotiation.max_rounds,
            };
            warn!("no bids for {}: {}", p, err);
            strand(&mut state, &mut telemetry, &clock, p);
            taxi.negotiation = None;
            taxi.objective = None;
            taxi.assigned.retain(|x| *x != p);
        } else {
            taxi.negotiation = Some(NegotiationState {
                passenger: p,
                round: neg.round + 1,
            });
            broadcast_help(&mut clock, &mut bus, &graph, &state, &taxi, p);
            clock.schedule_in(
                negotiation.round_ticks.max(1),
                EventKind::BidDeadline,
                Some(EventSubject::Taxi(entity)),
            );
        }
        return;
    }

    let Some(&(winner, candidate, cost, winner_pos, winner_fuel)) = bids
        .iter()
        .min_by_key(|(id, _, cost, _, _)| (*cost, *id))
    else {
        return;
    };

    let me = snapshot_of(&state, taxi.id);
    let destination = state.passenger(p).destination;
    let now = clock.now();
    for &(bidder, ..) in &bids {
        let message = if bidder == winner {
            Message::Accept {
                passenger: p,
                destination,
                position: me.position,
                fuel: me.fuel,
                candidate,
            }
        } else {
            Message::Reject { passenger: p }
        };
        bus.post(
            &mut clock,
            Envelope {
                from: taxi.id,
                to: bidder,
                sent_at: now,
                message,
            },
        );
    }

    let winner_snap = VehicleSnapshot {
        id: winner,
        position: winner_pos,
        fuel: winner_fuel,
    };
    let cell = final_transfer_cell(&graph, me, winner_snap, destination, candidate);
    match taxi.route_to_dropoff(&graph, &state, p, Some(cell)) {
        Ok(_) => {
            taxi.objective = Some(Objective::HandOff {
                passenger: p,
                cell,
                to: Some(winner),
            });
            state.passenger_mut(p).status = PassengerStatus::TransferPending;
            schedule_move(&mut clock, entity, &mut taxi);
            debug!(
                "{} hands {} to {} at {} (bid cost {})",
                taxi.id, p, winner, cell, cost
            );
        }
        Err(err) => {
            warn!("{} cannot reach its own transfer cell {}: {}", taxi.id, cell, err);
            strand(&mut state, &mut telemetry, &clock, p);
            taxi.negotiation = None;
            taxi.assigned.retain(|x| *x != p);
            bus.post(
                &mut clock,
                Envelope {
                    from: taxi.id,
                    to: winner,
                    sent_at: now,
                    message: Message::StatusUpdate {
                        passenger: p,
                        note: StatusNote::PassengerStranded,
                    },
                },
            );
        }
    }
}

/// Helper side of a hand-off: poll the transfer cell until the passenger is
/// grounded there, then pick them up; cancel on any terminal or third-party
/// outcome.
pub fn await_transfer_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    state: Res<WorldState>,
    mut taxis: Query<(Entity, &mut Taxi, &mut Mailbox)>,
) {
    if event.0.kind != EventKind::AwaitTransfer {
        return;
    }
    let Some(EventSubject::Taxi(entity)) = event.0.subject else {
        return;
    };
    let Ok((_, mut taxi, _)) = taxis.get_mut(entity) else {
        return;
    };
    let Some(Objective::AwaitTransfer {
        passenger,
        cell,
        from,
    }) = taxi.objective
    else {
        return;
    };

    let pass = state.passenger(passenger);
    let taken_by_third_party = pass
        .holder
        .map_or(false, |h| h != from && h != taxi.id);
    if pass.status.is_terminal() || taken_by_third_party {
        debug!("{} stops waiting for {} at {}", taxi.id, passenger, cell);
        taxi.objective = None;
        taxi.plan.clear();
        taxi.assigned.retain(|x| *x != passenger);
        return;
    }

    let position = state.taxi(taxi.id).position;
    if pass.status == PassengerStatus::Transferred
        && pass.location == cell
        && position == cell
        && taxi.plan.is_empty()
    {
        taxi.plan.push_back(Action::Pickup);
        schedule_move(&mut clock, entity, &mut taxi);
    } else if taxi.plan.is_empty() {
        clock.schedule_in(1, EventKind::AwaitTransfer, Some(EventSubject::Taxi(entity)));
    }
}
