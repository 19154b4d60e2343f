//! Movement system: one taxi consumes one planned action per `MoveStep`.
//!
//! Fuel exhaustion is caught here: the held passenger transitions to
//! `Stranded` and, in decentralized mode, the hand-off partner gets an
//! observable cancellation message instead of a silent drop.

use bevy_ecs::prelude::{Entity, Query, Res, ResMut};
use log::{debug, warn};

use crate::agent::{Objective, Taxi};
use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::error::RelayError;
use crate::grid::GridGraph;
use crate::messaging::{Envelope, Message, MessageBus, StatusNote};
use crate::oracle::{ActionEffect, OracleResource, PassengerStatus, TaxiId, WorldState};
use crate::scenario::CoordinationMode;
use crate::telemetry::SimTelemetry;

/// Queue the next `MoveStep` for a taxi with a non-empty plan, at most one
/// at a time.
pub(crate) fn schedule_move(clock: &mut SimulationClock, entity: Entity, taxi: &mut Taxi) {
    if !taxi.move_scheduled && !taxi.plan.is_empty() {
        clock.schedule_in(1, EventKind::MoveStep, Some(EventSubject::Taxi(entity)));
        taxi.move_scheduled = true;
    }
}

fn handoff_partner(taxi: &Taxi) -> Option<(TaxiId, crate::oracle::PassengerId)> {
    match taxi.objective {
        Some(Objective::HandOff {
            passenger,
            to: Some(partner),
            ..
        }) => Some((partner, passenger)),
        Some(Objective::AwaitTransfer {
            passenger, from, ..
        }) => Some((from, passenger)),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
pub fn move_step_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    mode: Res<CoordinationMode>,
    graph: Res<GridGraph>,
    oracle: Res<OracleResource>,
    mut state: ResMut<WorldState>,
    mut bus: ResMut<MessageBus>,
    mut telemetry: ResMut<SimTelemetry>,
    mut taxis: Query<(Entity, &mut Taxi)>,
) {
    if event.0.kind != EventKind::MoveStep {
        return;
    }
    let Some(EventSubject::Taxi(entity)) = event.0.subject else {
        return;
    };
    let Ok((_, mut taxi)) = taxis.get_mut(entity) else {
        return;
    };
    taxi.move_scheduled = false;

    match taxi.step(&graph, oracle.0.as_ref(), &mut state) {
        Err(RelayError::OutOfFuel { .. }) => {
            for p in state.held_by(taxi.id) {
                let location = state.passenger(p).location;
                state.passenger_mut(p).status = PassengerStatus::Stranded;
                telemetry.record_stranding(p, location, clock.now());
                warn!("{} ran out of fuel; {} stranded at {}", taxi.id, p, location);
            }
            if *mode == CoordinationMode::Decentralized {
                if let Some((partner, passenger)) = handoff_partner(&taxi) {
                    let envelope = Envelope {
                        from: taxi.id,
                        to: partner,
                        sent_at: clock.now(),
                        message: Message::StatusUpdate {
                            passenger,
                            note: StatusNote::TransferCancelled,
                        },
                    };
                    bus.post(&mut clock, envelope);
                }
            }
            taxi.objective = None;
            taxi.negotiation = None;
            taxi.assigned.clear();
        }
        Err(err) => {
            debug!("{} step error: {}", taxi.id, err);
        }
        Ok(None) => {
            if matches!(taxi.objective, Some(Objective::AwaitTransfer { .. })) {
                clock.schedule_in(1, EventKind::AwaitTransfer, Some(EventSubject::Taxi(entity)));
            }
        }
        Ok(Some(outcome)) => {
            telemetry.add_reward(taxi.id, outcome.reward);
            match outcome.effect {
                ActionEffect::PickedUp(p) => {
                    debug!("{} picked up {} at tick {}", taxi.id, p, clock.now());
                    taxi.objective = None;
                    if *mode == CoordinationMode::Decentralized {
                        clock.schedule_in(
                            0,
                            EventKind::EvaluateDelivery,
                            Some(EventSubject::Taxi(entity)),
                        );
                    }
                }
                ActionEffect::DroppedAtDestination(p) => {
                    debug!("{} delivered {} at tick {}", taxi.id, p, clock.now());
                    taxi.assigned.retain(|x| *x != p);
                    taxi.objective = None;
                    if taxi.negotiation.map_or(false, |n| n.passenger == p) {
                        taxi.negotiation = None;
                    }
                    telemetry.record_delivery(p, clock.now());
                }
                ActionEffect::DroppedEnRoute(p) => {
                    let to = match taxi.objective {
                        Some(Objective::HandOff { passenger, to, .. }) if passenger == p => to,
                        _ => None,
                    };
                    let cell = state.passenger(p).location;
                    debug!(
                        "{} grounded {} at {} for {:?}",
                        taxi.id, p, cell, to
                    );
                    taxi.assigned.retain(|x| *x != p);
                    taxi.objective = None;
                    if taxi.negotiation.map_or(false, |n| n.passenger == p) {
                        taxi.negotiation = None;
                    }
                    telemetry.record_transfer(p, taxi.id, to, cell, clock.now());
                }
                ActionEffect::BlockedByWall => {
                    warn!("{} drove into a wall; plan out of sync", taxi.id);
                }
                _ => {}
            }

            if !taxi.plan.is_empty() {
                schedule_move(&mut clock, entity, &mut taxi);
            } else if matches!(taxi.objective, Some(Objective::AwaitTransfer { .. })) {
                clock.schedule_in(1, EventKind::AwaitTransfer, Some(EventSubject::Taxi(entity)));
            }
        }
    }
}
