//! Episode kick-off: schedule the first control cycle (centralized) or run
//! the opening allocation broadcast (decentralized).

use bevy_ecs::prelude::{Entity, Query, Res, ResMut};

use crate::agent::Taxi;
use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::grid::GridGraph;
use crate::messaging::{Mailbox, MessageBus};
use crate::oracle::{TaxiId, WorldState};
use crate::scenario::CoordinationMode;
use crate::systems::allocation::broadcast_allocation_bids;

pub fn simulation_started_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    mode: Res<CoordinationMode>,
    graph: Res<GridGraph>,
    state: Res<WorldState>,
    mut bus: ResMut<MessageBus>,
    mut taxis: Query<(Entity, &mut Taxi, &mut Mailbox)>,
) {
    if event.0.kind != EventKind::SimulationStarted {
        return;
    }

    match *mode {
        CoordinationMode::Centralized => {
            clock.schedule_in(0, EventKind::ControlCycle, None);
        }
        CoordinationMode::Decentralized => {
            let recipients: Vec<TaxiId> = taxis.iter().map(|(_, taxi, _)| taxi.id).collect();
            for (entity, mut taxi, _) in taxis.iter_mut() {
                broadcast_allocation_bids(&mut clock, &mut bus, &graph, &state, &taxi, &recipients);
                taxi.allocation_round = 1;
                clock.schedule_in(1, EventKind::AllocationRound, Some(EventSubject::Taxi(entity)));
            }
        }
    }
}
