//! Message delivery: drain due envelopes from the bus into recipient
//! mailboxes, then wake each recipient in entity order on the same tick.

use std::collections::BTreeSet;

use bevy_ecs::prelude::{Entity, Query, Res, ResMut};

use crate::agent::Taxi;
use crate::clock::{CurrentEvent, EventKind, EventSubject, SimulationClock};
use crate::messaging::{Mailbox, MessageBus};

pub fn message_delivery_system(
    mut clock: ResMut<SimulationClock>,
    event: Res<CurrentEvent>,
    mut bus: ResMut<MessageBus>,
    mut taxis: Query<(Entity, &Taxi, &mut Mailbox)>,
) {
    if event.0.kind != EventKind::MessageDelivery {
        return;
    }
    let now = clock.now();
    let due = bus.take_due(now);
    if due.is_empty() {
        return;
    }

    let mut recipients: BTreeSet<Entity> = BTreeSet::new();
    for envelope in due {
        let target = taxis
            .iter()
            .find(|(_, taxi, _)| taxi.id == envelope.to)
            .map(|(entity, _, _)| entity);
        if let Some(entity) = target {
            if let Ok((_, _, mut mailbox)) = taxis.get_mut(entity) {
                mailbox.incoming.push_back(envelope);
                recipients.insert(entity);
            }
        }
    }

    for entity in recipients {
        clock.schedule_at(now, EventKind::ProcessMailbox, Some(EventSubject::Taxi(entity)));
    }
}
