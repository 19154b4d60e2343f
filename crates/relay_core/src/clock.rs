//! Deterministic discrete-tick event clock.
//!
//! The simulation advances by popping events from a min-heap ordered by
//! (tick, kind, subject). [`EventKind`] variant order is the within-tick
//! processing priority: message delivery runs before the decision systems,
//! decisions before movement. Identical schedules therefore replay to
//! identical traces.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bevy_ecs::prelude::{Entity, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    SimulationStarted,
    /// Drain the message bus into recipient mailboxes.
    MessageDelivery,
    /// Decentralized: decide passenger allocation from collected bids.
    AllocationRound,
    /// React to newly delivered messages (help requests, accepts, rejects).
    ProcessMailbox,
    /// Decentralized: the help requester closes its bid window.
    BidDeadline,
    /// Decentralized: a holder checks whether it can deliver or must ask for help.
    EvaluateDelivery,
    /// Centralized: one coordinator control cycle.
    ControlCycle,
    /// One taxi consumes one action from its plan.
    MoveStep,
    /// A helper polls the transfer cell for the grounded passenger.
    AwaitTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventSubject {
    Taxi(Entity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub tick: u64,
    pub kind: EventKind,
    pub subject: Option<EventSubject>,
}

impl Event {
    fn key(&self) -> (u64, EventKind, Option<EventSubject>) {
        (self.tick, self.kind, self.subject)
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering to make BinaryHeap a min-heap by (tick, kind, subject).
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The event currently being processed, inserted by the runner before the
/// schedule runs so systems can gate on it.
#[derive(Debug, Resource)]
pub struct CurrentEvent(pub Event);

#[derive(Debug, Default, Resource)]
pub struct SimulationClock {
    now: u64,
    events: BinaryHeap<Event>,
}

impl SimulationClock {
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn schedule_at(&mut self, tick: u64, kind: EventKind, subject: Option<EventSubject>) {
        debug_assert!(tick >= self.now, "event tick must be >= current time");
        self.events.push(Event {
            tick,
            kind,
            subject,
        });
    }

    pub fn schedule_in(&mut self, delta: u64, kind: EventKind, subject: Option<EventSubject>) {
        self.schedule_at(self.now + delta, kind, subject);
    }

    pub fn pop_next(&mut self) -> Option<Event> {
        let event = self.events.pop()?;
        self.now = event.tick;
        Some(event)
    }

    pub fn next_event_tick(&self) -> Option<u64> {
        self.events.peek().map(|event| event.tick)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
