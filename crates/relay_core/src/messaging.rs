//! Inter-vehicle messages and the deterministic delivery bus.
//!
//! Vehicles never read each other's state; everything they know about a peer
//! arrived in a [`Message`]. A message posted at tick t becomes visible to
//! its recipient at t + 1, and same-tick deliveries drain in (send sequence)
//! order, so runs replay identically.

use std::collections::VecDeque;

use bevy_ecs::prelude::{Component, Resource};

use crate::clock::{EventKind, SimulationClock};
use crate::grid::Cell;
use crate::oracle::{PassengerId, TaxiId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusNote {
    TransferCancelled,
    PassengerStranded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Decentralized allocation: "my pickup cost for this passenger".
    AllocationBid { passenger: PassengerId, cost: u32 },
    /// A holder that cannot deliver asks for help. `route` is the holder's
    /// remaining shortest path to the destination.
    HelpRequest {
        passenger: PassengerId,
        origin: Cell,
        destination: Cell,
        route: Vec<Cell>,
        fuel: u32,
    },
    /// A peer offers to take over at `candidate` for an estimated `cost`.
    Bid {
        passenger: PassengerId,
        candidate: Cell,
        cost: u32,
        position: Cell,
        fuel: u32,
    },
    /// The requester commits to the lowest bidder. Carries the requester's
    /// own snapshot so both sides can compute the final transfer cell from
    /// mutually known state, plus the winning bid's candidate as fallback.
    Accept {
        passenger: PassengerId,
        destination: Cell,
        position: Cell,
        fuel: u32,
        candidate: Cell,
    },
    Reject { passenger: PassengerId },
    /// Observable cancellation / terminal notices; never a silent drop.
    StatusUpdate {
        passenger: PassengerId,
        note: StatusNote,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: TaxiId,
    pub to: TaxiId,
    pub sent_at: u64,
    pub message: Message,
}

/// Per-vehicle incoming queue.
#[derive(Debug, Default, Component)]
pub struct Mailbox {
    pub incoming: VecDeque<Envelope>,
}

impl Mailbox {
    /// Remove and return the envelopes matching `pred`, keeping the rest in
    /// arrival order (bids stay queued until their deadline system runs).
    pub fn drain_matching<F>(&mut self, mut pred: F) -> Vec<Envelope>
    where
        F: FnMut(&Envelope) -> bool,
    {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.incoming.len());
        while let Some(env) = self.incoming.pop_front() {
            if pred(&env) {
                taken.push(env);
            } else {
                kept.push_back(env);
            }
        }
        self.incoming = kept;
        taken
    }
}

/// In-flight messages with their delivery ticks. Posting schedules a
/// `MessageDelivery` event at t + 1 (at most one per tick).
#[derive(Debug, Default, Resource)]
pub struct MessageBus {
    in_flight: Vec<(u64, u64, Envelope)>,
    seq: u64,
    delivery_scheduled_for: Option<u64>,
}

impl MessageBus {
    pub fn post(&mut self, clock: &mut SimulationClock, envelope: Envelope) {
        let deliver_at = clock.now() + 1;
        self.in_flight.push((deliver_at, self.seq, envelope));
        self.seq += 1;
        if self.delivery_scheduled_for != Some(deliver_at) {
            clock.schedule_at(deliver_at, EventKind::MessageDelivery, None);
            self.delivery_scheduled_for = Some(deliver_at);
        }
    }

    /// Envelopes due at or before `now`, in send order.
    pub fn take_due(&mut self, now: u64) -> Vec<Envelope> {
        let mut due: Vec<(u64, u64, Envelope)> = Vec::new();
        let mut pending = Vec::with_capacity(self.in_flight.len());
        for entry in self.in_flight.drain(..) {
            if entry.0 <= now {
                due.push(entry);
            } else {
                pending.push(entry);
            }
        }
        self.in_flight = pending;
        due.sort_by_key(|(tick, seq, _)| (*tick, *seq));
        due.into_iter().map(|(_, _, env)| env).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}
