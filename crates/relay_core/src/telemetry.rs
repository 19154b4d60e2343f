//! Telemetry / KPIs: delivery, transfer, and stranding records for the
//! experiment driver. Aggregation and plotting live outside the core.

use std::collections::BTreeMap;

use bevy_ecs::prelude::Resource;

use crate::grid::{Cell, GridGraph};
use crate::oracle::{PassengerId, PassengerStatus, TaxiId, WorldState};

/// One delivered passenger, recorded at the final dropoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub passenger: PassengerId,
    pub tick: u64,
    /// Hand-offs the passenger went through before arriving.
    pub transfers: u32,
}

/// One executed hand-off (the holder grounding the passenger at the cell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub passenger: PassengerId,
    pub from: TaxiId,
    /// Receiving vehicle when one was committed at planning time.
    pub to: Option<TaxiId>,
    pub cell: Cell,
    pub tick: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrandingRecord {
    pub passenger: PassengerId,
    pub tick: u64,
    pub location: Cell,
}

/// Collects simulation telemetry. Insert as a resource to record outcomes.
#[derive(Debug, Default, Resource)]
pub struct SimTelemetry {
    pub deliveries: Vec<DeliveryRecord>,
    pub transfers: Vec<TransferRecord>,
    pub strandings: Vec<StrandingRecord>,
    pub rewards: BTreeMap<TaxiId, i64>,
}

impl SimTelemetry {
    pub fn add_reward(&mut self, taxi: TaxiId, reward: i32) {
        *self.rewards.entry(taxi).or_insert(0) += i64::from(reward);
    }

    pub fn record_delivery(&mut self, passenger: PassengerId, tick: u64) {
        let transfers = self
            .transfers
            .iter()
            .filter(|t| t.passenger == passenger)
            .count() as u32;
        self.deliveries.push(DeliveryRecord {
            passenger,
            tick,
            transfers,
        });
    }

    pub fn record_transfer(
        &mut self,
        passenger: PassengerId,
        from: TaxiId,
        to: Option<TaxiId>,
        cell: Cell,
        tick: u64,
    ) {
        self.transfers.push(TransferRecord {
            passenger,
            from,
            to,
            cell,
            tick,
        });
    }

    pub fn record_stranding(&mut self, passenger: PassengerId, location: Cell, tick: u64) {
        self.strandings.push(StrandingRecord {
            passenger,
            tick,
            location,
        });
    }
}

/// Passenger status counts at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub waiting: usize,
    pub assigned: usize,
    pub in_vehicle: usize,
    pub transfer_pending: usize,
    pub transferred: usize,
    pub delivered: usize,
    pub stranded: usize,
}

pub fn status_counts(state: &WorldState) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for p in state.passenger_ids() {
        match state.passenger(p).status {
            PassengerStatus::Waiting => counts.waiting += 1,
            PassengerStatus::Assigned => counts.assigned += 1,
            PassengerStatus::InVehicle => counts.in_vehicle += 1,
            PassengerStatus::TransferPending => counts.transfer_pending += 1,
            PassengerStatus::Transferred => counts.transferred += 1,
            PassengerStatus::Delivered => counts.delivered += 1,
            PassengerStatus::Stranded => counts.stranded += 1,
        }
    }
    counts
}

/// How far the passenger still is from their destination, the experiment
/// driver's distance metric. `None` when no path exists at all.
pub fn remaining_distance(
    graph: &GridGraph,
    state: &WorldState,
    passenger: PassengerId,
) -> Option<u32> {
    let pass = state.passenger(passenger);
    graph
        .shortest_distance(pass.location, pass.destination)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_records_count_prior_transfers() {
        let mut telemetry = SimTelemetry::default();
        telemetry.record_transfer(PassengerId(0), TaxiId(0), Some(TaxiId(1)), Cell::new(1, 1), 4);
        telemetry.record_transfer(PassengerId(1), TaxiId(2), None, Cell::new(2, 2), 5);
        telemetry.record_delivery(PassengerId(0), 9);

        assert_eq!(telemetry.deliveries.len(), 1);
        assert_eq!(telemetry.deliveries[0].transfers, 1);
    }

    #[test]
    fn rewards_accumulate_per_taxi() {
        let mut telemetry = SimTelemetry::default();
        telemetry.add_reward(TaxiId(0), -1);
        telemetry.add_reward(TaxiId(0), 50);
        telemetry.add_reward(TaxiId(1), -2);
        assert_eq!(telemetry.rewards[&TaxiId(0)], 49);
        assert_eq!(telemetry.rewards[&TaxiId(1)], -2);
    }
}
