use serde::{Deserialize, Serialize};

use crate::grid::Cell;
use crate::oracle::TaxiId;

/// Which planning strategy produced a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Exhaustive search over the both-reachable cell set.
    Optimal,
    /// Heuristic 1: project the hand-off onto the helper's planned route.
    RouteProjection,
    /// Heuristic 2: farthest reachable cell on the passenger's own path.
    FarthestOnPath,
}

/// One vehicle's externally visible state, gathered explicitly by the
/// coordinator or carried in a message payload. Planning never reads a live
/// vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VehicleSnapshot {
    pub id: TaxiId,
    pub position: Cell,
    pub fuel: u32,
}

/// Input to a transfer planning call. `helper` is `None` when the second
/// vehicle's state is unknown (the decentralized case before negotiation
/// completes); only [`super::FarthestOnPath`] can plan without it.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest {
    pub holder: VehicleSnapshot,
    pub helper: Option<VehicleSnapshot>,
    /// The passenger's current cell (the holder's position once aboard).
    pub origin: Cell,
    pub destination: Cell,
}

/// A candidate hand-off cell with the expected cost for each vehicle.
/// Ephemeral: produced and consumed within one coordination round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProposal {
    pub cell: Cell,
    /// Moves for the holder to reach the cell.
    pub holder_cost: u32,
    /// Moves for the helper to reach the cell and then finish the delivery;
    /// `None` when the helper was unknown at planning time.
    pub helper_cost: Option<u32>,
    pub strategy: StrategyKind,
}
