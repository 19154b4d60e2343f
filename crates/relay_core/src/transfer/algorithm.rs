use bevy_ecs::prelude::Resource;

use crate::grid::GridGraph;

use super::types::{StrategyKind, TransferProposal, TransferRequest};

/// A transfer-point planning strategy.
///
/// Implementations are pure: no side effects, and identical inputs always
/// produce identical proposals (ties broken lexicographically on the cell).
/// All strategies share this signature so callers are interchangeable.
pub trait TransferStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Compute a candidate hand-off cell, or `None` when the request is
    /// infeasible under this strategy (no common reachable cell, missing
    /// helper snapshot, unreachable destination).
    fn plan(&self, graph: &GridGraph, request: &TransferRequest) -> Option<TransferProposal>;
}

/// ECS resource wrapping the scenario's configured strategy.
#[derive(Resource)]
pub struct TransferStrategyResource(pub Box<dyn TransferStrategy>);
