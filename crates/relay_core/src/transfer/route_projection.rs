use crate::grid::GridGraph;

use super::algorithm::TransferStrategy;
use super::types::{StrategyKind, TransferProposal, TransferRequest};

/// Heuristic 1: project the hand-off onto the helper's planned route.
///
/// Computes the helper's shortest path to the destination (the helper's own
/// position counts as a candidate) and, among the cells on it the holder can
/// reach within fuel, picks the one closest to the holder: the smallest
/// detour for the holder while the helper stays on its route. Approximates
/// the exhaustive search without scanning the whole grid.
pub struct RouteProjection;

impl TransferStrategy for RouteProjection {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RouteProjection
    }

    fn plan(&self, graph: &GridGraph, request: &TransferRequest) -> Option<TransferProposal> {
        let helper = request.helper?;
        let path = graph
            .shortest_path(helper.position, request.destination)
            .ok()?;
        let helper_total = (path.len() - 1) as u32;
        if helper_total > helper.fuel {
            return None;
        }

        let mut best: Option<TransferProposal> = None;
        for &cell in &path {
            let Ok(holder_cost) = graph.shortest_distance(request.holder.position, cell) else {
                continue;
            };
            if holder_cost > request.holder.fuel {
                continue;
            }
            let candidate = TransferProposal {
                cell,
                holder_cost,
                // The cell sits on the helper's own shortest path, so the
                // helper's total stays the direct path length.
                helper_cost: Some(helper_total),
                strategy: StrategyKind::RouteProjection,
            };
            let better = match &best {
                None => true,
                Some(current) => {
                    holder_cost < current.holder_cost
                        || (holder_cost == current.holder_cost && cell < current.cell)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
        best
    }
}
