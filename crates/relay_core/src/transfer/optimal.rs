use log::debug;

use crate::grid::GridGraph;

use super::algorithm::TransferStrategy;
use super::types::{StrategyKind, TransferProposal, TransferRequest};

/// Exhaustive search: enumerate every cell reachable by both vehicles within
/// their remaining fuel and minimize `cost(holder → c) + cost(c → destination)`,
/// keeping only cells from which the helper can actually finish the delivery.
/// Ties break lexicographically.
///
/// This is O(V * pathfinding cost), the expensive path, used only when an
/// exhaustive global search is explicitly requested.
pub struct OptimalTransfer;

impl TransferStrategy for OptimalTransfer {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Optimal
    }

    fn plan(&self, graph: &GridGraph, request: &TransferRequest) -> Option<TransferProposal> {
        let helper = request.helper?;
        let holder_reach = graph.reachable_from(request.holder.position, request.holder.fuel);
        let helper_reach = graph.reachable_from(helper.position, helper.fuel);

        let mut best: Option<(u32, TransferProposal)> = None;
        // BTreeSet iteration is lexicographic, so the first strictly better
        // candidate is also the lexicographically smallest among ties.
        for &cell in holder_reach.intersection(&helper_reach) {
            let Ok(holder_cost) = graph.shortest_distance(request.holder.position, cell) else {
                continue;
            };
            let Ok(to_destination) = graph.shortest_distance(cell, request.destination) else {
                continue;
            };
            let Ok(helper_leg) = graph.shortest_distance(helper.position, cell) else {
                continue;
            };
            let helper_cost = helper_leg + to_destination;
            if helper_cost > helper.fuel {
                continue;
            }
            let total = holder_cost + to_destination;
            if best.as_ref().map_or(true, |(t, _)| total < *t) {
                best = Some((
                    total,
                    TransferProposal {
                        cell,
                        holder_cost,
                        helper_cost: Some(helper_cost),
                        strategy: StrategyKind::Optimal,
                    },
                ));
            }
        }

        if best.is_none() {
            debug!(
                "optimal search found no feasible transfer cell for {} -> {}",
                request.holder.id, helper.id
            );
        }
        best.map(|(_, proposal)| proposal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;
    use crate::oracle::TaxiId;
    use crate::transfer::types::VehicleSnapshot;

    fn snapshot(id: usize, position: Cell, fuel: u32) -> VehicleSnapshot {
        VehicleSnapshot {
            id: TaxiId(id),
            position,
            fuel,
        }
    }

    #[test]
    fn requires_a_helper_snapshot() {
        let graph = GridGraph::build(".....").expect("graph");
        let request = TransferRequest {
            holder: snapshot(0, Cell::new(0, 0), 3),
            helper: None,
            origin: Cell::new(0, 0),
            destination: Cell::new(0, 4),
        };
        assert!(OptimalTransfer.plan(&graph, &request).is_none());
    }

    #[test]
    fn picks_the_cheapest_feasible_cell_with_lexicographic_ties() {
        let layout = [".........."; 10].join("\n");
        let graph = GridGraph::build(&layout).expect("graph");
        let request = TransferRequest {
            holder: snapshot(0, Cell::new(0, 0), 8),
            helper: Some(snapshot(1, Cell::new(5, 3), 6)),
            origin: Cell::new(0, 0),
            destination: Cell::new(9, 3),
        };

        let proposal = OptimalTransfer.plan(&graph, &request).expect("proposal");
        assert_eq!(proposal.cell, Cell::new(4, 3));
        assert_eq!(proposal.holder_cost, 7);
        assert_eq!(proposal.helper_cost, Some(6));
        // The relayed trip costs no more than the direct trip.
        let direct = graph
            .shortest_distance(Cell::new(0, 0), Cell::new(9, 3))
            .expect("direct");
        assert_eq!(
            proposal.holder_cost
                + graph
                    .shortest_distance(proposal.cell, Cell::new(9, 3))
                    .expect("tail"),
            direct
        );
    }

    #[test]
    fn returns_none_when_no_common_cell_supports_delivery() {
        let graph = GridGraph::build("..........").expect("graph");
        let request = TransferRequest {
            holder: snapshot(0, Cell::new(0, 0), 4),
            helper: Some(snapshot(1, Cell::new(0, 9), 7)),
            origin: Cell::new(0, 0),
            destination: Cell::new(0, 9),
        };
        assert!(OptimalTransfer.plan(&graph, &request).is_none());
    }
}
