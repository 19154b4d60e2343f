use crate::grid::GridGraph;

use super::algorithm::TransferStrategy;
use super::types::{StrategyKind, TransferProposal, TransferRequest};

/// Heuristic 2: farthest reachable cell on the passenger's own path.
///
/// Computes the passenger's shortest path origin → destination ignoring both
/// vehicles, then picks the farthest cell along it the holder can still
/// reach within its remaining fuel. Does not depend on the helper at all,
/// which is exactly what the decentralized case needs before negotiation
/// completes.
pub struct FarthestOnPath;

impl TransferStrategy for FarthestOnPath {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FarthestOnPath
    }

    fn plan(&self, graph: &GridGraph, request: &TransferRequest) -> Option<TransferProposal> {
        let path = graph
            .shortest_path(request.origin, request.destination)
            .ok()?;

        let mut best: Option<(usize, TransferProposal)> = None;
        for (index, &cell) in path.iter().enumerate() {
            let Ok(holder_cost) = graph.shortest_distance(request.holder.position, cell) else {
                continue;
            };
            if holder_cost > request.holder.fuel {
                continue;
            }
            if best.as_ref().map_or(true, |(i, _)| index >= *i) {
                let helper_cost = request.helper.and_then(|helper| {
                    let leg = graph.shortest_distance(helper.position, cell).ok()?;
                    let tail = graph.shortest_distance(cell, request.destination).ok()?;
                    Some(leg + tail)
                });
                best = Some((
                    index,
                    TransferProposal {
                        cell,
                        holder_cost,
                        helper_cost,
                        strategy: StrategyKind::FarthestOnPath,
                    },
                ));
            }
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

    fn holder(position: Cell, fuel: u32) -> VehicleSnapshot {
        VehicleSnapshot {
            id: TaxiId(0),
            position,
            fuel,
        }
    }

    #[test]
    fn chosen_cell_is_on_the_passenger_path_at_fuel_distance() {
        let graph = GridGraph::build("..........").expect("graph");
        let request = TransferRequest {
            holder: holder(Cell::new(0, 0), 4),
            helper: None,
            origin: Cell::new(0, 0),
            destination: Cell::new(0, 9),
        };

        let proposal = FarthestOnPath.plan(&graph, &request).expect("proposal");
        assert_eq!(proposal.cell, Cell::new(0, 4));
        assert_eq!(proposal.holder_cost, 4);
        assert_eq!(proposal.helper_cost, None);
    }

    #[test]
    fn chosen_cell_always_lies_on_the_shortest_path() {
        let layout = ".....\n.###.\n.....\n.....";
        let graph = GridGraph::build(layout).expect("graph");
        let origin = Cell::new(0, 0);
        let destination = Cell::new(3, 4);
        let path = graph.shortest_path(origin, destination).expect("path");

        for fuel in 0..=10 {
            let request = TransferRequest {
                holder: holder(origin, fuel),
                helper: None,
                origin,
                destination,
            };
            let proposal = FarthestOnPath.plan(&graph, &request).expect("proposal");
            assert!(
                path.contains(&proposal.cell),
                "cell {} off path for fuel {}",
                proposal.cell,
                fuel
            );
        }
    }

    #[test]
    fn reaching_the_destination_proposes_the_destination_itself() {
        let graph = GridGraph::build(".....").expect("graph");
        let request = TransferRequest {
            holder: holder(Cell::new(0, 0), 10),
            helper: None,
            origin: Cell::new(0, 0),
            destination: Cell::new(0, 4),
        };
        let proposal = FarthestOnPath.plan(&graph, &request).expect("proposal");
        assert_eq!(proposal.cell, Cell::new(0, 4));
    }

    #[test]
    fn unreachable_destination_yields_no_proposal() {
        let graph = GridGraph::build("..#..").expect("graph");
        let request = TransferRequest {
            holder: holder(Cell::new(0, 0), 5),
            helper: None,
            origin: Cell::new(0, 0),
            destination: Cell::new(0, 4),
        };
        assert!(FarthestOnPath.plan(&graph, &request).is_none());
    }
}
