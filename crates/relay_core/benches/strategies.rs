use criterion::{black_box, criterion_group, criterion_main, Criterion};

use relay_core::grid::{Cell, GridGraph};
use relay_core::oracle::TaxiId;
use relay_core::transfer::{
    FarthestOnPath, OptimalTransfer, RouteProjection, TransferRequest, TransferStrategy,
    VehicleSnapshot,
};

fn planning_request() -> (GridGraph, TransferRequest) {
    let row = ".".repeat(20);
    let layout = vec![row; 20].join("\n");
    let graph = GridGraph::build(&layout).expect("graph");
    let request = TransferRequest {
        holder: VehicleSnapshot {
            id: TaxiId(0),
            position: Cell::new(0, 0),
            fuel: 14,
        },
        helper: Some(VehicleSnapshot {
            id: TaxiId(1),
            position: Cell::new(10, 6),
            fuel: 16,
        }),
        origin: Cell::new(0, 0),
        destination: Cell::new(19, 7),
    };
    (graph, request)
}

fn bench_strategies(c: &mut Criterion) {
    let (graph, request) = planning_request();

    let mut group = c.benchmark_group("transfer_planning");
    group.bench_function("optimal", |b| {
        b.iter(|| OptimalTransfer.plan(black_box(&graph), black_box(&request)))
    });
    group.bench_function("route_projection", |b| {
        b.iter(|| RouteProjection.plan(black_box(&graph), black_box(&request)))
    });
    group.bench_function("farthest_on_path", |b| {
        b.iter(|| FarthestOnPath.plan(black_box(&graph), black_box(&request)))
    });
    group.finish();
}

criterion_group!(benches, bench_strategies);
criterion_main!(benches);
