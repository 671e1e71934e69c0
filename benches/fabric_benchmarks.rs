//! Benchmarks for the network fabric's delayed-delivery loop and the
//! OM(m) recursion it drives, across recursion depth and node count.
//! Replaces the teacher's HotStuff vote-aggregation benchmarks with
//! targets relevant to this simulator.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use om_bandit_sim::clock::{LatencyModel, SimClock};
use om_bandit_sim::network::NetworkFabric;
use om_bandit_sim::node;
use om_bandit_sim::types::NodeId;
use tokio::runtime::Runtime;

fn run_one_round(rt: &Runtime, total_nodes: usize, m: usize) {
    rt.block_on(async move {
        let clock = Arc::new(SimClock::new());
        let mut handles = Vec::with_capacity(total_nodes);
        let mut joins = Vec::with_capacity(total_nodes);
        for i in 0..total_nodes as u32 {
            let (handle, join) = node::spawn(
                NodeId(i),
                total_nodes,
                false,
                0.0,
                200,
                vec![m],
                clock.clone(),
            );
            handles.push(handle);
            joins.push(join);
        }

        let latency = LatencyModel::new(2.0, 0.5, 50);
        let mut fabric: NetworkFabric<bool> =
            NetworkFabric::new(handles, clock, latency, 0.0, 0.0, 1);
        fabric.set_faulty_count(0);

        let report = fabric.start_round_and_collect(true).await;
        black_box(report.results_by_node.len());

        fabric.shutdown();
        for join in joins {
            let _ = join.await;
        }
    });
}

fn bench_recursion_depth(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("om_recursion_depth");
    for m in [0usize, 1, 2, 3] {
        group.bench_with_input(BenchmarkId::from_parameter(m), &m, |b, &m| {
            b.iter(|| run_one_round(&rt, 4 * (m + 1), m));
        });
    }
    group.finish();
}

fn bench_fabric_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fabric_node_count");
    for n in [4usize, 8, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| run_one_round(&rt, n, 1));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_recursion_depth, bench_fabric_scaling);
criterion_main!(benches);
