//! Consensus merge throughput for growing finding counts.

use conclave_core::{AgentResponse, Finding, Severity};
use conclave_orchestrator::{ConsensusBuilder, SourcedResponse};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn responses(findings_per_agent: usize) -> Vec<SourcedResponse> {
    ["architect:m", "developer:m", "reviewer:m"]
        .iter()
        .enumerate()
        .map(|(agent, source)| {
            let findings = (0..findings_per_agent)
                .map(|i| {
                    // every other finding is shared across agents by id
                    let id = if i % 2 == 0 {
                        format!("shared-{i}")
                    } else {
                        format!("{agent}-{i}")
                    };
                    Finding::new(
                        id,
                        "quality",
                        Severity::Low,
                        format!("Function number {i} lacks documentation"),
                        0.5 + (agent as f64) * 0.1,
                    )
                    .with_location(format!("src/lib.rs:{i}"))
                })
                .collect();
            SourcedResponse::new(
                *source,
                AgentResponse {
                    findings,
                    ..Default::default()
                },
            )
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let builder = ConsensusBuilder::new();
    let mut group = c.benchmark_group("consensus_build");
    for size in [10usize, 50, 200] {
        let input = responses(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| builder.build(black_box(input)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build);
criterion_main!(benches);
