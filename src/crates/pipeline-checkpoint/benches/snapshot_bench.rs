use criterion::{criterion_group, criterion_main, Criterion};
use pipeline_checkpoint::{AgentSnapshot, PortSnapshot, SchedulerSnapshot};

fn build_snapshot(agent_count: usize) -> SchedulerSnapshot {
    let mut snapshot = SchedulerSnapshot::new();
    for i in 0..agent_count {
        let mut agent = AgentSnapshot::default();
        agent.ports.insert(
            "input_port".to_string(),
            PortSnapshot {
                queue: Vec::new(),
                unconnected_outputs: Vec::new(),
            },
        );
        snapshot.agents.insert(format!("agent-{i}"), agent);
    }
    snapshot
}

fn bench_encode(c: &mut Criterion) {
    let snapshot = build_snapshot(100);
    c.bench_function("encode_scheduler_snapshot_100_agents", |b| {
        b.iter(|| serde_json::to_vec(&snapshot).unwrap())
    });
}

fn bench_decode(c: &mut Criterion) {
    let snapshot = build_snapshot(100);
    let bytes = serde_json::to_vec(&snapshot).unwrap();
    c.bench_function("decode_scheduler_snapshot_100_agents", |b| {
        b.iter(|| serde_json::from_slice::<SchedulerSnapshot>(&bytes).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
