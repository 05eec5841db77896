use criterion::{criterion_group, criterion_main, Criterion};
use pipeline_core::{Agent, AgentRuntime, IntoRunOutput, PipelineError, RunOutput, Scheduler, SchedulerConfig, TypedOutputPort};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping(u64);

struct Bouncer {
    id: Uuid,
}

impl Agent for Bouncer {
    type Input = Ping;

    fn uuid(&self) -> Uuid {
        self.id
    }

    fn run(&mut self, input: Ping, _correlation_id: Option<&str>) -> Result<RunOutput, PipelineError> {
        Ok(Ping(input.0 + 1).into_run_output())
    }
}

fn bench_round_robin_throughput(c: &mut Criterion) {
    c.bench_function("scheduler_step_1000_fed_messages", |b| {
        b.iter(|| {
            let mut runtime = AgentRuntime::new(Bouncer { id: Uuid::new_v4() });
            runtime.add_output_port(Box::new(TypedOutputPort::<Ping>::new("out")));
            for i in 0..1000u64 {
                runtime.feed(Ping(i), None).unwrap();
            }

            let mut scheduler = Scheduler::new(SchedulerConfig::new());
            scheduler.add_agent(Box::new(runtime));
            scheduler.step_all(false, false).unwrap();
        })
    });
}

criterion_group!(benches, bench_round_robin_throughput);
criterion_main!(benches);
