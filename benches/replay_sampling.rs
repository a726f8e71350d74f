//! Sampling throughput of the experience stores at a realistic fill level

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use metis::replay_buffer::{
    ExperienceStore, FifoReplayBuffer, PrioritizedConfig, PrioritizedReplayBuffer, SampleParams, SequentialConfig,
    SequentialReplayBuffer,
};
use metis::types::{Action, Transition};
use ndarray::Array1;

const CAPACITY: usize = 100_000;
const STATE_DIM: usize = 8;

fn fill<S: ExperienceStore>(store: &mut S) {
    for i in 0..CAPACITY {
        let state = Array1::from_elem(STATE_DIM, i as f32);
        let next = Array1::from_elem(STATE_DIM, (i + 1) as f32);
        store.push(Transition::new(state, Action::Discrete(i % 4), 1.0, next, i % 200 == 199, false));
    }
}

fn bench_sampling(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample");
    let params = SampleParams::default();

    let mut fifo = FifoReplayBuffer::new(CAPACITY, 0);
    fill(&mut fifo);
    let mut prioritized = PrioritizedReplayBuffer::new(&PrioritizedConfig::default().capacity(CAPACITY)).unwrap();
    fill(&mut prioritized);
    let mut sequential =
        SequentialReplayBuffer::new(&SequentialConfig::default().capacity(CAPACITY).sequence_length(8)).unwrap();
    fill(&mut sequential);

    for batch_size in [32usize, 256] {
        group.bench_with_input(BenchmarkId::new("fifo", batch_size), &batch_size, |b, &n| {
            b.iter(|| black_box(fifo.sample(n, &params).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("prioritized", batch_size), &batch_size, |b, &n| {
            b.iter(|| black_box(prioritized.sample(n, &params).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("sequential", batch_size), &batch_size, |b, &n| {
            b.iter(|| black_box(sequential.sample(n, &params).unwrap()))
        });
    }
    group.finish();
}

fn bench_priority_update(c: &mut Criterion) {
    let mut store = PrioritizedReplayBuffer::new(&PrioritizedConfig::default().capacity(CAPACITY)).unwrap();
    fill(&mut store);
    let params = SampleParams::default();
    c.bench_function("prioritized sample+update 64", |b| {
        b.iter(|| {
            let batch = store.sample(64, &params).unwrap();
            let priorities: Vec<f32> = batch.indices().iter().map(|&i| (i % 17) as f32 * 0.1).collect();
            store.update_priorities(batch.indices(), &priorities).unwrap();
        })
    });
}

criterion_group!(benches, bench_sampling, bench_priority_update);
criterion_main!(benches);
