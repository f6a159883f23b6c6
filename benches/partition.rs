use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use taskdist::mpi::SelfGroup;
use taskdist::{distribute_tasks, task_ranges, TaskDistributor};

fn partition(c: &mut Criterion) {
    c.bench_function("distribute 1M tasks over 4096 ranks", |b| {
        b.iter(|| task_ranges(&distribute_tasks(black_box(1_000_003), black_box(4096))))
    });
}

fn gather(c: &mut Criterion) {
    let distributor = TaskDistributor::new(4096, &SelfGroup).unwrap();
    let local = Array2::<f64>::ones((4096, 16));
    c.bench_function("single rank gather 4096x16", |b| {
        b.iter(|| distributor.allgather(black_box(&local)).unwrap())
    });
}

criterion_group!(benches, partition, gather);
criterion_main!(benches);
