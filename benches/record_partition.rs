//! CPU-side benchmarks for the frame hot path.
//!
//! Covers the object-partitioning math used to slice scenes across worker
//! threads, the per-object uniform matrix updates, and the worker pool's
//! dispatch/wait barrier. None of these need a Vulkan driver.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use embervk::WorkerPool;
use glam::{Mat4, Vec3};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Benchmark the per-frame scene partition: share per thread plus the
/// contiguous range handed to each thread.
fn scene_partitioning(c: &mut Criterion) {
    let mut group = c.benchmark_group("scene_partitioning");

    let thread_count = 8usize;

    for count in [10usize, 100, 1000, 10_000] {
        group.bench_with_input(BenchmarkId::new("partition", count), &count, |b, &total| {
            b.iter(|| {
                let per_thread = if total == 0 {
                    0
                } else {
                    (total / thread_count).clamp(1, total)
                };

                let mut covered = 0usize;
                for thread_index in 0..thread_count {
                    if total > 0 && total <= thread_index {
                        break;
                    }
                    let start = thread_index * per_thread;
                    let end = (start + per_thread).min(total);
                    covered += end - start;
                }
                covered
            })
        });
    }

    group.finish();
}

/// Benchmark the uniform update done once per object per frame.
fn uniform_matrix_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("uniform_updates");

    let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(45.0_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);

    group.bench_function("single_object", |b| {
        let model = Mat4::from_rotation_y(0.7);
        b.iter(|| (model, view, projection))
    });

    for count in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("batch", count), &count, |b, &n| {
            let models: Vec<Mat4> = (0..n)
                .map(|i| Mat4::from_rotation_y(i as f32 * 0.01))
                .collect();
            b.iter(|| {
                let mut acc = Mat4::IDENTITY;
                for model in &models {
                    acc = projection * view * *model;
                }
                acc
            })
        });
    }

    group.finish();
}

/// Benchmark the worker pool fan-out and completion barrier that bracket
/// every parallel recording pass.
fn worker_pool_barrier(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_pool");

    let pool = WorkerPool::new(
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1),
    );

    for tasks in [8usize, 64, 256] {
        group.bench_with_input(
            BenchmarkId::new("dispatch_wait", tasks),
            &tasks,
            |b, &n| {
                let counter = Arc::new(AtomicUsize::new(0));
                b.iter(|| {
                    for _ in 0..n {
                        let counter = Arc::clone(&counter);
                        pool.execute(move || {
                            counter.fetch_add(1, Ordering::Relaxed);
                        });
                    }
                    pool.wait();
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    scene_partitioning,
    uniform_matrix_updates,
    worker_pool_barrier
);
criterion_main!(benches);
