//! Benchmarks for the brute-force grid solver.
//!
//! Run with: cargo bench --package gridsense-tracking

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use gridsense_tracking::{BruteForceSolver, GridSpec, Vec3, SENSOR_POSITIONS};

/// Synthetic pad voltages for a charge at `pos`.
fn field_at(pos: Vec3, q: f64) -> [f32; 16] {
    let mut v = [0.0_f32; 16];
    for (vj, sensor) in v.iter_mut().zip(&SENSOR_POSITIONS) {
        *vj = (q / pos.distance(*sensor)) as f32;
    }
    v
}

fn bench_solver_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("brute_force");

    for &step in &[0.02, 0.01, 0.005] {
        let mut solver = BruteForceSolver::new();
        solver.set_grid(GridSpec {
            step,
            ..GridSpec::default()
        });

        let a = field_at(Vec3::new(0.02, -0.01, 0.03), 1.0);
        let b = field_at(Vec3::new(0.01, -0.01, 0.03), 1.3);

        group.bench_function(format!("update_step_{step}"), |bench| {
            bench.iter(|| {
                solver.reset();
                black_box(solver.update(black_box(&a)));
                black_box(solver.update(black_box(&b)));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_solver_update);
criterion_main!(benches);
