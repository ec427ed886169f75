use std::time::{Duration, Instant};

use cegs_core::config::{BleedCfg, FusionCfg};
use cegs_core::fusion::{FusionInputs, PressureFusion, fuse};
use cegs_core::regulator::{BleedRegulator, ValveView};
use cegs_traits::Motion;
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

// Pump-down trace: exponential decay from rough vacuum with a little xorshift noise
fn pumpdown(n: usize, seed: u32) -> Vec<(f64, f64)> {
    let mut state = seed.max(1);
    let mut noise = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        f64::from(x) / f64::from(u32::MAX) - 0.5
    };
    (0..n)
        .map(|i| {
            let p = 1.0 * (-(i as f64) / 2_000.0).exp();
            let hp = p.max(1e-3) * 0.02f64.mul_add(noise(), 1.0);
            let ig = p * 0.02f64.mul_add(noise(), 1.0);
            (ig, hp)
        })
        .collect()
}

fn group_sizes(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    // BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p cegs_core --bench control_paths
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(Duration::from_millis(ms_u64));
    }
}

pub fn bench_fusion(c: &mut Criterion) {
    let mut g = c.benchmark_group("fusion");
    group_sizes(&mut g);
    let trace = pumpdown(20_000, 0xC0FFEE);
    let cfg = FusionCfg::default();

    g.bench_function("fuse", |b| {
        b.iter(|| {
            for &(ig, hp) in &trace {
                black_box(fuse(black_box(ig), black_box(hp), true, cfg.max_ig, cfg.min_hp));
            }
        });
    });

    g.bench_function("update", |b| {
        b.iter_batched(
            || PressureFusion::new(cfg.clone(), Instant::now(), true),
            |mut f| {
                let t0 = Instant::now();
                for (i, &(ig, hp)) in trace.iter().enumerate() {
                    let inputs = FusionInputs {
                        p_ig: ig,
                        p_hp: hp,
                        foreline: 0.01,
                        foreline_rate: 0.0,
                        isolation_open: true,
                        gauge_on: true,
                    };
                    let now = t0 + Duration::from_millis(50 * i as u64);
                    black_box(f.update(now, black_box(&inputs)));
                }
            },
            BatchSize::SmallInput,
        );
    });
    g.finish();
}

pub fn bench_bleed_step(c: &mut Criterion) {
    let mut g = c.benchmark_group("bleed");
    group_sizes(&mut g);
    let view = ValveView {
        is_open: false,
        is_closed: false,
        last_motion: Motion::Opening,
    };
    g.bench_function("step", |b| {
        b.iter_batched(
            || BleedRegulator::new(BleedCfg::default(), 1.0, Instant::now()),
            |mut reg| {
                let t0 = Instant::now();
                for i in 0..1_000u64 {
                    let measured = 0.2f64.mul_add(((i as f64) / 40.0).sin(), 1.0);
                    let now = t0 + Duration::from_secs(i);
                    black_box(reg.step(now, measured, 0.0, view, false));
                }
            },
            BatchSize::SmallInput,
        );
    });
    g.finish();
}

criterion_group!(control_paths, bench_fusion, bench_bleed_step);
criterion_main!(control_paths);
