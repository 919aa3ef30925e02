use canline_core::control::{ControlCfg, ValveController};
use canline_core::model::{Cycle, Recipe};
use canline_core::spc::{self, SpcCfg};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

// Synthetic fill history: slow sinusoidal drift plus white noise, the shape
// a worn valve actually produces.
fn synth_history(n: usize, noise_ml: f64, seed: u32) -> Vec<Cycle> {
    // tiny PRNG
    let mut state = seed.max(1);
    let mut next_f64 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    };
    (0..n)
        .map(|i| {
            let t = i as f64 / 40.0;
            let drift = 2.0 * t.sin();
            let noise = (next_f64() * 2.0 - 1.0) * noise_ml;
            let error = drift + noise;
            Cycle {
                id: i as i64 + 1,
                seq: i as i64 + 1,
                sku: "CIDER_500".to_string(),
                target_ml: 500.0,
                actual_ml: Some(500.0 + error),
                valve_ms: 1480.0,
                error_ml: Some(error),
                quality_state: None,
                created_at: i as i64,
            }
        })
        .collect()
}

pub fn bench_controller(c: &mut Criterion) {
    let mut g = c.benchmark_group("valve_controller");
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
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }

    let recipe = Recipe {
        sku: "CIDER_500".to_string(),
        name: "Dry Cider 500ml".to_string(),
        target_ml: 500.0,
        base_valve_ms: 1500.0,
        fixed_dose: false,
        active: true,
    };
    let controller = ValveController::new(ControlCfg::default());

    for &n in &[10usize, 50, 500] {
        let history = synth_history(n, 1.5, 0xC0FFEE);
        g.bench_function(format!("next_valve_ms_history_{n}"), |b| {
            b.iter_batched(
                || history.clone(),
                |h| {
                    let ms = controller.next_valve_ms(black_box(&recipe), black_box(&h), None);
                    black_box(ms);
                },
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

pub fn bench_spc(c: &mut Criterion) {
    let mut g = c.benchmark_group("spc_evaluate");
    g.sample_size(50);

    let cfg = SpcCfg::default();
    for &n in &[20usize, 100, 1000] {
        let errors: Vec<f64> = synth_history(n, 1.5, 0xBEEF)
            .iter()
            .filter_map(|cy| cy.error_ml)
            .collect();
        g.bench_function(format!("evaluate_{n}"), |b| {
            b.iter(|| {
                let report = spc::evaluate(black_box(&errors), black_box(&cfg));
                black_box(report);
            })
        });
    }
    g.finish();
}

criterion_group!(controller, bench_controller, bench_spc);
criterion_main!(controller);
