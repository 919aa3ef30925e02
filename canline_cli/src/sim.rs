//! Built-in line simulator.
//!
//! Plays the role of the PLC bridge: announces can arrivals, executes the
//! fill commands the server publishes back, and reports measured volumes
//! with seeded Gaussian noise plus an optional constant bias. Deterministic
//! for a given seed, so runs are reproducible end to end.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use canline_bus::InProcBroker;
use canline_config::SimulatorCfg;
use canline_core::ingest::{TOPIC_ARRIVAL, TOPIC_CMD_FILL, TOPIC_FILL_RESULT};
use canline_traits::BusPublisher;
use serde_json::json;
use tracing::{debug, info, warn};

/// How long one can waits for its fill command before moving on.
const CMD_WAIT: Duration = Duration::from_secs(2);

// Deterministic tiny PRNG (xorshift32)
struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        // [0, 1)
        f64::from(self.next_u32()) / (f64::from(u32::MAX) + 1.0)
    }
}

// Box-Muller transform for standard normal N(0,1)
struct Gauss {
    rng: XorShift32,
    spare: Option<f64>,
}

impl Gauss {
    fn new(seed: u32) -> Self {
        Self {
            rng: XorShift32::new(seed),
            spare: None,
        }
    }

    fn next_std(&mut self) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        // Avoid log(0)
        let u1 = self.rng.next_f64().clamp(f64::EPSILON, 1.0 - f64::EPSILON);
        let u2 = self.rng.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let th = 2.0 * std::f64::consts::PI * u2;
        let z0 = r * th.cos();
        let z1 = r * th.sin();
        self.spare = Some(z1);
        z0
    }

    fn next_with_sigma(&mut self, sigma: f64) -> f64 {
        self.next_std() * sigma
    }
}

/// Spawn the simulator thread. Cycles through `skus` round-robin until the
/// configured can count is reached (0 = until `shutdown` is set).
pub fn spawn(
    broker: InProcBroker,
    cfg: SimulatorCfg,
    skus: Vec<String>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        // Subscribed before the first arrival so no command is missed.
        let commands = broker.subscribe(TOPIC_CMD_FILL);
        let mut gauss = Gauss::new(cfg.seed);
        let mut seqs = vec![0_i64; skus.len()];
        let interval = Duration::from_millis(cfg.can_interval_ms);

        let mut can = 0_u64;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!(cans = can, "simulator interrupted");
                break;
            }
            if cfg.cans > 0 && can >= cfg.cans {
                info!(cans = can, "simulator finished");
                break;
            }
            can += 1;

            let slot = (can as usize - 1) % skus.len();
            let sku = &skus[slot];
            seqs[slot] += 1;
            let seq = seqs[slot];

            let arrival = json!({ "sku": sku, "seq": seq });
            if let Err(e) = broker.publish(TOPIC_ARRIVAL, arrival.to_string().as_bytes()) {
                warn!(sku, seq, error = %e, "arrival publish failed");
                break;
            }

            match await_command(&commands, sku, seq) {
                Some(valve_ms) => {
                    let actual_ml = valve_ms * cfg.flow_ml_per_ms
                        + cfg.bias_ml
                        + gauss.next_with_sigma(cfg.noise_sigma_ml);
                    let result = json!({
                        "sku": sku,
                        "seq": seq,
                        "actual_ml": actual_ml,
                        "valve_ms": valve_ms,
                        "status": "DONE",
                    });
                    if let Err(e) = broker.publish(TOPIC_FILL_RESULT, result.to_string().as_bytes())
                    {
                        warn!(sku, seq, error = %e, "result publish failed");
                        break;
                    }
                }
                None => debug!(sku, seq, "no fill command; can passed through unfilled"),
            }

            if !interval.is_zero() {
                std::thread::sleep(interval);
            }
        }
    })
}

/// Wait for the fill command addressed to (`sku`, `seq`); commands for other
/// cans are discarded, a timeout means the server chose not to fill.
fn await_command(
    commands: &crossbeam_channel::Receiver<canline_bus::BusMessage>,
    sku: &str,
    seq: i64,
) -> Option<f64> {
    let deadline = std::time::Instant::now() + CMD_WAIT;
    loop {
        let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
        let msg = commands.recv_timeout(remaining).ok()?;
        let v: serde_json::Value = match serde_json::from_slice(&msg.payload) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if v.get("sku").and_then(|s| s.as_str()) != Some(sku)
            || v.get("seq").and_then(serde_json::Value::as_i64) != Some(seq)
        {
            continue;
        }
        return v
            .get("valve_ms")
            .and_then(serde_json::Value::as_f64)
            .filter(|ms| *ms > 0.0);
    }
}
