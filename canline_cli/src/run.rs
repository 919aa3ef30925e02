//! Subcommand execution: server assembly, SPC report, correction command,
//! and self-check.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::{Result, WrapErr};
use serde_json::json;
use tracing::{info, warn};

use canline_bus::{BusConsumer, InProcBroker};
use canline_config::Config;
use canline_core::ingest::{Ingestor, TOPIC_ARRIVAL, TOPIC_CMD_CORR, TOPIC_FILL_RESULT};
use canline_core::model::{DriftDirection, Recipe};
use canline_core::relay::EventRelay;
use canline_core::{ControlCfg, SpcCfg, ValveController, spc};
use canline_store::SqliteStore;
use canline_traits::{MonotonicClock, Observer};

/// Prints every status event as one JSON line; the terminal equivalent of a
/// live-status subscriber.
struct StdoutObserver;

impl Observer for StdoutObserver {
    fn deliver(&mut self, json: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        use std::io::Write;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{json}")?;
        out.flush()?;
        Ok(())
    }
}

fn open_store(cfg: &Config) -> Result<SqliteStore> {
    if cfg.database.path == ":memory:" {
        SqliteStore::open_in_memory()
    } else {
        SqliteStore::open(&cfg.database.path)
    }
}

fn seed_recipes(store: &mut SqliteStore, cfg: &Config) -> Result<()> {
    for recipe in &cfg.recipes {
        store
            .put_recipe(&Recipe::from(recipe))
            .wrap_err_with(|| format!("seeding recipe '{}'", recipe.sku))?;
    }
    info!(count = cfg.recipes.len(), "recipes seeded");
    Ok(())
}

fn build_ingestor(
    store: SqliteStore,
    broker: InProcBroker,
    relay: Arc<EventRelay>,
    cfg: &Config,
) -> Ingestor<SqliteStore, InProcBroker> {
    Ingestor::new(
        store,
        broker,
        relay,
        ValveController::new(ControlCfg::from(&cfg.control)),
        SpcCfg::from(&cfg.spc),
        Arc::new(MonotonicClock::new()),
        cfg.line.line_id.clone(),
        cfg.line.fill_mode.clone(),
    )
}

/// Run the control server with the built-in simulator standing in for the
/// line hardware.
pub fn run_line(cfg: &Config, cans: Option<u64>, seed: Option<u32>) -> Result<()> {
    if cfg.recipes.is_empty() {
        eyre::bail!("run needs at least one [[recipe]] in the config");
    }

    let mut store = open_store(cfg)?;
    seed_recipes(&mut store, cfg)?;

    let relay = Arc::new(EventRelay::new());
    let broadcaster = relay.start();
    relay.attach(Box::new(StdoutObserver));
    let broadcast_thread = std::thread::spawn(move || broadcaster.run());

    let broker = InProcBroker::new();
    let inbound = broker.subscribe_many(&[TOPIC_ARRIVAL, TOPIC_FILL_RESULT]);
    let mut ingestor = build_ingestor(store, broker.clone(), relay.clone(), cfg);
    let consumer = BusConsumer::spawn(inbound, move |topic, payload| {
        ingestor.handle_message(topic, payload);
    });

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .wrap_err("installing Ctrl-C handler")?;
    }

    let mut sim_cfg = cfg.simulator.clone();
    if let Some(cans) = cans {
        sim_cfg.cans = cans;
    }
    if let Some(seed) = seed {
        sim_cfg.seed = seed;
    }
    let skus: Vec<String> = cfg.recipes.iter().map(|r| r.sku.clone()).collect();
    info!(
        cans = sim_cfg.cans,
        seed = sim_cfg.seed,
        line = %cfg.line.line_id,
        "line run starting"
    );

    let simulator = crate::sim::spawn(broker, sim_cfg, skus, shutdown);
    if simulator.join().is_err() {
        warn!("simulator thread panicked");
    }

    // Consumer first so the last results land before the relay closes.
    drop(consumer);
    relay.stop();
    if broadcast_thread.join().is_err() {
        warn!("broadcast thread panicked");
    }
    info!("line run complete");
    Ok(())
}

/// Evaluate and print the SPC report for one product from persisted errors.
pub fn print_spc(cfg: &Config, sku: &str) -> Result<()> {
    use canline_core::store::CycleLedger;

    let mut store = open_store(cfg)?;
    let spc_cfg = spc::SpcCfg::from(&cfg.spc);
    let errors = store.recent_errors(sku, spc_cfg.window)?;
    let report = spc::evaluate(&errors, &spc_cfg);
    let out = json!({
        "sku": sku,
        "state": report.state.as_str(),
        "drift": report.drift.map(DriftDirection::as_str),
        "mean": report.mean,
        "stddev": report.stddev,
        "cusum_pos": report.cusum_pos,
        "cusum_neg": report.cusum_neg,
        "samples": report.samples,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

/// Publish a manual correction command and echo it as it leaves the broker.
pub fn send_corr(cfg: &Config, sku: &str) -> Result<()> {
    let store = open_store(cfg)?;
    let broker = InProcBroker::new();
    let outbound = broker.subscribe(TOPIC_CMD_CORR);

    let relay = Arc::new(EventRelay::new());
    let broadcaster = relay.start();
    relay.attach(Box::new(StdoutObserver));

    let mut ingestor = build_ingestor(store, broker, relay.clone(), cfg);
    ingestor.send_corr(sku);

    relay.stop();
    broadcaster.run();
    while let Ok(msg) = outbound.try_recv() {
        info!(topic = %msg.topic, payload = %String::from_utf8_lossy(&msg.payload), "command sent");
    }
    Ok(())
}

/// Exercise the two fallible subsystems without touching the configured
/// database file.
pub fn self_check() -> Result<()> {
    use canline_core::store::LineStateStore;
    use canline_traits::BusPublisher;

    let mut store = SqliteStore::open_in_memory()?;
    store.set_current_sku("selfcheck", "PING")?;
    if store.current_sku("selfcheck")?.as_deref() != Some("PING") {
        eyre::bail!("database round-trip failed");
    }

    let broker = InProcBroker::new();
    let rx = broker.subscribe("selfcheck");
    broker
        .publish("selfcheck", b"ping")
        .map_err(|e| eyre::eyre!("broker publish failed: {e}"))?;
    match rx.recv_timeout(std::time::Duration::from_secs(1)) {
        Ok(msg) if msg.payload == b"ping" => {}
        _ => eyre::bail!("broker round-trip failed"),
    }

    println!("self-check ok");
    Ok(())
}
