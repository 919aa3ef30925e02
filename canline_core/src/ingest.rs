//! Telemetry ingestion: the two inbound message classes and their outbound
//! effects.
//!
//! Handlers run on the bus consumer thread. Each message is one unit of work:
//! a malformed payload is logged and dropped, a failing persistence step
//! rolls back only itself, and nothing here ever terminates the consumption
//! loop. Duplicate and out-of-order delivery is absorbed by the ledger's
//! upsert-by-(sku, seq).

use std::sync::Arc;

use canline_traits::{BusPublisher, Clock};
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use crate::control::ValveController;
use crate::error::{IngestError, Result};
use crate::payload;
use crate::quality;
use crate::relay::{EventRelay, StatusEvent};
use crate::spc::SpcCfg;
use crate::store::Store;

pub const TOPIC_ARRIVAL: &str = "line/event/arrival";
pub const TOPIC_FILL_RESULT: &str = "line/event/fill_result";
pub const TOPIC_CMD_FILL: &str = "line/cmd/fill";
pub const TOPIC_CMD_CORR: &str = "line/cmd/corr";

/// How many recent cycles the controller sees per arrival.
const CONTROL_HISTORY: usize = 50;

pub struct Ingestor<S, P> {
    store: S,
    publisher: P,
    relay: Arc<EventRelay>,
    controller: ValveController,
    spc_cfg: SpcCfg,
    clock: Arc<dyn Clock + Send + Sync>,
    line_id: String,
    fill_mode: String,
}

impl<S: Store, P: BusPublisher> Ingestor<S, P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: S,
        publisher: P,
        relay: Arc<EventRelay>,
        controller: ValveController,
        spc_cfg: SpcCfg,
        clock: Arc<dyn Clock + Send + Sync>,
        line_id: impl Into<String>,
        fill_mode: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            relay,
            controller,
            spc_cfg,
            clock,
            line_id: line_id.into(),
            fill_mode: fill_mode.into(),
        }
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Entry point for the bus consumer thread. Never panics, never returns
    /// an error: per-message failures are logged and the message is dropped.
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        match topic {
            TOPIC_ARRIVAL => {
                if let Err(e) = self.handle_arrival(payload) {
                    warn!(topic, error = %e, "arrival event dropped");
                }
            }
            TOPIC_FILL_RESULT => {
                if let Err(e) = self.handle_result(payload) {
                    warn!(topic, error = %e, "fill-result event dropped");
                }
            }
            other => trace!(topic = other, "unrouted topic ignored"),
        }
    }

    /// "Can arrived": create the cycle, compute the valve duration, command
    /// the fill, and push a live-status event.
    fn handle_arrival(&mut self, raw: &[u8]) -> Result<()> {
        let v: Value = serde_json::from_slice(raw)
            .map_err(|e| IngestError::Malformed(e.to_string()))?;
        let sku = payload::text(&v, &["sku", "sku_id", "productId"])
            .ok_or(IngestError::MissingField("sku"))?;
        let seq = payload::integer(&v, &["seq", "cycle_no"])
            .ok_or(IngestError::MissingField("seq"))?;

        let target_ml = self.resolve_target(&v, &sku);

        // Current-product pointer first, so the UI follows the line even when
        // the cycle write below fails. Best-effort only.
        if let Err(e) = self.store.set_current_sku(&self.line_id, &sku) {
            warn!(sku, error = %e, "current-product update failed; continuing");
        }

        let cycle = self.store.upsert_on_arrival(&sku, seq, target_ml, 0.0)?;
        debug!(sku, seq, target_ml, cycle_id = cycle.id, "arrival persisted");

        let valve_ms = self.compute_and_store_duration(&sku, seq, cycle.id);

        if valve_ms > 0.0 {
            self.publish_fill_command(&sku, seq, target_ml, valve_ms);
        } else {
            info!(sku, seq, "no usable duration; fill command skipped");
        }

        self.relay.emit(StatusEvent::new(
            "arrival",
            self.clock.epoch_secs(),
            json!({
                "seq": seq,
                "sku_id": sku,
                "target_ml": target_ml,
                "valve_ms": valve_ms,
            }),
        ));
        Ok(())
    }

    /// "Fill completed": record the measurement, push a live-status event,
    /// and re-evaluate the SPC monitor for the product.
    fn handle_result(&mut self, raw: &[u8]) -> Result<()> {
        let v: Value = serde_json::from_slice(raw)
            .map_err(|e| IngestError::Malformed(e.to_string()))?;
        let sku = payload::text(&v, &["sku", "sku_id", "productId"])
            .ok_or(IngestError::MissingField("sku"))?;
        let seq = payload::integer(&v, &["seq", "cycle_no"])
            .ok_or(IngestError::MissingField("seq"))?;
        let actual_ml = payload::number(&v, &["actual_ml", "measured_value"])
            .ok_or(IngestError::MissingField("actual_ml"))?;
        let valve_ms = payload::number(&v, &["valve_ms", "valve_time"])
            .ok_or(IngestError::MissingField("valve_ms"))?;
        let target_ml = payload::number(&v, &["target_ml", "target_amount"]).filter(|t| *t > 0.0);
        let status = payload::text(&v, &["status"]).unwrap_or_else(|| "DONE".to_string());

        if let Err(e) = self.store.set_current_sku(&self.line_id, &sku) {
            warn!(sku, error = %e, "current-product update failed; continuing");
        }

        let cycle = self
            .store
            .upsert_on_result(&sku, seq, actual_ml, valve_ms, target_ml)?;
        debug!(
            sku,
            seq,
            actual_ml,
            error_ml = ?cycle.error_ml,
            cycle_id = cycle.id,
            "fill result persisted"
        );

        self.relay.emit(StatusEvent::new(
            "fill_result",
            self.clock.epoch_secs(),
            json!({
                "seq": cycle.seq,
                "sku_id": cycle.sku,
                "target_ml": cycle.target_ml,
                "actual_ml": cycle.actual_ml,
                "valve_ms": cycle.valve_ms,
                "error_ml": cycle.error_ml,
                "status": status,
            }),
        ));

        // Quality monitoring is isolated from the cycle write: a failing
        // recompute leaves the persisted result intact.
        if let Err(e) = quality::recompute(&mut self.store, Some(&self.publisher), &sku, &self.spc_cfg)
        {
            warn!(sku, error = %e, "SPC recompute failed");
        }
        Ok(())
    }

    /// Operator-initiated correction command for a product.
    pub fn send_corr(&mut self, sku: &str) {
        let payload = json!({ "sku": sku, "cmd": "CORR" });
        if let Err(e) = self
            .publisher
            .publish(TOPIC_CMD_CORR, payload.to_string().as_bytes())
        {
            warn!(sku, error = %e, "corr command publish failed");
            return;
        }
        self.relay.emit(StatusEvent::new(
            "corr_issued",
            self.clock.epoch_secs(),
            json!({ "sku": sku }),
        ));
    }

    /// Target volume resolution order: explicit payload value, last persisted
    /// cycle target, recipe target, SKU-name suffix heuristic. 0.0 marks
    /// "unresolved" and downstream consumers treat it as absent.
    fn resolve_target(&mut self, v: &Value, sku: &str) -> f64 {
        if let Some(t) = payload::number(v, &["target_ml", "target_amount"]).filter(|t| *t > 0.0) {
            return t;
        }
        match self.store.last_cycle(sku) {
            Ok(Some(last)) if last.target_ml > 0.0 => return last.target_ml,
            Ok(_) => {}
            Err(e) => warn!(sku, error = %e, "target fallback read failed"),
        }
        match self.store.recipe_for(sku) {
            Ok(Some(recipe)) if recipe.target_ml > 0.0 => return recipe.target_ml,
            Ok(_) => {}
            Err(e) => warn!(sku, error = %e, "recipe fallback read failed"),
        }
        payload::infer_target_from_sku(sku)
    }

    /// Run the controller and persist the computed duration. Any failure
    /// leaves the placeholder in place and returns 0.0 so the fill command
    /// is skipped rather than the arrival aborted.
    fn compute_and_store_duration(&mut self, sku: &str, seq: i64, cycle_id: i64) -> f64 {
        let recipe = match self.store.recipe_for(sku) {
            Ok(Some(r)) => r,
            Ok(None) => {
                info!(sku, "no recipe; valve duration left at placeholder");
                return 0.0;
            }
            Err(e) => {
                warn!(sku, error = %e, "recipe lookup failed; placeholder kept");
                return 0.0;
            }
        };
        let mut recent = match self.store.recent_cycles(sku, CONTROL_HISTORY) {
            Ok(c) => c,
            Err(e) => {
                warn!(sku, error = %e, "history read failed; placeholder kept");
                return 0.0;
            }
        };
        // Only prior cycles feed the correction; the row persisted for this
        // arrival is still a placeholder.
        recent.retain(|c| c.seq != seq);
        let valve_ms = self.controller.next_valve_ms(&recipe, &recent, None);
        if let Err(e) = self.store.set_valve_ms(cycle_id, valve_ms) {
            warn!(sku, cycle_id, error = %e, "duration write failed; placeholder kept");
            return 0.0;
        }
        valve_ms
    }

    fn publish_fill_command(&mut self, sku: &str, seq: i64, target_ml: f64, valve_ms: f64) {
        let cmd = json!({
            "sku": sku,
            "seq": seq,
            "target_ml": target_ml,
            "valve_ms": valve_ms,
            "mode": self.fill_mode,
        });
        match self
            .publisher
            .publish(TOPIC_CMD_FILL, cmd.to_string().as_bytes())
        {
            Ok(()) => {
                self.relay.emit(StatusEvent::new(
                    "fill_requested",
                    self.clock.epoch_secs(),
                    json!({
                        "seq": seq,
                        "sku_id": sku,
                        "target_ml": target_ml,
                        "valve_ms": valve_ms,
                    }),
                ));
            }
            Err(e) => warn!(sku, seq, error = %e, "fill command publish failed"),
        }
    }
}
