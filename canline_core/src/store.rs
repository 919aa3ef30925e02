//! Data-access contracts.
//!
//! Implemented by `canline_store` over SQLite and by `mocks::MemStore` for
//! tests. Every method is a complete unit of work: implementations commit or
//! roll back within the call, and no handle is shared across threads.

use crate::error::Result;
use crate::model::{AlarmOutcome, Cycle, DriftDirection, Recipe, SpcReport, SpcStateKind};

/// One record per fill attempt, keyed by (`sku`, `seq`).
pub trait CycleLedger {
    /// Create the cycle on "can arrived", or refresh the target on replay.
    /// `valve_ms` is the placeholder duration (usually 0 until the controller
    /// has run).
    fn upsert_on_arrival(&mut self, sku: &str, seq: i64, target_ml: f64, valve_ms: f64)
    -> Result<Cycle>;

    /// Record the measured fill. Creates the row if the arrival never made it;
    /// recomputes `error_ml` whenever both actual and a resolved (> 0) target
    /// are known.
    fn upsert_on_result(
        &mut self,
        sku: &str,
        seq: i64,
        actual_ml: f64,
        valve_ms: f64,
        target_ml: Option<f64>,
    ) -> Result<Cycle>;

    /// Overwrite the valve duration after the controller has produced one.
    fn set_valve_ms(&mut self, cycle_id: i64, valve_ms: f64) -> Result<()>;

    /// Write back the derived quality label on SPC recompute.
    fn set_quality_state(&mut self, cycle_id: i64, state: SpcStateKind) -> Result<()>;

    /// Up to `limit` most recent cycles, oldest → newest.
    fn recent_cycles(&mut self, sku: &str, limit: usize) -> Result<Vec<Cycle>>;

    /// Up to `limit` most recent known errors, oldest → newest.
    fn recent_errors(&mut self, sku: &str, limit: usize) -> Result<Vec<f64>>;

    fn last_cycle(&mut self, sku: &str) -> Result<Option<Cycle>>;

    /// Highest recorded sequence number, 0 if none.
    fn last_seq(&mut self, sku: &str) -> Result<i64>;
}

/// Read-only recipe lookup; recipe CRUD is owned by the admin surface.
pub trait RecipeSource {
    fn recipe_for(&mut self, sku: &str) -> Result<Option<Recipe>>;
}

/// SPC snapshots and deduplicated alarms.
pub trait QualityStore {
    /// At most one SpcState row per (`sku`, `ref_cycle_id`); recomputation
    /// updates in place. Returns the row id.
    fn upsert_spc_state(&mut self, sku: &str, report: &SpcReport, ref_cycle_id: i64)
    -> Result<i64>;

    /// At most one Alarm per (`sku`, `level`, `drift`, `cycle_id`). A repeat
    /// detection re-links `spc_state_id` on the existing row.
    fn upsert_alarm(
        &mut self,
        sku: &str,
        level: SpcStateKind,
        drift: Option<DriftDirection>,
        message: &str,
        cycle_id: i64,
        spc_state_id: i64,
    ) -> Result<AlarmOutcome>;
}

/// Best-effort current-product pointer, last-write-wins.
pub trait LineStateStore {
    fn set_current_sku(&mut self, line_id: &str, sku: &str) -> Result<()>;
    fn current_sku(&mut self, line_id: &str) -> Result<Option<String>>;
}

/// Everything ingestion needs from one persistence handle.
pub trait Store: CycleLedger + RecipeSource + QualityStore + LineStateStore {}

impl<T: CycleLedger + RecipeSource + QualityStore + LineStateStore> Store for T {}
