//! In-memory test doubles for the data-access contracts and the bus.
//!
//! `MemStore` mirrors the SQLite store's semantics closely enough that the
//! ingestion tests exercise the same invariants (upsert-by-(sku, seq), SPC
//! upsert-in-place, alarm dedup) without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use canline_traits::BusPublisher;

use crate::error::Result;
use crate::model::{AlarmOutcome, Cycle, DriftDirection, Recipe, SpcReport, SpcStateKind};
use crate::store::{CycleLedger, LineStateStore, QualityStore, RecipeSource};

#[derive(Debug, Clone, PartialEq)]
pub struct MemSpcState {
    pub id: i64,
    pub sku: String,
    pub ref_cycle_id: i64,
    pub report: SpcReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemAlarm {
    pub id: i64,
    pub sku: String,
    pub level: SpcStateKind,
    pub drift: Option<DriftDirection>,
    pub message: String,
    pub cycle_id: i64,
    pub spc_state_id: i64,
}

#[derive(Default)]
pub struct MemStore {
    pub cycles: Vec<Cycle>,
    pub recipes: HashMap<String, Recipe>,
    pub spc_states: Vec<MemSpcState>,
    pub alarms: Vec<MemAlarm>,
    pub line: HashMap<String, String>,
    next_id: i64,
    now: i64,
    /// When set, every store call fails; exercises the rollback paths.
    pub fail_all: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipe(recipe: Recipe) -> Self {
        let mut s = Self::default();
        s.recipes.insert(recipe.sku.clone(), recipe);
        s
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tick(&mut self) -> i64 {
        self.now += 1;
        self.now
    }

    fn check(&self) -> Result<()> {
        if self.fail_all {
            eyre::bail!("mem store failure injected");
        }
        Ok(())
    }

    fn find_mut(&mut self, sku: &str, seq: i64) -> Option<&mut Cycle> {
        self.cycles
            .iter_mut()
            .find(|c| c.sku == sku && c.seq == seq)
    }
}

fn recompute_error(cycle: &mut Cycle) {
    cycle.error_ml = match (cycle.actual_ml, cycle.target_ml) {
        (Some(actual), target) if target > 0.0 => Some(actual - target),
        _ => None,
    };
}

impl CycleLedger for MemStore {
    fn upsert_on_arrival(
        &mut self,
        sku: &str,
        seq: i64,
        target_ml: f64,
        valve_ms: f64,
    ) -> Result<Cycle> {
        self.check()?;
        if let Some(c) = self.find_mut(sku, seq) {
            c.target_ml = target_ml;
            recompute_error(c);
            return Ok(c.clone());
        }
        let cycle = Cycle {
            id: self.next_id(),
            seq,
            sku: sku.to_string(),
            target_ml,
            actual_ml: None,
            valve_ms,
            error_ml: None,
            quality_state: None,
            created_at: self.tick(),
        };
        self.cycles.push(cycle.clone());
        Ok(cycle)
    }

    fn upsert_on_result(
        &mut self,
        sku: &str,
        seq: i64,
        actual_ml: f64,
        valve_ms: f64,
        target_ml: Option<f64>,
    ) -> Result<Cycle> {
        self.check()?;
        if let Some(c) = self.find_mut(sku, seq) {
            c.actual_ml = Some(actual_ml);
            c.valve_ms = valve_ms;
            if let Some(t) = target_ml {
                c.target_ml = t;
            }
            recompute_error(c);
            return Ok(c.clone());
        }
        let mut cycle = Cycle {
            id: self.next_id(),
            seq,
            sku: sku.to_string(),
            target_ml: target_ml.unwrap_or(actual_ml),
            actual_ml: Some(actual_ml),
            valve_ms,
            error_ml: None,
            quality_state: None,
            created_at: self.tick(),
        };
        recompute_error(&mut cycle);
        self.cycles.push(cycle.clone());
        Ok(cycle)
    }

    fn set_valve_ms(&mut self, cycle_id: i64, valve_ms: f64) -> Result<()> {
        self.check()?;
        if let Some(c) = self.cycles.iter_mut().find(|c| c.id == cycle_id) {
            c.valve_ms = valve_ms;
        }
        Ok(())
    }

    fn set_quality_state(&mut self, cycle_id: i64, state: SpcStateKind) -> Result<()> {
        self.check()?;
        if let Some(c) = self.cycles.iter_mut().find(|c| c.id == cycle_id) {
            c.quality_state = Some(state);
        }
        Ok(())
    }

    fn recent_cycles(&mut self, sku: &str, limit: usize) -> Result<Vec<Cycle>> {
        self.check()?;
        let mut rows: Vec<Cycle> = self
            .cycles
            .iter()
            .filter(|c| c.sku == sku)
            .rev()
            .take(limit)
            .cloned()
            .collect();
        rows.reverse();
        Ok(rows)
    }

    fn recent_errors(&mut self, sku: &str, limit: usize) -> Result<Vec<f64>> {
        self.check()?;
        let mut errors: Vec<f64> = self
            .cycles
            .iter()
            .filter(|c| c.sku == sku)
            .rev()
            .filter_map(|c| c.error_ml)
            .take(limit)
            .collect();
        errors.reverse();
        Ok(errors)
    }

    fn last_cycle(&mut self, sku: &str) -> Result<Option<Cycle>> {
        self.check()?;
        Ok(self.cycles.iter().rev().find(|c| c.sku == sku).cloned())
    }

    fn last_seq(&mut self, sku: &str) -> Result<i64> {
        self.check()?;
        Ok(self
            .cycles
            .iter()
            .filter(|c| c.sku == sku)
            .map(|c| c.seq)
            .max()
            .unwrap_or(0))
    }
}

impl RecipeSource for MemStore {
    fn recipe_for(&mut self, sku: &str) -> Result<Option<Recipe>> {
        self.check()?;
        Ok(self.recipes.get(sku).filter(|r| r.active).cloned())
    }
}

impl QualityStore for MemStore {
    fn upsert_spc_state(
        &mut self,
        sku: &str,
        report: &SpcReport,
        ref_cycle_id: i64,
    ) -> Result<i64> {
        self.check()?;
        if let Some(row) = self
            .spc_states
            .iter_mut()
            .find(|s| s.sku == sku && s.ref_cycle_id == ref_cycle_id)
        {
            row.report = report.clone();
            return Ok(row.id);
        }
        let id = self.next_id();
        self.spc_states.push(MemSpcState {
            id,
            sku: sku.to_string(),
            ref_cycle_id,
            report: report.clone(),
        });
        Ok(id)
    }

    fn upsert_alarm(
        &mut self,
        sku: &str,
        level: SpcStateKind,
        drift: Option<DriftDirection>,
        message: &str,
        cycle_id: i64,
        spc_state_id: i64,
    ) -> Result<AlarmOutcome> {
        self.check()?;
        if let Some(row) = self.alarms.iter_mut().find(|a| {
            a.sku == sku && a.level == level && a.drift == drift && a.cycle_id == cycle_id
        }) {
            row.spc_state_id = spc_state_id;
            return Ok(AlarmOutcome::Updated(row.id));
        }
        let id = self.next_id();
        self.alarms.push(MemAlarm {
            id,
            sku: sku.to_string(),
            level,
            drift,
            message: message.to_string(),
            cycle_id,
            spc_state_id,
        });
        Ok(AlarmOutcome::Inserted(id))
    }
}

impl LineStateStore for MemStore {
    fn set_current_sku(&mut self, line_id: &str, sku: &str) -> Result<()> {
        self.check()?;
        self.line.insert(line_id.to_string(), sku.to_string());
        Ok(())
    }

    fn current_sku(&mut self, line_id: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.line.get(line_id).cloned())
    }
}

/// Records every publish; cloneable so tests keep a handle after moving it
/// into the ingestor.
#[derive(Clone, Default)]
pub struct MemPublisher {
    pub published: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .map(|p| {
                p.iter()
                    .filter(|(t, _)| t == topic)
                    .map(|(_, body)| body.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl BusPublisher for MemPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let body = String::from_utf8_lossy(payload).to_string();
        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_string(), body));
        }
        Ok(())
    }
}

/// Always fails; exercises the publish-failure-is-swallowed paths.
#[derive(Clone, Copy, Default)]
pub struct DeadPublisher;

impl BusPublisher for DeadPublisher {
    fn publish(
        &self,
        _topic: &str,
        _payload: &[u8],
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("broker unreachable".into())
    }
}
