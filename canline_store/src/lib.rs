#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! SQLite persistence for the fill line.
//!
//! One `SqliteStore` per consumer thread; the handle is never shared. Every
//! trait method is a complete unit of work and commits (or rolls back) before
//! returning, so a crash between messages never leaves a partial write.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use eyre::WrapErr;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{debug, info};

use canline_core::error::Result;
use canline_core::model::{AlarmOutcome, Cycle, DriftDirection, Recipe, SpcReport, SpcStateKind};
use canline_core::store::{CycleLedger, LineStateStore, QualityStore, RecipeSource};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cycles (
    id            INTEGER PRIMARY KEY,
    sku           TEXT    NOT NULL,
    seq           INTEGER NOT NULL,
    target_ml     REAL    NOT NULL DEFAULT 0,
    actual_ml     REAL,
    valve_ms      REAL    NOT NULL DEFAULT 0,
    error_ml      REAL,
    quality_state TEXT,
    created_at    INTEGER NOT NULL,
    UNIQUE (sku, seq)
);
CREATE INDEX IF NOT EXISTS idx_cycles_sku_id ON cycles (sku, id);

CREATE TABLE IF NOT EXISTS recipes (
    sku           TEXT PRIMARY KEY,
    name          TEXT NOT NULL DEFAULT '',
    target_ml     REAL NOT NULL,
    base_valve_ms REAL NOT NULL,
    fixed_dose    INTEGER NOT NULL DEFAULT 0,
    active        INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS spc_states (
    id           INTEGER PRIMARY KEY,
    sku          TEXT    NOT NULL,
    state        TEXT    NOT NULL,
    drift        TEXT,
    mean         REAL    NOT NULL,
    stddev       REAL    NOT NULL,
    cusum_pos    REAL    NOT NULL,
    cusum_neg    REAL    NOT NULL,
    samples      INTEGER NOT NULL,
    ref_cycle_id INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL,
    UNIQUE (sku, ref_cycle_id)
);

-- drift is '' rather than NULL so the dedup key treats 'no direction' as one
-- value (SQLite UNIQUE considers NULLs distinct).
CREATE TABLE IF NOT EXISTS alarms (
    id           INTEGER PRIMARY KEY,
    sku          TEXT    NOT NULL,
    level        TEXT    NOT NULL,
    drift        TEXT    NOT NULL DEFAULT '',
    message      TEXT    NOT NULL,
    cycle_id     INTEGER NOT NULL,
    spc_state_id INTEGER NOT NULL,
    created_at   INTEGER NOT NULL,
    UNIQUE (sku, level, drift, cycle_id)
);

CREATE TABLE IF NOT EXISTS line_state (
    line_id     TEXT PRIMARY KEY,
    current_sku TEXT,
    updated_at  INTEGER NOT NULL
);
";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the ledger at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .wrap_err_with(|| format!("opening database at {}", path.display()))?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "database ready");
        Ok(store)
    }

    /// Private in-memory database; used by tests and the dry-run mode.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
        if version < SCHEMA_VERSION {
            conn.execute_batch(SCHEMA)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            debug!(from = version, to = SCHEMA_VERSION, "schema migrated");
        }
        Ok(Self { conn })
    }

    /// Insert or replace a recipe; used at startup to seed from config.
    pub fn put_recipe(&mut self, recipe: &Recipe) -> Result<()> {
        self.conn.execute(
            "INSERT INTO recipes (sku, name, target_ml, base_valve_ms, fixed_dose, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (sku) DO UPDATE SET
                 name = excluded.name,
                 target_ml = excluded.target_ml,
                 base_valve_ms = excluded.base_valve_ms,
                 fixed_dose = excluded.fixed_dose,
                 active = excluded.active",
            params![
                recipe.sku,
                recipe.name,
                recipe.target_ml,
                recipe.base_valve_ms,
                recipe.fixed_dose,
                recipe.active,
            ],
        )?;
        Ok(())
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn error_for(actual_ml: Option<f64>, target_ml: f64) -> Option<f64> {
    match actual_ml {
        Some(actual) if target_ml > 0.0 => Some(actual - target_ml),
        _ => None,
    }
}

fn row_to_cycle(row: &rusqlite::Row<'_>) -> rusqlite::Result<Cycle> {
    let quality: Option<String> = row.get("quality_state")?;
    Ok(Cycle {
        id: row.get("id")?,
        seq: row.get("seq")?,
        sku: row.get("sku")?,
        target_ml: row.get("target_ml")?,
        actual_ml: row.get("actual_ml")?,
        valve_ms: row.get("valve_ms")?,
        error_ml: row.get("error_ml")?,
        quality_state: quality.as_deref().and_then(SpcStateKind::parse),
        created_at: row.get("created_at")?,
    })
}

fn fetch_cycle(tx: &Transaction<'_>, sku: &str, seq: i64) -> Result<Option<Cycle>> {
    let cycle = tx
        .query_row(
            "SELECT id, sku, seq, target_ml, actual_ml, valve_ms, error_ml, quality_state,
                    created_at
             FROM cycles WHERE sku = ?1 AND seq = ?2",
            params![sku, seq],
            row_to_cycle,
        )
        .optional()?;
    Ok(cycle)
}

fn fetch_cycle_by_id(tx: &Transaction<'_>, id: i64) -> Result<Cycle> {
    Ok(tx.query_row(
        "SELECT id, sku, seq, target_ml, actual_ml, valve_ms, error_ml, quality_state, created_at
         FROM cycles WHERE id = ?1",
        params![id],
        row_to_cycle,
    )?)
}

impl CycleLedger for SqliteStore {
    fn upsert_on_arrival(
        &mut self,
        sku: &str,
        seq: i64,
        target_ml: f64,
        valve_ms: f64,
    ) -> Result<Cycle> {
        let tx = self.conn.transaction()?;
        let id = match fetch_cycle(&tx, sku, seq)? {
            Some(existing) => {
                tx.execute(
                    "UPDATE cycles SET target_ml = ?1, error_ml = ?2 WHERE id = ?3",
                    params![target_ml, error_for(existing.actual_ml, target_ml), existing.id],
                )?;
                existing.id
            }
            None => {
                tx.execute(
                    "INSERT INTO cycles (sku, seq, target_ml, valve_ms, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![sku, seq, target_ml, valve_ms, now_epoch()],
                )?;
                tx.last_insert_rowid()
            }
        };
        let cycle = fetch_cycle_by_id(&tx, id)?;
        tx.commit()?;
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
        let tx = self.conn.transaction()?;
        let id = match fetch_cycle(&tx, sku, seq)? {
            Some(existing) => {
                let target = target_ml.unwrap_or(existing.target_ml);
                tx.execute(
                    "UPDATE cycles SET actual_ml = ?1, valve_ms = ?2, target_ml = ?3,
                                       error_ml = ?4
                     WHERE id = ?5",
                    params![
                        actual_ml,
                        valve_ms,
                        target,
                        error_for(Some(actual_ml), target),
                        existing.id,
                    ],
                )?;
                existing.id
            }
            None => {
                // Result outran the arrival; create the row from what we have.
                let target = target_ml.unwrap_or(actual_ml);
                tx.execute(
                    "INSERT INTO cycles (sku, seq, target_ml, actual_ml, valve_ms, error_ml,
                                         created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        sku,
                        seq,
                        target,
                        actual_ml,
                        valve_ms,
                        error_for(Some(actual_ml), target),
                        now_epoch(),
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };
        let cycle = fetch_cycle_by_id(&tx, id)?;
        tx.commit()?;
        Ok(cycle)
    }

    fn set_valve_ms(&mut self, cycle_id: i64, valve_ms: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE cycles SET valve_ms = ?1 WHERE id = ?2",
            params![valve_ms, cycle_id],
        )?;
        Ok(())
    }

    fn set_quality_state(&mut self, cycle_id: i64, state: SpcStateKind) -> Result<()> {
        self.conn.execute(
            "UPDATE cycles SET quality_state = ?1 WHERE id = ?2",
            params![state.as_str(), cycle_id],
        )?;
        Ok(())
    }

    fn recent_cycles(&mut self, sku: &str, limit: usize) -> Result<Vec<Cycle>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, sku, seq, target_ml, actual_ml, valve_ms, error_ml, quality_state,
                    created_at
             FROM cycles WHERE sku = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows: Vec<Cycle> = stmt
            .query_map(params![sku, limit as i64], row_to_cycle)?
            .collect::<rusqlite::Result<_>>()?;
        rows.reverse();
        Ok(rows)
    }

    fn recent_errors(&mut self, sku: &str, limit: usize) -> Result<Vec<f64>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT error_ml FROM cycles
             WHERE sku = ?1 AND error_ml IS NOT NULL
             ORDER BY id DESC LIMIT ?2",
        )?;
        let mut errors: Vec<f64> = stmt
            .query_map(params![sku, limit as i64], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        errors.reverse();
        Ok(errors)
    }

    fn last_cycle(&mut self, sku: &str) -> Result<Option<Cycle>> {
        let cycle = self
            .conn
            .query_row(
                "SELECT id, sku, seq, target_ml, actual_ml, valve_ms, error_ml, quality_state,
                        created_at
                 FROM cycles WHERE sku = ?1 ORDER BY id DESC LIMIT 1",
                params![sku],
                row_to_cycle,
            )
            .optional()?;
        Ok(cycle)
    }

    fn last_seq(&mut self, sku: &str) -> Result<i64> {
        let seq: Option<i64> = self.conn.query_row(
            "SELECT MAX(seq) FROM cycles WHERE sku = ?1",
            params![sku],
            |r| r.get(0),
        )?;
        Ok(seq.unwrap_or(0))
    }
}

impl RecipeSource for SqliteStore {
    fn recipe_for(&mut self, sku: &str) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                "SELECT sku, name, target_ml, base_valve_ms, fixed_dose, active
                 FROM recipes WHERE sku = ?1 AND active = 1",
                params![sku],
                |row| {
                    Ok(Recipe {
                        sku: row.get("sku")?,
                        name: row.get("name")?,
                        target_ml: row.get("target_ml")?,
                        base_valve_ms: row.get("base_valve_ms")?,
                        fixed_dose: row.get("fixed_dose")?,
                        active: row.get("active")?,
                    })
                },
            )
            .optional()?;
        Ok(recipe)
    }
}

impl QualityStore for SqliteStore {
    fn upsert_spc_state(
        &mut self,
        sku: &str,
        report: &SpcReport,
        ref_cycle_id: i64,
    ) -> Result<i64> {
        let tx = self.conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM spc_states WHERE sku = ?1 AND ref_cycle_id = ?2",
                params![sku, ref_cycle_id],
                |r| r.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE spc_states SET state = ?1, drift = ?2, mean = ?3, stddev = ?4,
                                           cusum_pos = ?5, cusum_neg = ?6, samples = ?7,
                                           updated_at = ?8
                     WHERE id = ?9",
                    params![
                        report.state.as_str(),
                        report.drift.map(DriftDirection::as_str),
                        report.mean,
                        report.stddev,
                        report.cusum_pos,
                        report.cusum_neg,
                        report.samples as i64,
                        now_epoch(),
                        id,
                    ],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO spc_states (sku, state, drift, mean, stddev, cusum_pos,
                                             cusum_neg, samples, ref_cycle_id, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        sku,
                        report.state.as_str(),
                        report.drift.map(DriftDirection::as_str),
                        report.mean,
                        report.stddev,
                        report.cusum_pos,
                        report.cusum_neg,
                        report.samples as i64,
                        ref_cycle_id,
                        now_epoch(),
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };
        tx.commit()?;
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
        let drift_key = drift.map_or("", DriftDirection::as_str);
        let tx = self.conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM alarms
                 WHERE sku = ?1 AND level = ?2 AND drift = ?3 AND cycle_id = ?4",
                params![sku, level.as_str(), drift_key, cycle_id],
                |r| r.get(0),
            )
            .optional()?;
        let outcome = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE alarms SET spc_state_id = ?1 WHERE id = ?2",
                    params![spc_state_id, id],
                )?;
                AlarmOutcome::Updated(id)
            }
            None => {
                tx.execute(
                    "INSERT INTO alarms (sku, level, drift, message, cycle_id, spc_state_id,
                                         created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        sku,
                        level.as_str(),
                        drift_key,
                        message,
                        cycle_id,
                        spc_state_id,
                        now_epoch(),
                    ],
                )?;
                AlarmOutcome::Inserted(tx.last_insert_rowid())
            }
        };
        tx.commit()?;
        Ok(outcome)
    }
}

impl LineStateStore for SqliteStore {
    fn set_current_sku(&mut self, line_id: &str, sku: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO line_state (line_id, current_sku, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (line_id) DO UPDATE SET
                 current_sku = excluded.current_sku,
                 updated_at = excluded.updated_at",
            params![line_id, sku, now_epoch()],
        )?;
        Ok(())
    }

    fn current_sku(&mut self, line_id: &str) -> Result<Option<String>> {
        let sku: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT current_sku FROM line_state WHERE line_id = ?1",
                params![line_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(sku.flatten())
    }
}
