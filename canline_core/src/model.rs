//! Transient snapshots of persisted entities.
//!
//! All entities are owned by the persistence layer. The controller and the
//! monitor receive these read-only snapshots and return computed values; they
//! never write back themselves.

use serde::Serialize;

/// One fill attempt. `seq` is producer-assigned and monotonically increasing
/// per product; (`sku`, `seq`) identifies the logical record.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    pub id: i64,
    pub seq: i64,
    pub sku: String,
    /// Target volume in ml; 0.0 marks "unresolved" and is treated as absent.
    pub target_ml: f64,
    pub actual_ml: Option<f64>,
    pub valve_ms: f64,
    /// actual − target; None until both are known.
    pub error_ml: Option<f64>,
    pub quality_state: Option<SpcStateKind>,
    /// Epoch seconds.
    pub created_at: i64,
}

/// Per-product configuration, owned by the admin surface; read-only here.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub sku: String,
    pub name: String,
    pub target_ml: f64,
    pub base_valve_ms: f64,
    /// Fixed-dose products always fill for exactly `base_valve_ms`.
    pub fixed_dose: bool,
    pub active: bool,
}

/// Monitoring verdict for a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpcStateKind {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ALARM")]
    Alarm,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl SpcStateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Warn => "WARN",
            Self::Alarm => "ALARM",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::Ok),
            "WARN" => Some(Self::Warn),
            "ALARM" => Some(Self::Alarm),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Which direction the process mean has drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriftDirection {
    #[serde(rename = "POS_DRIFT")]
    Positive,
    #[serde(rename = "NEG_DRIFT")]
    Negative,
}

impl DriftDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "POS_DRIFT",
            Self::Negative => "NEG_DRIFT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "POS_DRIFT" => Some(Self::Positive),
            "NEG_DRIFT" => Some(Self::Negative),
            _ => None,
        }
    }
}

/// Output of one SPC/CUSUM evaluation over a recent error series.
#[derive(Debug, Clone, PartialEq)]
pub struct SpcReport {
    pub state: SpcStateKind,
    pub drift: Option<DriftDirection>,
    pub mean: f64,
    pub stddev: f64,
    pub cusum_pos: f64,
    pub cusum_neg: f64,
    pub samples: usize,
}

impl SpcReport {
    pub fn unknown() -> Self {
        Self {
            state: SpcStateKind::Unknown,
            drift: None,
            mean: 0.0,
            stddev: 0.0,
            cusum_pos: 0.0,
            cusum_neg: 0.0,
            samples: 0,
        }
    }
}

/// A raised quality event, deduplicated per (sku, level, drift, cycle).
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub id: i64,
    pub sku: String,
    pub level: SpcStateKind,
    pub drift: Option<DriftDirection>,
    pub message: String,
    pub cycle_id: i64,
    pub spc_state_id: i64,
    pub created_at: i64,
}

/// Result of an alarm upsert. Only a fresh insertion triggers an outbound
/// notification; an update merely re-links the latest SPC snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmOutcome {
    Inserted(i64),
    Updated(i64),
}

impl AlarmOutcome {
    pub fn id(self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) => id,
        }
    }
}

/// Best-effort current-product pointer for one line. Last-write-wins; never
/// used for control decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct LineState {
    pub line_id: String,
    pub current_sku: Option<String>,
    pub updated_at: i64,
}
