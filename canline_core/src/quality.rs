//! SPC persistence and alarm deduplication around the pure CUSUM evaluation.
//!
//! Recomputing against unchanged data is idempotent with respect to
//! observable alarm notifications: the SpcState row for the reference cycle
//! is updated in place, and only the first insertion of a given
//! (sku, level, drift, cycle) alarm publishes outbound.

use canline_traits::BusPublisher;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::model::{AlarmOutcome, SpcReport, SpcStateKind};
use crate::spc::{self, SpcCfg};
use crate::store::Store;

/// Topic for outbound alarm notifications.
pub const TOPIC_ALARM: &str = "line/event/alarm";

/// Recompute the monitoring state for a product and persist it.
///
/// The reference cycle is the most recent cycle for the product; with no
/// cycles at all, nothing is persisted and an `UNKNOWN` report is returned.
/// A publish failure is logged and swallowed, never escalated to fail the
/// persistence writes.
pub fn recompute<S: Store + ?Sized>(
    store: &mut S,
    publisher: Option<&dyn BusPublisher>,
    sku: &str,
    cfg: &SpcCfg,
) -> Result<SpcReport> {
    let errors = store.recent_errors(sku, cfg.window)?;
    let report = spc::evaluate(&errors, cfg);

    let Some(reference) = store.last_cycle(sku)? else {
        return Ok(report);
    };

    store.set_quality_state(reference.id, report.state)?;
    let spc_state_id = store.upsert_spc_state(sku, &report, reference.id)?;

    if matches!(report.state, SpcStateKind::Warn | SpcStateKind::Alarm) {
        let drift_name = report.drift.map(|d| d.as_str()).unwrap_or("NONE");
        let message = format!("SPC {} ({drift_name}) for SKU {sku}", report.state.as_str());
        match store.upsert_alarm(
            sku,
            report.state,
            report.drift,
            &message,
            reference.id,
            spc_state_id,
        )? {
            AlarmOutcome::Inserted(alarm_id) => {
                debug!(sku, alarm_id, level = report.state.as_str(), "alarm raised");
                if let Some(publisher) = publisher {
                    publish_alarm(publisher, sku, &report, reference.id);
                }
            }
            AlarmOutcome::Updated(alarm_id) => {
                trace!(sku, alarm_id, "alarm already raised for this cycle; relinked");
            }
        }
    }

    Ok(report)
}

fn publish_alarm(publisher: &dyn BusPublisher, sku: &str, report: &SpcReport, cycle_id: i64) {
    let payload = serde_json::json!({
        "sku": sku,
        "level": report.state.as_str(),
        "alarm_type": report.drift.map(|d| d.as_str()),
        "cycle_id": cycle_id,
    });
    let bytes = payload.to_string().into_bytes();
    if let Err(e) = publisher.publish(TOPIC_ALARM, &bytes) {
        warn!(sku, error = %e, "alarm publish failed; continuing");
    }
}
