//! SPC drift detection over a recent error series.
//!
//! Two-sided CUSUM on standardized errors. An ALARM is terminal for the
//! evaluation: later samples in the same call never relax it. A WARN keeps
//! scanning, since a later sample may still escalate.

use crate::model::{DriftDirection, SpcReport, SpcStateKind};

/// Guards against a zero stddev on constant series.
const STDDEV_EPSILON: f64 = 1e-6;

/// CUSUM tuning.
#[derive(Debug, Clone)]
pub struct SpcCfg {
    /// Reference value: standardized slack absorbed per sample.
    pub k: f64,
    /// WARN threshold on either arm.
    pub h_warn: f64,
    /// ALARM threshold on either arm.
    pub h_alarm: f64,
    /// Maximum number of recent errors fed into one evaluation.
    pub window: usize,
}

impl Default for SpcCfg {
    fn default() -> Self {
        Self {
            k: 0.5,
            h_warn: 1.0,
            h_alarm: 2.0,
            window: 100,
        }
    }
}

/// Evaluate the monitoring state for an error series, oldest → newest.
///
/// An empty series yields `UNKNOWN` with zeroed statistics. This function is
/// pure; the persistence/dedup contract around it lives in `quality`.
pub fn evaluate(errors: &[f64], cfg: &SpcCfg) -> SpcReport {
    if errors.is_empty() {
        return SpcReport::unknown();
    }

    let n = errors.len() as f64;
    let mean = errors.iter().sum::<f64>() / n;
    let variance = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt() + STDDEV_EPSILON;

    let mut cusum_pos = 0.0_f64;
    let mut cusum_neg = 0.0_f64;
    let mut state = SpcStateKind::Ok;
    let mut drift = None;

    for e in errors {
        let z = (e - mean) / stddev;
        cusum_pos = (cusum_pos + z - cfg.k).max(0.0);
        cusum_neg = (cusum_neg + z + cfg.k).min(0.0);

        if cusum_pos > cfg.h_alarm || cusum_neg < -cfg.h_alarm {
            state = SpcStateKind::Alarm;
            drift = Some(if cusum_pos > cfg.h_alarm {
                DriftDirection::Positive
            } else {
                DriftDirection::Negative
            });
            break;
        }
        if cusum_pos > cfg.h_warn || cusum_neg < -cfg.h_warn {
            state = SpcStateKind::Warn;
            drift = Some(if cusum_pos > cfg.h_warn {
                DriftDirection::Positive
            } else {
                DriftDirection::Negative
            });
        }
    }

    SpcReport {
        state,
        drift,
        mean,
        stddev,
        cusum_pos,
        cusum_neg,
        samples: errors.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series_is_unknown() {
        let r = evaluate(&[], &SpcCfg::default());
        assert_eq!(r.state, SpcStateKind::Unknown);
        assert_eq!(r.samples, 0);
        assert_eq!(r.cusum_pos, 0.0);
        assert_eq!(r.cusum_neg, 0.0);
    }

    #[test]
    fn constant_zero_mean_stream_stays_ok() {
        let errors = vec![0.0; 200];
        let r = evaluate(&errors, &SpcCfg::default());
        assert_eq!(r.state, SpcStateKind::Ok);
        assert!(r.drift.is_none());
    }

    #[test]
    fn sustained_step_trips_alarm_within_bounded_samples() {
        // Standardization is over the whole window, so the early stable run
        // sits below the overall mean and the arm matching that side of the
        // mean accumulates first.
        let mut errors = vec![0.0; 8];
        errors.extend(std::iter::repeat(6.0).take(8));
        let r = evaluate(&errors, &SpcCfg::default());
        assert_eq!(r.state, SpcStateKind::Alarm);
        assert_eq!(r.drift, Some(DriftDirection::Negative));
        assert!(r.cusum_neg < -2.0);
    }

    #[test]
    fn mirrored_step_trips_the_positive_arm() {
        let mut errors = vec![0.0; 8];
        errors.extend(std::iter::repeat(-6.0).take(8));
        let r = evaluate(&errors, &SpcCfg::default());
        assert_eq!(r.state, SpcStateKind::Alarm);
        assert_eq!(r.drift, Some(DriftDirection::Positive));
        assert!(r.cusum_pos > 2.0);
    }

    #[test]
    fn alarm_is_terminal_for_the_evaluation() {
        // Samples after the alarm trip must not relax the verdict.
        let mut errors = vec![0.0; 8];
        errors.extend(std::iter::repeat(-6.0).take(4));
        errors.extend(std::iter::repeat(0.0).take(40));
        let r = evaluate(&errors, &SpcCfg::default());
        assert_eq!(r.state, SpcStateKind::Alarm);
    }

    #[test]
    fn mild_shift_warns_without_alarming() {
        // A short upward step pushes the positive arm past h_warn but the
        // series ends before it can accumulate to h_alarm.
        let errors = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let r = evaluate(&errors, &SpcCfg::default());
        assert_eq!(r.state, SpcStateKind::Warn);
        assert_eq!(r.drift, Some(DriftDirection::Positive));
    }
}
