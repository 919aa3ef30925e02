//! Run-to-run valve-time controller.
//!
//! Given a recipe and recent cycle history, computes the next valve-open
//! duration. A learned predictor can be injected as an optional capability;
//! when absent or declining, the pure R2R correction law applies. Every
//! adaptive path ends in the actuator safety clamp.

use crate::model::{Cycle, Recipe};

/// Controller tuning. The clamp bounds are hard actuator-safety limits, not
/// tuning parameters.
#[derive(Debug, Clone)]
pub struct ControlCfg {
    /// Correction gain applied to the mean recent error.
    pub gain: f64,
    /// Number of most recent cycles whose errors feed the mean.
    pub window: usize,
    /// Below this many prior cycles the recipe base is returned unchanged.
    pub min_history: usize,
    /// Weight of the last observed error when blending a predictor estimate.
    pub correction_weight: f64,
    pub min_valve_ms: f64,
    pub max_valve_ms: f64,
}

impl Default for ControlCfg {
    fn default() -> Self {
        Self {
            gain: 0.3,
            window: 10,
            min_history: 5,
            correction_weight: 0.9,
            min_valve_ms: 100.0,
            max_valve_ms: 5000.0,
        }
    }
}

/// Learned valve-time predictor, consumed as a black box. `None` means the
/// predictor declines (no model for this product, not enough history) and the
/// controller falls back to R2R.
pub trait Predictor: Send {
    fn predict(&self, recipe: &Recipe, recent: &[Cycle]) -> Option<f64>;
}

pub struct ValveController {
    cfg: ControlCfg,
    predictor: Option<Box<dyn Predictor>>,
}

impl ValveController {
    pub fn new(cfg: ControlCfg) -> Self {
        Self {
            cfg,
            predictor: None,
        }
    }

    pub fn with_predictor(cfg: ControlCfg, predictor: Box<dyn Predictor>) -> Self {
        Self {
            cfg,
            predictor: Some(predictor),
        }
    }

    pub fn cfg(&self) -> &ControlCfg {
        &self.cfg
    }

    /// Next valve-open duration in milliseconds.
    ///
    /// `recent` is oldest → newest. `predicted_amount` is an optional volume
    /// estimate (ml) used only when no observed errors exist yet.
    /// All paths produce a numeric result; a missing recipe is a caller-level
    /// precondition, not handled here.
    pub fn next_valve_ms(
        &self,
        recipe: &Recipe,
        recent: &[Cycle],
        predicted_amount: Option<f64>,
    ) -> f64 {
        if recipe.fixed_dose {
            return recipe.base_valve_ms;
        }
        if recent.len() < self.cfg.min_history {
            return recipe.base_valve_ms;
        }

        if let Some(predictor) = &self.predictor {
            if let Some(estimate) = predictor.predict(recipe, recent) {
                let last_error = recent.iter().rev().find_map(|c| c.error_ml).unwrap_or(0.0);
                return self.clamp(estimate - last_error * self.cfg.correction_weight);
            }
        }

        // Baseline: most recent cycle's duration, recipe base while the first
        // fills are still carrying the placeholder.
        let baseline = recent
            .last()
            .map(|c| c.valve_ms)
            .filter(|v| *v > 0.0)
            .unwrap_or(recipe.base_valve_ms);

        let tail = &recent[recent.len().saturating_sub(self.cfg.window)..];
        let errors: Vec<f64> = tail.iter().filter_map(|c| c.error_ml).collect();

        let mean_error = if !errors.is_empty() {
            errors.iter().sum::<f64>() / errors.len() as f64
        } else if let Some(amount) = predicted_amount {
            amount - recipe.target_ml
        } else {
            0.0
        };

        self.clamp(baseline + self.cfg.gain * mean_error)
    }

    /// Actuator safety clamp. Never bypassed on an adaptive path, regardless
    /// of upstream estimate magnitude; non-finite inputs land on the floor.
    fn clamp(&self, valve_ms: f64) -> f64 {
        if !valve_ms.is_finite() {
            return self.cfg.min_valve_ms;
        }
        valve_ms.clamp(self.cfg.min_valve_ms, self.cfg.max_valve_ms)
    }
}
