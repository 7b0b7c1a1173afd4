//! Performance degradation detection.

use decision_core::config::DegradationConfig;
use decision_risk::RollingWindow;
use serde::{Deserialize, Serialize};

/// Recent performance fell below the allowed fraction of the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub recent_mean: f64,
    pub baseline_mean: f64,
    pub threshold: f64,
}

/// Compares the mean of the most recent observations with the trailing
/// baseline that precedes them.
#[derive(Debug, Clone)]
pub struct DegradationDetector {
    config: DegradationConfig,
    recent: RollingWindow,
    baseline: RollingWindow,
}

impl DegradationDetector {
    #[must_use]
    pub fn new(config: DegradationConfig) -> Self {
        Self {
            recent: RollingWindow::new(config.recent_window),
            baseline: RollingWindow::new(config.baseline_window),
            config,
        }
    }

    /// Feeds one observation. Returns a [`Degradation`] once both windows
    /// are full and the recent mean is below `fraction * baseline`.
    /// A non-positive baseline never triggers.
    pub fn observe(&mut self, value: f64) -> Option<Degradation> {
        if !self.config.enabled || !value.is_finite() {
            return None;
        }
        if let Some(aged) = self.recent.push(value) {
            self.baseline.push(aged);
        }
        if !(self.recent.is_full() && self.baseline.is_full()) {
            return None;
        }

        let recent_mean = self.recent.mean()?;
        let baseline_mean = self.baseline.mean()?;
        if baseline_mean <= 0.0 {
            return None;
        }
        let threshold = baseline_mean * self.config.min_fraction_of_baseline;
        (recent_mean < threshold).then_some(Degradation {
            recent_mean,
            baseline_mean,
            threshold,
        })
    }

    /// Forgets all history, e.g. after the parameters changed.
    pub fn reset(&mut self) {
        self.recent.clear();
        self.baseline.clear();
    }
}
