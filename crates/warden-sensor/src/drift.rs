//! Slow-drift accumulation across turns

/// Accumulates per-turn drift with decay to catch gradual topic migration
/// that no single turn would flag.
///
/// The accumulator decays after each update, so sustained drift is required
/// to hold the alert. Alerts are recorded on the ledger for audit; they do
/// not alter the gate's decision procedure.
#[derive(Clone, Debug)]
pub struct DriftMonitor {
    accumulated: f64,
    decay: f64,
    threshold: f64,
}

/// Outcome of a drift update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriftAlert {
    pub triggered: bool,
    pub accumulated: f64,
}

impl DriftMonitor {
    pub fn new() -> Self {
        Self {
            accumulated: 0.0,
            decay: 0.9,
            threshold: 1.5,
        }
    }

    /// Fold in this turn's drift, returning whether the accumulated value
    /// crossed the alert threshold. Decay applies after the check.
    pub fn update(&mut self, drift: f64) -> DriftAlert {
        self.accumulated += drift.clamp(0.0, 1.0);
        let triggered = self.accumulated > self.threshold;
        self.accumulated *= self.decay;
        DriftAlert {
            triggered,
            accumulated: self.accumulated,
        }
    }

    pub fn accumulated(&self) -> f64 {
        self.accumulated
    }
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self::new()
    }
}
