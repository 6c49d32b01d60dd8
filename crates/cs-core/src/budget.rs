//! Per-descriptor evaluation budget.
//!
//! A coarse token bucket: replenished in whole-period steps from elapsed
//! real time (never continuously, so repeated evaluations cannot accumulate
//! floating-point drift), charged with measured evaluation cost, and
//! permanently disabled once cost drives it below a large negative floor.

/// Budget granted per replenish period.
pub const ALLOWANCE_MS: f64 = 50.0;
/// Replenish step size.
pub const REPLENISH_PERIOD_MS: u64 = 1000;
/// Below this, the descriptor is disabled for the rest of the page.
pub const DISABLE_FLOOR_MS: f64 = -500.0;
/// Budget never accumulates past this cap.
pub const MAX_BUDGET_MS: f64 = 2.0 * ALLOWANCE_MS;

#[derive(Debug, Clone)]
pub struct SelectorBudget {
    budget_ms: f64,
    last_allowance_ms: u64,
    disabled: bool,
}

impl SelectorBudget {
    pub fn new(now_ms: u64) -> Self {
        Self {
            budget_ms: ALLOWANCE_MS,
            last_allowance_ms: now_ms,
            disabled: false,
        }
    }

    /// Add allowance for every full period elapsed since the last step.
    pub fn replenish(&mut self, now_ms: u64) {
        if self.disabled {
            return;
        }
        let elapsed = now_ms.saturating_sub(self.last_allowance_ms);
        let periods = elapsed / REPLENISH_PERIOD_MS;
        if periods == 0 {
            return;
        }
        self.budget_ms = (self.budget_ms + periods as f64 * ALLOWANCE_MS).min(MAX_BUDGET_MS);
        self.last_allowance_ms += periods * REPLENISH_PERIOD_MS;
    }

    /// Deduct evaluation cost; crossing the floor disables permanently.
    pub fn charge(&mut self, cost_ms: f64) {
        self.budget_ms -= cost_ms;
        if self.budget_ms < DISABLE_FLOOR_MS {
            self.disabled = true;
        }
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether the descriptor may be evaluated this pass.
    #[inline]
    pub fn has_allowance(&self) -> bool {
        !self.disabled && self.budget_ms > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replenish_in_discrete_steps() {
        let mut b = SelectorBudget::new(0);
        b.charge(ALLOWANCE_MS); // drained
        assert!(!b.has_allowance());

        b.replenish(999);
        assert!(!b.has_allowance());
        b.replenish(1000);
        assert!(b.has_allowance());
    }

    #[test]
    fn test_cap() {
        let mut b = SelectorBudget::new(0);
        b.replenish(60_000);
        b.charge(MAX_BUDGET_MS);
        assert!(!b.has_allowance());
        assert!(!b.is_disabled());
    }

    #[test]
    fn test_disable_is_permanent() {
        let mut b = SelectorBudget::new(0);
        b.charge(ALLOWANCE_MS - DISABLE_FLOOR_MS + 1.0);
        assert!(b.is_disabled());
        b.replenish(1_000_000);
        assert!(b.is_disabled());
        assert!(!b.has_allowance());
    }
}
