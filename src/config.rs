//! Tunables shared by the solver and the changeless selector.

use serde::Deserialize;

use crate::strategy::StrategyKind;

/// Iteration ceiling for a single branch-and-bound run.
pub const DEFAULT_MAX_ITERATIONS: usize = 100_000;
pub const DEFAULT_CANCELLATION_CHECK_INTERVAL: usize = 1024;
pub const DEFAULT_GROUP_USEFULNESS_PERCENT: u64 = 75;
pub const DEFAULT_MAX_OVERPAYMENT_PERCENT: u64 = 125;
pub const DEFAULT_MIN_PAYMENT_PERCENT: u64 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// A script group is searched only if its total amount exceeds this
    /// share of the target.
    pub group_usefulness_percent: u64,
    pub max_iterations: usize,
    pub cancellation_check_interval: usize,
    /// Satoshis the "more" strategy may overpay and still count as a match.
    /// Unset means an exact match; callers may substitute their own default.
    pub more_tolerance: Option<u64>,
    /// Satoshis the "less" strategy may fall short and still count as a match.
    pub less_tolerance: u64,
    /// Upper edge of "more" best-effort results, as a share of the target.
    pub max_overpayment_percent: u64,
    /// Lower edge of "less" best-effort results, as a share of the target.
    pub min_payment_percent: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        SelectorConfig {
            group_usefulness_percent: DEFAULT_GROUP_USEFULNESS_PERCENT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            cancellation_check_interval: DEFAULT_CANCELLATION_CHECK_INTERVAL,
            more_tolerance: None,
            less_tolerance: 0,
            max_overpayment_percent: DEFAULT_MAX_OVERPAYMENT_PERCENT,
            min_payment_percent: DEFAULT_MIN_PAYMENT_PERCENT,
        }
    }
}

impl SelectorConfig {
    pub fn with_tolerances(mut self, more_tolerance: u64, less_tolerance: u64) -> Self {
        self.more_tolerance = Some(more_tolerance);
        self.less_tolerance = less_tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Best-effort bound for `kind`: the overpayment ceiling for "more",
    /// the payment floor for "less".
    pub fn best_effort_percent(&self, kind: StrategyKind) -> u64 {
        match kind {
            StrategyKind::More => self.max_overpayment_percent,
            StrategyKind::Less => self.min_payment_percent,
        }
    }

    /// Whether a script group holding `group_total` satoshis is worth searching.
    pub fn is_group_useful(&self, group_total: u64, target: i64) -> bool {
        let Ok(target) = u128::try_from(target) else {
            return false;
        };
        u128::from(group_total) * 100 > target * u128::from(self.group_usefulness_percent)
    }
}
