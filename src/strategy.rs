//! What the branch-and-bound search is looking for.
//!
//! A [`SelectionStrategy`] pairs an immutable [`StrategyParameters`] snapshot
//! with an acceptance band around the target. Two policies exist: `More`
//! accepts sums at or slightly above the target, `Less` accepts sums at or
//! slightly below it.

use std::cmp::Reverse;

use crate::config::{SelectorConfig, DEFAULT_MAX_OVERPAYMENT_PERCENT, DEFAULT_MIN_PAYMENT_PERCENT};
use crate::error::SelectionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyParameters {
    target: i64,
    values: Vec<i64>,
    costs: Vec<i64>,
    max_input_count: usize,
}

impl StrategyParameters {
    /// `values` must be positive and never increasing; `costs[i]` belongs to
    /// `values[i]`.
    pub fn new(
        target: i64,
        values: Vec<i64>,
        costs: Vec<i64>,
        max_input_count: usize,
    ) -> Result<Self, SelectionError> {
        if target <= 0 {
            return Err(SelectionError::NonPositiveTarget(target));
        }
        if values.len() != costs.len() {
            return Err(SelectionError::LengthMismatch { values: values.len(), costs: costs.len() });
        }
        if max_input_count == 0 {
            return Err(SelectionError::ZeroInputLimit);
        }
        if let Some(position) = values.iter().position(|value| *value <= 0) {
            return Err(SelectionError::NonPositiveValue { position, value: values[position] });
        }
        if let Some(position) = values.windows(2).position(|pair| pair[0] < pair[1]) {
            return Err(SelectionError::NotDescending { position: position + 1 });
        }

        Ok(StrategyParameters { target, values, costs, max_input_count })
    }

    /// Sorts `(effective value, cost)` candidates descending and returns the
    /// parameters together with the original index of every sorted position.
    /// Equal values keep their input order.
    pub fn sorted(
        target: i64,
        candidates: impl IntoIterator<Item = (i64, i64)>,
        max_input_count: usize,
    ) -> Result<(Self, Vec<usize>), SelectionError> {
        let mut indexed: Vec<(usize, (i64, i64))> = candidates.into_iter().enumerate().collect();
        indexed.sort_by_key(|(_, (value, _))| Reverse(*value));

        let permutation = indexed.iter().map(|(index, _)| *index).collect();
        let (values, costs) = indexed.into_iter().map(|(_, pair)| pair).unzip();

        let parameters = StrategyParameters::new(target, values, costs, max_input_count)?;
        Ok((parameters, permutation))
    }

    pub fn target(&self) -> i64 {
        self.target
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn costs(&self) -> &[i64] {
        &self.costs
    }

    pub fn max_input_count(&self) -> usize {
        self.max_input_count
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A subsequence of a strategy's candidates, identified by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub positions: Vec<usize>,
    pub values: Vec<i64>,
    pub sum: i64,
    pub cost: i64,
}

impl Selection {
    pub fn from_positions(parameters: &StrategyParameters, positions: Vec<usize>) -> Self {
        let values: Vec<i64> = positions.iter().map(|p| parameters.values[*p]).collect();
        let sum = values.iter().sum();
        let cost = positions.iter().map(|p| parameters.costs[*p]).sum();
        Selection { positions, values, sum, cost }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    More,
    Less,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::More => write!(f, "more"),
            StrategyKind::Less => write!(f, "less"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionStrategy {
    kind: StrategyKind,
    parameters: StrategyParameters,
    tolerance: u64,
    // More: ceiling of best-effort sums. Less: floor. Percent of target.
    best_effort_percent: u64,
}

impl SelectionStrategy {
    pub fn new(kind: StrategyKind, parameters: StrategyParameters, tolerance: u64) -> Self {
        let best_effort_percent = match kind {
            StrategyKind::More => DEFAULT_MAX_OVERPAYMENT_PERCENT,
            StrategyKind::Less => DEFAULT_MIN_PAYMENT_PERCENT,
        };
        SelectionStrategy { kind, parameters, tolerance, best_effort_percent }
    }

    /// Like [`Self::new`], with the best-effort bound taken from `config`.
    pub fn from_config(
        kind: StrategyKind,
        parameters: StrategyParameters,
        tolerance: u64,
        config: &SelectorConfig,
    ) -> Self {
        Self::new(kind, parameters, tolerance).with_best_effort_percent(config.best_effort_percent(kind))
    }

    pub fn more(parameters: StrategyParameters, tolerance: u64) -> Self {
        Self::new(StrategyKind::More, parameters, tolerance)
    }

    pub fn less(parameters: StrategyParameters, tolerance: u64) -> Self {
        Self::new(StrategyKind::Less, parameters, tolerance)
    }

    pub fn with_best_effort_percent(mut self, percent: u64) -> Self {
        self.best_effort_percent = percent;
        self
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn parameters(&self) -> &StrategyParameters {
        &self.parameters
    }

    pub fn target(&self) -> i64 {
        self.parameters.target
    }

    pub fn tolerance(&self) -> u64 {
        self.tolerance
    }

    /// Inclusive acceptance band. The lower edge never drops below one, so
    /// an empty selection is never a match.
    pub fn band(&self) -> (i64, i64) {
        let target = self.parameters.target;
        let tolerance = i64::try_from(self.tolerance).unwrap_or(i64::MAX);
        match self.kind {
            StrategyKind::More => (target, target.saturating_add(tolerance)),
            StrategyKind::Less => (target.saturating_sub(tolerance).max(1), target),
        }
    }

    pub fn is_within_band(&self, sum: i64) -> bool {
        let (lower, upper) = self.band();
        (lower..=upper).contains(&sum)
    }

    /// Whether sums above the band are worth recording as a fallback.
    pub fn allows_overshoot(&self) -> bool {
        self.kind == StrategyKind::More
    }

    /// Whether `sum` may be kept as a best-effort fallback.
    ///
    /// Only sums on this strategy's own side of the target count: "more"
    /// accepts `target..=target * percent / 100`, "less" accepts
    /// `target * percent / 100..=target`. A sum closer to the target on the
    /// other side is never recorded.
    pub fn is_best_effort_eligible(&self, sum: i64) -> bool {
        let target = i128::from(self.parameters.target);
        let scaled = i128::from(sum) * 100;
        let bound = target * i128::from(self.best_effort_percent);
        match self.kind {
            StrategyKind::More => i128::from(sum) >= target && scaled <= bound,
            StrategyKind::Less => i128::from(sum) <= target && scaled >= bound,
        }
    }

    /// Closer to the target wins, then fewer inputs, then lower input cost.
    /// A tie keeps the existing record.
    pub fn is_better_than_best(&self, candidate: &Selection, best: Option<&Selection>) -> bool {
        if candidate.is_empty() || !self.is_best_effort_eligible(candidate.sum) {
            return false;
        }
        let Some(best) = best else {
            return true;
        };
        let target = self.parameters.target;
        let rank = |s: &Selection| (s.sum.abs_diff(target), s.len(), s.cost);
        rank(candidate) < rank(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters(target: i64, values: &[i64]) -> StrategyParameters {
        StrategyParameters::new(target, values.to_vec(), vec![1; values.len()], 10).unwrap()
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert_eq!(
            StrategyParameters::new(10, vec![5, 6], vec![1, 1], 2),
            Err(SelectionError::NotDescending { position: 1 })
        );
        assert_eq!(
            StrategyParameters::new(10, vec![5], vec![1, 1], 2),
            Err(SelectionError::LengthMismatch { values: 1, costs: 2 })
        );
        assert_eq!(
            StrategyParameters::new(0, vec![5], vec![1], 2),
            Err(SelectionError::NonPositiveTarget(0))
        );
        assert_eq!(
            StrategyParameters::new(10, vec![5, 0], vec![1, 1], 2),
            Err(SelectionError::NonPositiveValue { position: 1, value: 0 })
        );
        assert_eq!(
            StrategyParameters::new(10, vec![5], vec![1], 0),
            Err(SelectionError::ZeroInputLimit)
        );
    }

    #[test]
    fn best_effort_bounds_follow_config() {
        let config = SelectorConfig { max_overpayment_percent: 200, min_payment_percent: 50, ..Default::default() };
        let more = SelectionStrategy::from_config(StrategyKind::More, parameters(10, &[19, 5]), 0, &config);
        let less = SelectionStrategy::from_config(StrategyKind::Less, parameters(10, &[19, 5]), 0, &config);
        assert!(more.is_best_effort_eligible(19));
        assert!(!more.is_best_effort_eligible(21));
        assert!(less.is_best_effort_eligible(5));
        assert!(!less.is_best_effort_eligible(4));
        // Closer on the wrong side still does not count.
        assert!(!less.is_best_effort_eligible(11));
        assert!(!SelectionStrategy::more(parameters(10, &[19, 5]), 0).is_best_effort_eligible(19));
    }

    #[test]
    fn duplicates_are_accepted() {
        assert!(StrategyParameters::new(19, vec![12, 10, 10, 5, 4], vec![0; 5], 5).is_ok());
    }

    #[test]
    fn sorted_keeps_the_permutation() {
        let (parameters, permutation) =
            StrategyParameters::sorted(10, [(3, 30), (9, 90), (3, 31), (5, 50)], 4).unwrap();
        assert_eq!(parameters.values(), &[9, 5, 3, 3]);
        assert_eq!(parameters.costs(), &[90, 50, 30, 31]);
        assert_eq!(permutation, vec![1, 3, 0, 2]);
    }

    #[test]
    fn bands() {
        let more = SelectionStrategy::more(parameters(100, &[50]), 5);
        assert_eq!(more.band(), (100, 105));
        assert!(more.is_within_band(105));
        assert!(!more.is_within_band(99));

        let less = SelectionStrategy::less(parameters(100, &[50]), 5);
        assert_eq!(less.band(), (95, 100));
        assert!(less.is_within_band(95));
        assert!(!less.is_within_band(101));

        let wide = SelectionStrategy::less(parameters(3, &[2]), 50);
        assert_eq!(wide.band(), (1, 3));
    }

    #[test]
    fn best_effort_sides() {
        let more = SelectionStrategy::more(parameters(100, &[50]), 0);
        assert!(more.is_best_effort_eligible(125));
        assert!(!more.is_best_effort_eligible(126));
        assert!(!more.is_best_effort_eligible(99));

        let less = SelectionStrategy::less(parameters(100, &[50]), 0);
        assert!(less.is_best_effort_eligible(75));
        assert!(!less.is_best_effort_eligible(74));
        assert!(!less.is_best_effort_eligible(101));
    }

    #[test]
    fn ranking_prefers_distance_then_inputs() {
        let params = parameters(100, &[60, 52, 50, 30, 20, 2]);
        let strategy = SelectionStrategy::more(params.clone(), 0);

        let far = Selection::from_positions(&params, vec![0, 1]);
        let near_many = Selection::from_positions(&params, vec![2, 3, 4, 5]);
        let near_few = Selection::from_positions(&params, vec![1, 2]);

        assert!(strategy.is_better_than_best(&far, None));
        assert!(strategy.is_better_than_best(&near_many, Some(&far)));
        assert!(strategy.is_better_than_best(&near_few, Some(&near_many)));
        assert!(!strategy.is_better_than_best(&near_few.clone(), Some(&near_few)));
    }
}
