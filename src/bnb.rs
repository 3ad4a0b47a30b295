//! Branch-and-bound search for a changeless subset.
//!
//! The search walks the strategy's descending candidates depth first,
//! trying to include each coin before excluding it. Subtrees are cut when
//! they can only overshoot the acceptance band or can never reach it. The
//! first sum inside the band ends the search; otherwise the closest
//! eligible sum seen is kept as a best-effort fallback.

use std::ops::Range;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::config::SelectorConfig;
use crate::observer::{NoopObserver, SearchGroup, SearchInfo, SearchObserver};
use crate::strategy::{Selection, SelectionStrategy, StrategyKind, StrategyParameters};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A sum inside the acceptance band.
    Found(Selection),
    /// No match, but the closest eligible sum seen.
    BestEffort(Selection),
    NoMatch,
}

impl SearchOutcome {
    pub fn selection(&self) -> Option<&Selection> {
        match self {
            SearchOutcome::Found(selection) | SearchOutcome::BestEffort(selection) => Some(selection),
            SearchOutcome::NoMatch => None,
        }
    }

    pub fn into_selection(self) -> Option<Selection> {
        match self {
            SearchOutcome::Found(selection) | SearchOutcome::BestEffort(selection) => Some(selection),
            SearchOutcome::NoMatch => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SearchOutcome::Found(_))
    }
}

/// Why a search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTermination {
    Matched,
    /// Every branch was explored or cut.
    Exhausted,
    BudgetExhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    pub termination: SearchTermination,
    pub iterations: usize,
}

/// Single-use solver: construct, run once, read the results.
pub struct BranchAndBound {
    max_iterations: usize,
    check_interval: usize,
    observer: Arc<dyn SearchObserver>,
    info: Option<SearchInfo>,
    iterations: usize,
    best: Option<Selection>,
    termination: Option<SearchTermination>,
}

impl Default for BranchAndBound {
    fn default() -> Self {
        Self::from_config(&SelectorConfig::default())
    }
}

impl BranchAndBound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SelectorConfig) -> Self {
        BranchAndBound {
            max_iterations: config.max_iterations,
            check_interval: config.cancellation_check_interval.max(1),
            observer: Arc::new(NoopObserver),
            info: None,
            iterations: 0,
            best: None,
            termination: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_check_interval(mut self, check_interval: usize) -> Self {
        self.check_interval = check_interval.max(1);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SearchObserver>, info: SearchInfo) -> Self {
        self.observer = observer;
        self.info = Some(info);
        self
    }

    /// Closest selection seen by the last run, match or not, among sums
    /// on the strategy's own side of the target within its best-effort
    /// bound (see [`SelectionStrategy::is_best_effort_eligible`]).
    pub fn best_selection_found(&self) -> Option<&Selection> {
        self.best.as_ref()
    }

    pub fn termination(&self) -> Option<SearchTermination> {
        self.termination
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Runs the search and folds the result into a [`SearchReport`].
    pub fn run(mut self, strategy: &SelectionStrategy, cancel: &CancellationToken) -> SearchReport {
        let outcome = match self.try_get_match(strategy, cancel) {
            Some(found) => SearchOutcome::Found(found),
            None => match self.best.take() {
                Some(best) => SearchOutcome::BestEffort(best),
                None => SearchOutcome::NoMatch,
            },
        };
        self.observer.on_finished(&self.info(strategy), &outcome);
        SearchReport {
            outcome,
            termination: self.termination.unwrap_or(SearchTermination::Exhausted),
            iterations: self.iterations,
        }
    }

    /// Returns the first selection whose sum falls inside the strategy's
    /// band. On `None`, [`Self::best_selection_found`] holds the fallback.
    pub fn try_get_match(
        &mut self,
        strategy: &SelectionStrategy,
        cancel: &CancellationToken,
    ) -> Option<Selection> {
        self.iterations = 0;
        self.best = None;

        let (termination, found) = self.search(strategy, cancel);
        self.termination = Some(termination);

        match termination {
            SearchTermination::Cancelled => {
                self.observer.on_cancelled(&self.info(strategy), self.iterations)
            }
            SearchTermination::BudgetExhausted => {
                self.observer.on_budget_exhausted(&self.info(strategy), self.iterations)
            }
            SearchTermination::Matched | SearchTermination::Exhausted => {}
        }
        found
    }

    fn info(&self, strategy: &SelectionStrategy) -> SearchInfo {
        self.info.clone().unwrap_or_else(|| SearchInfo {
            group: SearchGroup::AllCoins,
            kind: strategy.kind(),
            candidate_count: strategy.parameters().len(),
        })
    }

    fn search(
        &mut self,
        strategy: &SelectionStrategy,
        cancel: &CancellationToken,
    ) -> (SearchTermination, Option<Selection>) {
        let parameters = strategy.parameters();
        let values = parameters.values();
        let costs = parameters.costs();
        let n = values.len();
        let max_inputs = parameters.max_input_count();
        let (lower, upper) = strategy.band();

        // suffix[i] is the value of every candidate from i onwards.
        let mut suffix = vec![0i64; n + 1];
        for i in (0..n).rev() {
            suffix[i] = suffix[i + 1].saturating_add(values[i]);
        }

        let mut selection: Vec<usize> = Vec::with_capacity(max_inputs.min(n));
        let mut sum = 0i64;
        let mut next = 0usize;

        loop {
            if self.iterations >= self.max_iterations {
                return (SearchTermination::BudgetExhausted, None);
            }
            if self.iterations % self.check_interval == 0 && cancel.is_cancelled() {
                return (SearchTermination::Cancelled, None);
            }
            self.iterations += 1;

            let mut include = None;
            if selection.len() < max_inputs && next < n {
                // Invariant: sum < lower <= upper, so there is always room.
                let room = upper - sum;
                let fits = next + values[next..].partition_point(|value| *value > room);

                if strategy.allows_overshoot() && fits > next {
                    self.consider(strategy, &suffix, &selection, sum, fits - 1..fits);
                }

                if fits < n {
                    if sum.saturating_add(suffix[fits]) >= lower {
                        include = Some(fits);
                    } else {
                        // The band is out of reach below here; the largest
                        // coins that still fit are the closest this subtree gets.
                        let take = (max_inputs - selection.len()).min(n - fits);
                        self.consider(strategy, &suffix, &selection, sum, fits..fits + take);
                    }
                }
            }

            if let Some(position) = include {
                selection.push(position);
                sum += values[position];
                next = position + 1;

                if strategy.is_within_band(sum) {
                    let found = Selection::from_positions(parameters, selection);
                    return (SearchTermination::Matched, Some(found));
                }
                self.consider(strategy, &suffix, &selection, sum, next..next);
                continue;
            }

            let Some(position) = selection.pop() else {
                return (SearchTermination::Exhausted, None);
            };
            sum -= values[position];
            next = position + 1;
            // Excluding a coin and then including an identical one explores
            // the same sums again.
            while next < n && values[next] == values[position] && costs[next] == costs[position] {
                next += 1;
            }
        }
    }

    /// Offers `selection` plus the candidates in `extra` to the best-effort record.
    fn consider(
        &mut self,
        strategy: &SelectionStrategy,
        suffix: &[i64],
        selection: &[usize],
        sum: i64,
        extra: Range<usize>,
    ) {
        let candidate_sum = sum.saturating_add(suffix[extra.start] - suffix[extra.end]);
        if !strategy.is_best_effort_eligible(candidate_sum) {
            return;
        }
        let target = strategy.target();
        if let Some(best) = &self.best {
            if candidate_sum.abs_diff(target) > best.sum.abs_diff(target) {
                return;
            }
        }

        let positions = selection.iter().copied().chain(extra).collect();
        let candidate = Selection::from_positions(strategy.parameters(), positions);
        if strategy.is_better_than_best(&candidate, self.best.as_ref()) {
            self.best = Some(candidate);
        }
    }
}

/// Re-runs the search with each tolerance in turn until one yields a match.
///
/// Every run uses the iteration budget and best-effort bounds of `config`.
/// The schedule is entirely the caller's: any finite or lazily infinite
/// sequence works, and cancelling `cancel` stops between and within runs.
pub fn find_with_tolerance_schedule(
    config: &SelectorConfig,
    kind: StrategyKind,
    parameters: &StrategyParameters,
    tolerances: impl IntoIterator<Item = u64>,
    cancel: &CancellationToken,
) -> Option<(u64, Selection)> {
    for tolerance in tolerances {
        if cancel.is_cancelled() {
            return None;
        }
        let strategy = SelectionStrategy::from_config(kind, parameters.clone(), tolerance, config);
        let mut solver = BranchAndBound::from_config(config);
        if let Some(found) = solver.try_get_match(&strategy, cancel) {
            return Some((tolerance, found));
        }
    }
    None
}
