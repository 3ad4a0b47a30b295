//! Hooks for search events. The solver reports here instead of logging
//! directly, so it runs the same with or without a subscriber attached.

use bitcoin::ScriptBuf;

use crate::bnb::SearchOutcome;
use crate::strategy::StrategyKind;

/// Which coins a search runs over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SearchGroup {
    Script(ScriptBuf),
    AllCoins,
}

impl std::fmt::Display for SearchGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchGroup::Script(script) => write!(f, "script {:x}", script.as_script()),
            SearchGroup::AllCoins => write!(f, "all coins"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchInfo {
    pub group: SearchGroup,
    pub kind: StrategyKind,
    pub candidate_count: usize,
}

pub trait SearchObserver: Send + Sync {
    fn on_dispatch(&self, _search: &SearchInfo) {}

    fn on_cancelled(&self, _search: &SearchInfo, _iterations: usize) {}

    fn on_budget_exhausted(&self, _search: &SearchInfo, _iterations: usize) {}

    fn on_finished(&self, _search: &SearchInfo, _outcome: &SearchOutcome) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SearchObserver for NoopObserver {}

/// Forwards search events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SearchObserver for TracingObserver {
    fn on_dispatch(&self, search: &SearchInfo) {
        tracing::debug!(
            group = %search.group,
            strategy = %search.kind,
            candidates = search.candidate_count,
            "dispatching changeless search"
        );
    }

    fn on_cancelled(&self, search: &SearchInfo, iterations: usize) {
        tracing::info!(
            group = %search.group,
            strategy = %search.kind,
            iterations,
            "changeless search was cancelled or timed out"
        );
    }

    fn on_budget_exhausted(&self, search: &SearchInfo, iterations: usize) {
        tracing::debug!(
            group = %search.group,
            strategy = %search.kind,
            iterations,
            "changeless search ran out of iterations"
        );
    }

    fn on_finished(&self, search: &SearchInfo, outcome: &SearchOutcome) {
        match outcome {
            SearchOutcome::Found(selection) => tracing::debug!(
                group = %search.group,
                strategy = %search.kind,
                inputs = selection.len(),
                sum = selection.sum,
                "found changeless match"
            ),
            SearchOutcome::BestEffort(selection) => tracing::debug!(
                group = %search.group,
                strategy = %search.kind,
                inputs = selection.len(),
                sum = selection.sum,
                "using best-effort selection"
            ),
            SearchOutcome::NoMatch => tracing::trace!(
                group = %search.group,
                strategy = %search.kind,
                "no changeless selection"
            ),
        }
    }
}
