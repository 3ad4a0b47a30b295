//! Fans branch-and-bound searches out over script groups and streams back
//! every coin subset that can pay without a change output.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitcoin::{FeeRate, Script, TxOut};
use futures_util::stream::{self, Stream};
use tokio::task::JoinSet;

use crate::bnb::{BranchAndBound, SearchOutcome, SearchReport, SearchTermination};
use crate::cancel::{CancelOnDrop, CancellationToken};
use crate::config::SelectorConfig;
use crate::observer::{SearchGroup, SearchInfo, SearchObserver, TracingObserver};
use crate::strategy::{SelectionStrategy, StrategyKind, StrategyParameters};
use crate::value::{effective_value, input_cost, target_value, SpendableCoin};

/// One (group, strategy) search, ready to dispatch.
#[derive(Debug, Clone)]
pub struct PlannedSearch {
    pub info: SearchInfo,
    pub strategy: SelectionStrategy,
    // Index into the caller's coins for every strategy position.
    coin_indices: Vec<usize>,
}

impl PlannedSearch {
    pub fn coin_indices(&self) -> &[usize] {
        &self.coin_indices
    }
}

#[derive(Clone)]
pub struct ChangelessCoinSelector {
    config: SelectorConfig,
    observer: Arc<dyn SearchObserver>,
}

impl Default for ChangelessCoinSelector {
    fn default() -> Self {
        Self::new(SelectorConfig::default())
    }
}

impl ChangelessCoinSelector {
    pub fn new(config: SelectorConfig) -> Self {
        ChangelessCoinSelector { config, observer: Arc::new(TracingObserver) }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SearchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Groups `coins` and builds both strategies for every useful script
    /// group, followed by the whole coin set. Empty when there is nothing
    /// worth searching.
    pub fn plan<C: SpendableCoin>(
        &self,
        coins: &[C],
        fee_rate: FeeRate,
        payment: &TxOut,
        max_input_count: usize,
    ) -> Vec<PlannedSearch> {
        let target = target_value(payment, fee_rate);
        if coins.is_empty() || target <= 0 || max_input_count == 0 {
            tracing::debug!(coins = coins.len(), target, max_input_count, "nothing to search");
            return Vec::new();
        }

        let mut by_script: HashMap<&Script, Vec<usize>> = HashMap::new();
        for (index, coin) in coins.iter().enumerate() {
            by_script.entry(coin.script_pubkey()).or_default().push(index);
        }

        let mut groups: Vec<(u64, &Script, Vec<usize>)> = by_script
            .into_iter()
            .map(|(script, indices)| {
                let total = indices
                    .iter()
                    .fold(0u64, |acc, i| acc.saturating_add(coins[*i].amount().to_sat()));
                (total, script, indices)
            })
            .filter(|(total, script, _)| {
                let useful = self.config.is_group_useful(*total, target);
                if !useful {
                    tracing::trace!(script = %format!("{:x}", script), total, target, "skipping script group");
                }
                useful
            })
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.as_bytes().cmp(b.1.as_bytes())));

        let mut searches = Vec::new();
        for (_, script, indices) in &groups {
            // A group holding every coin is searched as the whole set below.
            if indices.len() == coins.len() {
                continue;
            }
            let group = SearchGroup::Script((*script).to_owned());
            searches.extend(self.plan_group(group, coins, indices, fee_rate, target, max_input_count));
        }

        let everything: Vec<usize> = (0..coins.len()).collect();
        searches.extend(self.plan_group(
            SearchGroup::AllCoins,
            coins,
            &everything,
            fee_rate,
            target,
            max_input_count,
        ));
        searches
    }

    fn plan_group<C: SpendableCoin>(
        &self,
        group: SearchGroup,
        coins: &[C],
        indices: &[usize],
        fee_rate: FeeRate,
        target: i64,
        max_input_count: usize,
    ) -> Vec<PlannedSearch> {
        // Coins worth less than their spend fee can never help.
        let usable: Vec<(usize, i64, i64)> = indices
            .iter()
            .filter_map(|i| {
                let value = effective_value(&coins[*i], fee_rate);
                let cost = i64::try_from(input_cost(&coins[*i], fee_rate)).unwrap_or(i64::MAX);
                (value > 0).then_some((*i, value, cost))
            })
            .collect();
        if usable.is_empty() {
            return Vec::new();
        }

        let candidates = usable.iter().map(|(_, value, cost)| (*value, *cost));
        let (parameters, permutation) =
            match StrategyParameters::sorted(target, candidates, max_input_count) {
                Ok(sorted) => sorted,
                Err(error) => {
                    tracing::debug!(%group, %error, "cannot build selection strategies");
                    return Vec::new();
                }
            };
        let coin_indices: Vec<usize> = permutation.iter().map(|p| usable[*p].0).collect();

        let more_tolerance = self.config.more_tolerance.unwrap_or(0);
        let more =
            SelectionStrategy::from_config(StrategyKind::More, parameters.clone(), more_tolerance, &self.config);
        let less =
            SelectionStrategy::from_config(StrategyKind::Less, parameters, self.config.less_tolerance, &self.config);

        [more, less]
            .into_iter()
            .map(|strategy| PlannedSearch {
                info: SearchInfo {
                    group: group.clone(),
                    kind: strategy.kind(),
                    candidate_count: coin_indices.len(),
                },
                strategy,
                coin_indices: coin_indices.clone(),
            })
            .collect()
    }

    /// Lazily yields changeless candidate subsets of `coins`.
    ///
    /// Searches start on the first poll and run on the blocking pool of the
    /// current tokio runtime. Subsets arrive in completion order, each at
    /// most once. Cancelling `cancel` or dropping the stream stops every
    /// search still running; a cancelled search contributes nothing.
    pub fn candidates<'a, C: SpendableCoin>(
        &self,
        coins: &'a [C],
        fee_rate: FeeRate,
        payment: &TxOut,
        max_input_count: usize,
        cancel: &CancellationToken,
    ) -> impl Stream<Item = Vec<&'a C>> + 'a {
        let searches = self.plan(coins, fee_rate, payment, max_input_count);
        let cancel = cancel.child_token();

        let state = CandidateSearch {
            coins,
            pending: searches,
            coin_indices: Vec::new(),
            tasks: JoinSet::new(),
            seen: HashSet::new(),
            config: self.config,
            observer: Arc::clone(&self.observer),
            _stop_on_drop: cancel.clone().drop_guard(),
            cancel,
        };

        stream::unfold(state, |mut state| async move {
            state.dispatch();
            loop {
                let joined = match state.tasks.join_next().await {
                    Some(joined) => joined,
                    None => return None,
                };
                match joined {
                    Ok((index, report)) => {
                        if let Some(subset) = state.resolve(index, report) {
                            return Some((subset, state));
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "changeless search task failed");
                    }
                }
            }
        })
    }
}

struct CandidateSearch<'a, C> {
    coins: &'a [C],
    pending: Vec<PlannedSearch>,
    coin_indices: Vec<Vec<usize>>,
    tasks: JoinSet<(usize, SearchReport)>,
    seen: HashSet<Vec<usize>>,
    config: SelectorConfig,
    observer: Arc<dyn SearchObserver>,
    cancel: CancellationToken,
    _stop_on_drop: CancelOnDrop,
}

impl<'a, C> CandidateSearch<'a, C> {
    fn dispatch(&mut self) {
        for search in std::mem::take(&mut self.pending) {
            let index = self.coin_indices.len();
            self.coin_indices.push(search.coin_indices);
            self.observer.on_dispatch(&search.info);

            let config = self.config;
            let observer = Arc::clone(&self.observer);
            let cancel = self.cancel.clone();
            let PlannedSearch { info, strategy, .. } = search;
            self.tasks.spawn_blocking(move || {
                let report = BranchAndBound::from_config(&config)
                    .with_observer(observer, info)
                    .run(&strategy, &cancel);
                (index, report)
            });
        }
    }

    fn resolve(&mut self, index: usize, report: SearchReport) -> Option<Vec<&'a C>> {
        if report.termination == SearchTermination::Cancelled {
            return None;
        }
        let selection = match report.outcome {
            SearchOutcome::Found(selection) | SearchOutcome::BestEffort(selection) => selection,
            SearchOutcome::NoMatch => return None,
        };

        let mapping = &self.coin_indices[index];
        let picked: Vec<usize> = selection.positions.iter().map(|p| mapping[*p]).collect();

        let mut key = picked.clone();
        key.sort_unstable();
        if !self.seen.insert(key) {
            return None;
        }
        let coins = self.coins;
        Some(picked.into_iter().map(|i| &coins[i]).collect())
    }
}
