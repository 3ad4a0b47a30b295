use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::hashes::Hash;
use bitcoin::{Amount, FeeRate, OutPoint, ScriptBuf, TxOut, Txid, WPubkeyHash};
use futures_util::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use changeless_coin_select::value::{effective_value, target_value};
use changeless_coin_select::{
    CancellationToken, ChangelessCoinSelector, SearchGroup, SearchInfo, SearchObserver, SearchOutcome,
    SelectorConfig, StrategyKind, WalletCoin,
};

fn script(tag: u8) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([tag; 20]))
}

fn coin(vout: u32, sats: u64, script_pubkey: &ScriptBuf) -> WalletCoin {
    WalletCoin::new(
        OutPoint { txid: Txid::all_zeros(), vout },
        TxOut { value: Amount::from_sat(sats), script_pubkey: script_pubkey.clone() },
    )
}

fn payment(sats: u64) -> TxOut {
    TxOut { value: Amount::from_sat(sats), script_pubkey: script(0xee) }
}

#[derive(Default)]
struct RecordingObserver {
    dispatched: Mutex<Vec<SearchInfo>>,
    cancelled: AtomicUsize,
    budget_exhausted: AtomicUsize,
}

impl SearchObserver for RecordingObserver {
    fn on_dispatch(&self, search: &SearchInfo) {
        self.dispatched.lock().unwrap().push(search.clone());
    }

    fn on_cancelled(&self, _search: &SearchInfo, _iterations: usize) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn on_budget_exhausted(&self, _search: &SearchInfo, _iterations: usize) {
        self.budget_exhausted.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecordingObserver {
    async fn wait_for_cancelled(&self, expected: usize) -> usize {
        for _ in 0..500 {
            if self.cancelled.load(Ordering::SeqCst) >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Panics when a "more" search finishes, failing its task.
struct PanicOnMore;

impl SearchObserver for PanicOnMore {
    fn on_finished(&self, search: &SearchInfo, _outcome: &SearchOutcome) {
        if search.kind == StrategyKind::More {
            panic!("more search failed");
        }
    }
}

/// Even amounts on one script: an odd payment can never be matched, so
/// searches only stop on cancellation or budget.
fn unmatchable_wallet(count: u32, largest: u64) -> Vec<WalletCoin> {
    let only = script(4);
    (0..count).map(|i| coin(i, largest - 2 * u64::from(i), &only)).collect()
}

async fn collect<'a>(
    selector: &ChangelessCoinSelector,
    coins: &'a [WalletCoin],
    fee_rate: FeeRate,
    payment: &TxOut,
    max_input_count: usize,
) -> Vec<Vec<&'a WalletCoin>> {
    let cancel = CancellationToken::new();
    selector.candidates(coins, fee_rate, payment, max_input_count, &cancel).collect().await
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_wallet_yields_nothing() {
    let selector = ChangelessCoinSelector::default();
    let found = collect(&selector, &[], FeeRate::ZERO, &payment(10_000), 10).await;
    assert!(found.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_target_yields_nothing() {
    let coins = vec![coin(0, 5_000, &script(1))];
    let selector = ChangelessCoinSelector::default();
    let found = collect(&selector, &coins, FeeRate::ZERO, &payment(0), 10).await;
    assert!(found.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn small_script_groups_are_skipped() {
    let big = script(1);
    let small = script(2);
    let coins = vec![coin(0, 60_000, &big), coin(1, 1_000, &small), coin(2, 50_000, &big)];

    let observer = Arc::new(RecordingObserver::default());
    let selector = ChangelessCoinSelector::new(SelectorConfig::default()).with_observer(observer.clone());
    collect(&selector, &coins, FeeRate::ZERO, &payment(100_000), 10).await;

    let dispatched = observer.dispatched.lock().unwrap();
    let groups: Vec<&SearchGroup> = dispatched.iter().map(|info| &info.group).collect();
    assert_eq!(dispatched.len(), 4);
    assert_eq!(groups.iter().filter(|group| ***group == SearchGroup::Script(big.clone())).count(), 2);
    assert_eq!(groups.iter().filter(|group| ***group == SearchGroup::AllCoins).count(), 2);
    assert!(!groups.contains(&&SearchGroup::Script(small)));
}

#[tokio::test(flavor = "multi_thread")]
async fn single_script_wallet_is_searched_once() {
    let only = script(3);
    let coins: Vec<WalletCoin> = (0..6).map(|i| coin(i, 10_000 + u64::from(i) * 1_000, &only)).collect();

    let observer = Arc::new(RecordingObserver::default());
    let selector = ChangelessCoinSelector::default().with_observer(observer.clone());
    let found = collect(&selector, &coins, FeeRate::ZERO, &payment(33_000), 10).await;

    let dispatched = observer.dispatched.lock().unwrap();
    assert_eq!(dispatched.len(), 2);
    assert!(dispatched.iter().all(|info| info.group == SearchGroup::AllCoins));
    assert!(found.iter().any(|subset| subset.iter().map(|c| c.txout.value.to_sat()).sum::<u64>() == 33_000));
}

#[tokio::test(flavor = "multi_thread")]
async fn equal_amounts_map_back_to_distinct_coins() {
    let coins = vec![
        coin(0, 5_000, &script(1)),
        coin(1, 5_000, &script(2)),
        coin(2, 3_000, &script(3)),
    ];
    let selector = ChangelessCoinSelector::default();
    let found = collect(&selector, &coins, FeeRate::ZERO, &payment(10_000), 10).await;

    let exact = found
        .iter()
        .find(|subset| subset.iter().map(|c| c.txout.value.to_sat()).sum::<u64>() == 10_000)
        .unwrap();
    let outpoints: HashSet<OutPoint> = exact.iter().map(|c| c.outpoint).collect();
    assert_eq!(outpoints.len(), 2);
    assert!(!outpoints.contains(&coins[2].outpoint));
}

#[tokio::test(flavor = "multi_thread")]
async fn candidates_are_valid_and_unique() {
    let mut rng = StdRng::seed_from_u64(11);
    let scripts: Vec<ScriptBuf> = (0..4).map(script).collect();
    let coins: Vec<WalletCoin> = (0..60)
        .map(|vout| coin(vout, rng.gen_range(2_000..=400_000), &scripts[rng.gen_range(0..scripts.len())]))
        .collect();
    let fee_rate = FeeRate::from_sat_per_vb_unchecked(5);
    let payment = payment(750_000);
    let target = target_value(&payment, fee_rate);
    let max_input_count = 6;

    let selector = ChangelessCoinSelector::default();
    let found = collect(&selector, &coins, fee_rate, &payment, max_input_count).await;
    assert!(!found.is_empty());

    let mut seen = HashSet::new();
    for subset in &found {
        let outpoints: Vec<OutPoint> = subset.iter().map(|c| c.outpoint).collect();
        let mut key = outpoints.clone();
        key.sort();
        assert!(seen.insert(key), "subset yielded twice");
        assert_eq!(outpoints.iter().collect::<HashSet<_>>().len(), outpoints.len());
        assert!(subset.len() <= max_input_count);

        let sum: i64 = subset.iter().map(|c| effective_value(*c, fee_rate)).sum();
        assert!(sum * 100 >= target * 75, "{sum} too far below {target}");
        assert!(sum * 100 <= target * 125, "{sum} too far above {target}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_token_yields_nothing() {
    let coins = vec![coin(0, 6_000, &script(1)), coin(1, 4_000, &script(1)), coin(2, 3_000, &script(2))];
    let selector = ChangelessCoinSelector::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let found: Vec<Vec<&WalletCoin>> =
        selector.candidates(&coins, FeeRate::ZERO, &payment(10_000), 10, &cancel).collect().await;
    assert!(found.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_stream_stops_searches() {
    let coins = unmatchable_wallet(10_000, 20_000);
    let observer = Arc::new(RecordingObserver::default());
    let selector = ChangelessCoinSelector::new(SelectorConfig::default().with_max_iterations(usize::MAX))
        .with_observer(observer.clone());

    let cancel = CancellationToken::new();
    let mut stream = Box::pin(selector.candidates(&coins, FeeRate::ZERO, &payment(1_000_001), 10_000, &cancel));
    let polled = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
    assert!(polled.is_err(), "searches should still be running");
    assert_eq!(observer.cancelled.load(Ordering::SeqCst), 0);

    drop(stream);
    assert_eq!(observer.wait_for_cancelled(2).await, 2);
    assert!(!cancel.is_cancelled());
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_mid_stream_ends_it_without_results() {
    let coins = unmatchable_wallet(10_000, 20_000);
    let observer = Arc::new(RecordingObserver::default());
    let selector = ChangelessCoinSelector::new(SelectorConfig::default().with_max_iterations(usize::MAX))
        .with_observer(observer.clone());

    let cancel = CancellationToken::new();
    let mut stream = Box::pin(selector.candidates(&coins, FeeRate::ZERO, &payment(1_000_001), 10_000, &cancel));
    assert!(tokio::time::timeout(Duration::from_millis(200), stream.next()).await.is_err());

    // Both searches have a best effort by now; cancelled ones still yield nothing.
    cancel.cancel();
    let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await.unwrap();
    assert!(next.is_none());
    assert_eq!(observer.cancelled.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn budget_exhausted_searches_yield_best_effort() {
    let coins = unmatchable_wallet(100, 1_000);
    let observer = Arc::new(RecordingObserver::default());
    let selector = ChangelessCoinSelector::new(SelectorConfig::default().with_max_iterations(10))
        .with_observer(observer.clone());

    let target = 3_001;
    let found = collect(&selector, &coins, FeeRate::ZERO, &payment(target), 10).await;

    assert_eq!(observer.budget_exhausted.load(Ordering::SeqCst), 2);
    assert_eq!(observer.cancelled.load(Ordering::SeqCst), 0);
    assert!(!found.is_empty());
    for subset in &found {
        let sum = subset.iter().map(|c| c.txout.value.to_sat()).sum::<u64>();
        assert_ne!(sum, target);
        assert!(sum * 100 >= target * 75 && sum * 100 <= target * 125, "{sum} outside best-effort bounds");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn coins_below_their_spend_fee_are_never_searched() {
    let dust = coin(0, 5_000, &script(1));
    let coins = vec![dust.clone(), coin(1, 60_000, &script(2)), coin(2, 50_000, &script(3))];
    // 100 sat/vB: a P2WPKH input costs 6 800 sats.
    let fee_rate = FeeRate::from_sat_per_vb_unchecked(100);

    let observer = Arc::new(RecordingObserver::default());
    let selector = ChangelessCoinSelector::default().with_observer(observer.clone());
    let found = collect(&selector, &coins, fee_rate, &payment(90_000), 10).await;

    assert!(effective_value(&dust, fee_rate) < 0);
    let dispatched = observer.dispatched.lock().unwrap();
    assert!(!dispatched.is_empty());
    assert!(dispatched.iter().all(|info| info.candidate_count == 2));
    assert!(!found.is_empty());
    assert!(found.iter().flatten().all(|c| c.outpoint != dust.outpoint));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_search_task_is_skipped() {
    let coins = vec![
        coin(0, 5_000, &script(1)),
        coin(1, 5_000, &script(2)),
        coin(2, 3_000, &script(3)),
    ];
    let selector = ChangelessCoinSelector::default().with_observer(Arc::new(PanicOnMore));
    let found = collect(&selector, &coins, FeeRate::ZERO, &payment(10_000), 10).await;

    // Only the "less" search survives to report the pair.
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].iter().map(|c| c.txout.value.to_sat()).sum::<u64>(), 10_000);
}
