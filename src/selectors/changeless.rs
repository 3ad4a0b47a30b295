use std::cmp::Reverse;
use std::pin::pin;
use std::time::Duration;

use anyhow::Context;
use bitcoin::amount::Amount;
use bitcoin::hashes::Hash;
use bitcoin::{FeeRate, OutPoint, ScriptBuf, TxOut, Txid};
use futures_util::StreamExt;
use tokio::runtime::Runtime;

use changeless_coin_select::value::{
    effective_value, estimate_input_vsize, estimate_output_vsize, fee_for_vsize, input_cost,
    output_cost, target_value,
};
use changeless_coin_select::{CancellationToken, ChangelessCoinSelector, SelectorConfig, WalletCoin};

use crate::models::{p2wpkh_script, PaymentAlgorithm, PaymentRecord, PendingPayment, ScenarioEntry};
use crate::selectors::TargetSelector;

const DEPOSIT_SCRIPT_TAG: u8 = 1;
const CHANGE_SCRIPT_TAG: u8 = 2;
// Version, locktime, segwit marker and the in/out counts, rounded up.
const TX_OVERHEAD_VSIZE: u64 = 11;

/// Simulated wallet that pays without change whenever a changeless subset
/// turns up in time, and falls back to largest-first with change otherwise.
pub struct ChangelessWallet {
    runtime: Runtime,
    config: SelectorConfig,
    coins: Vec<WalletCoin>,
    outpoint_counter: u32,
    /// Deposits cycle through this many scripts; zero means a fresh script
    /// per deposit.
    pub address_reuse: usize,
    pub long_term_feerate: FeeRate,
    pub dust_limit: u64,
    pub max_input_count: usize,
    pub timeout: Duration,
}

impl ChangelessWallet {
    pub fn new(
        config: SelectorConfig,
        long_term_feerate: FeeRate,
        dust_limit: u64,
        max_input_count: usize,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .build()
            .context("failed to start the search runtime")?;

        Ok(ChangelessWallet {
            runtime,
            config,
            coins: Vec::default(),
            outpoint_counter: u32::default(),
            address_reuse: 0,
            long_term_feerate,
            dust_limit,
            max_input_count,
            timeout,
        })
    }

    fn receive(&mut self, value: u64, script_pubkey: ScriptBuf) {
        let outpoint = OutPoint { txid: Txid::all_zeros(), vout: self.outpoint_counter };
        self.outpoint_counter += 1;
        self.coins.push(WalletCoin::new(outpoint, TxOut { value: Amount::from_sat(value), script_pubkey }));
    }

    fn deposit_script(&self) -> ScriptBuf {
        let index = u64::from(self.outpoint_counter);
        match self.address_reuse {
            0 => p2wpkh_script(DEPOSIT_SCRIPT_TAG, index),
            pool => p2wpkh_script(DEPOSIT_SCRIPT_TAG, index % pool as u64),
        }
    }

    fn cost_to_empty_at_long_term_feerate(&self) -> f32 {
        self.coins.iter().map(|coin| input_cost(coin, self.long_term_feerate) as f32).sum()
    }

    fn balance(&self) -> u64 {
        self.values().iter().sum::<u64>()
    }

    /// Fee for adding a change output now plus spending it later.
    fn cost_of_change(&self, fee_rate: FeeRate) -> u64 {
        let change_script = p2wpkh_script(CHANGE_SCRIPT_TAG, 0);
        output_cost(&change_script, fee_rate)
            + fee_for_vsize(self.long_term_feerate, estimate_input_vsize(&change_script))
    }

    fn changeless_candidates(
        &self,
        selector: &ChangelessCoinSelector,
        payment: &TxOut,
        fee_rate: FeeRate,
    ) -> Vec<Vec<OutPoint>> {
        let coins = &self.coins;
        let max_input_count = self.max_input_count;
        let timeout = self.timeout;

        self.runtime.block_on(async {
            let cancel = CancellationToken::new();
            let mut candidates =
                pin!(selector.candidates(coins, fee_rate, payment, max_input_count, &cancel));
            let deadline = tokio::time::Instant::now() + timeout;
            let mut found: Vec<Vec<OutPoint>> = Vec::new();
            loop {
                match tokio::time::timeout_at(deadline, candidates.next()).await {
                    Ok(Some(subset)) => found.push(subset.iter().map(|coin| coin.outpoint).collect()),
                    Ok(None) => break,
                    Err(_) => {
                        tracing::info!(found = found.len(), "changeless search timed out");
                        cancel.cancel();
                        break;
                    }
                }
            }
            found
        })
    }

    /// Fewest inputs, then smallest overpayment within `max_excess`.
    fn pick_changeless(
        &self,
        candidates: &[Vec<OutPoint>],
        target: i64,
        fee_rate: FeeRate,
        max_excess: i64,
    ) -> Option<(Vec<OutPoint>, i64)> {
        candidates
            .iter()
            .filter_map(|outpoints| {
                let value: i64 = self
                    .coins
                    .iter()
                    .filter(|coin| outpoints.contains(&coin.outpoint))
                    .map(|coin| effective_value(coin, fee_rate))
                    .sum();
                let excess = value - target;
                (0..=max_excess).contains(&excess).then(|| (outpoints.clone(), excess))
            })
            .min_by_key(|(outpoints, excess)| (outpoints.len(), *excess))
    }

    /// Largest coins first until the payment and a change output are covered.
    fn largest_first(&self, target: i64, fee_rate: FeeRate) -> Option<(Vec<OutPoint>, Option<u64>)> {
        let change_cost = output_cost(&p2wpkh_script(CHANGE_SCRIPT_TAG, 0), fee_rate) as i64;

        let mut sorted: Vec<(&WalletCoin, i64)> = self
            .coins
            .iter()
            .map(|coin| (coin, effective_value(coin, fee_rate)))
            .filter(|(_, value)| *value > 0)
            .collect();
        sorted.sort_by_key(|(_, value)| Reverse(*value));

        let mut selected = Vec::new();
        let mut value = 0i64;
        for (coin, coin_value) in sorted {
            if value >= target + change_cost || selected.len() == self.max_input_count {
                break;
            }
            selected.push(coin.outpoint);
            value += coin_value;
        }
        if value < target {
            return None;
        }

        let change = value - target - change_cost;
        let change = u64::try_from(change).ok().filter(|change| *change >= self.dust_limit);
        Some((selected, change))
    }
}

impl TargetSelector for ChangelessWallet {
    fn values(&self) -> Vec<u64> {
        self.coins.iter().map(|coin| coin.txout.value.to_sat()).collect::<Vec<u64>>()
    }

    fn deposit(&mut self, record: ScenarioEntry) -> anyhow::Result<()> {
        let value = Amount::from_btc(record.amount)
            .with_context(|| format!("invalid deposit amount {}", record.amount))?;
        let script = self.deposit_script();
        self.receive(value.to_sat(), script);
        Ok(())
    }

    fn withdraw(&mut self, payments: &[PendingPayment], fee_rate_per_kvb: f32) -> PaymentRecord {
        // BTC/kvB to sat/kwu.
        let fee_rate = FeeRate::from_sat_per_kwu((f64::from(fee_rate_per_kvb) * 1e8 / 4.0).round() as u64);
        let amount = payments.iter().map(|x| x.amount).sum::<u64>();

        let mut withdraw = PaymentRecord {
            amount,
            target_feerate: fee_rate.to_sat_per_kwu() as f32 * 4.0 / 1000.0,
            utxo_count_before_payment: self.coins.len(),
            utxo_count_after_payment: self.coins.len(),
            cost_to_empty_at_long_term_feerate: self.cost_to_empty_at_long_term_feerate(),
            balance: self.balance(),
            ..Default::default()
        };

        let Some(first) = payments.first() else {
            withdraw.algorithm = PaymentAlgorithm::Failed;
            return withdraw;
        };

        // The selector funds one output; extra recipients and the transaction
        // overhead are folded into its value.
        let extra_fees = payments[1..]
            .iter()
            .map(|payment| output_cost(&payment.script_pubkey, fee_rate))
            .sum::<u64>()
            + fee_for_vsize(fee_rate, TX_OVERHEAD_VSIZE);
        let payment = TxOut {
            value: Amount::from_sat(amount + extra_fees),
            script_pubkey: first.script_pubkey.clone(),
        };
        let target = target_value(&payment, fee_rate);

        // Without a configured overpayment, accept up to what change would cost.
        let tolerance = self.config.more_tolerance.unwrap_or_else(|| self.cost_of_change(fee_rate));
        let selector = ChangelessCoinSelector::new(
            self.config.with_tolerances(tolerance, self.config.less_tolerance),
        );
        let candidates = self.changeless_candidates(&selector, &payment, fee_rate);
        withdraw.changeless_candidates = candidates.len();

        let max_excess = i64::try_from(tolerance).unwrap_or(i64::MAX);
        let (outpoints, change) = match self.pick_changeless(&candidates, target, fee_rate, max_excess) {
            Some((outpoints, excess)) => {
                withdraw.algorithm = PaymentAlgorithm::Changeless;
                withdraw.overpayment = Some(excess);
                (outpoints, None)
            }
            None => match self.largest_first(target, fee_rate) {
                Some(selection) => {
                    withdraw.algorithm = PaymentAlgorithm::LargestFirst;
                    selection
                }
                None => {
                    withdraw.algorithm = PaymentAlgorithm::Failed;
                    return withdraw;
                }
            },
        };

        let (spent, kept): (Vec<WalletCoin>, Vec<WalletCoin>) = std::mem::take(&mut self.coins)
            .into_iter()
            .partition(|coin| outpoints.contains(&coin.outpoint));
        self.coins = kept;

        let mut output_vsize = payments
            .iter()
            .map(|payment| estimate_output_vsize(&payment.script_pubkey))
            .sum::<u64>();
        if let Some(change) = change {
            let change_script = p2wpkh_script(CHANGE_SCRIPT_TAG, u64::from(self.outpoint_counter));
            output_vsize += estimate_output_vsize(&change_script);
            self.receive(change, change_script);
        }

        let input_total = spent.iter().map(|coin| coin.txout.value.to_sat()).sum::<u64>();
        let vsize = TX_OVERHEAD_VSIZE + spent.iter().map(|coin| coin.input_vsize).sum::<u64>() + output_vsize;
        let fee = input_total as i64 - amount as i64 - change.unwrap_or(0) as i64;

        tracing::debug!(
            algorithm = %withdraw.algorithm,
            inputs = spent.len(),
            fee,
            change = change.unwrap_or(0),
            "payment built"
        );

        withdraw.negative_effective_valued_inputs =
            Some(spent.iter().filter(|coin| effective_value(*coin, fee_rate) < 0).count());
        withdraw.inputs = spent.iter().map(|coin| coin.txout.value.to_sat()).collect::<Vec<u64>>();
        withdraw.fee = Some(fee);
        withdraw.real_feerate = Some(fee as f32 / vsize as f32);
        withdraw.output_count = Some(payments.len() + usize::from(change.is_some()));
        withdraw.change_amount = change;
        withdraw.utxo_count_after_payment = self.coins.len();
        withdraw
    }
}
