use std::collections::BTreeMap;
use std::fmt;

use bitcoin::hashes::Hash;
use bitcoin::{ScriptBuf, WPubkeyHash};
use serde::{Serialize, Serializer};
use statistical::{mean, standard_deviation};

/// One scenario row: a positive amount is a deposit, a negative one a payment.
#[derive(Debug, serde::Deserialize, Clone)]
pub struct ScenarioEntry {
    pub amount: f64,
    pub fee_rate_per_kvb: f32,
}

#[derive(Debug, Clone)]
pub struct PendingPayment {
    pub amount: u64,
    pub script_pubkey: ScriptBuf,
}

/// Deterministic P2WPKH script, distinct per `(tag, index)`.
pub fn p2wpkh_script(tag: u8, index: u64) -> ScriptBuf {
    let mut bytes = [0u8; 20];
    bytes[0] = tag;
    bytes[1..9].copy_from_slice(&index.to_le_bytes());
    ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(bytes))
}

/// How a payment was funded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentAlgorithm {
    Changeless,
    LargestFirst,
    #[default]
    Failed,
}

impl fmt::Display for PaymentAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentAlgorithm::Changeless => "changeless",
            PaymentAlgorithm::LargestFirst => "largest_first",
            PaymentAlgorithm::Failed => "failed",
        })
    }
}

fn serialize_input_count<S: Serializer>(inputs: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
    let count = (!inputs.is_empty()).then_some(inputs.len());
    count.serialize(serializer)
}

/// Outcome of one payment attempt, one `full_results.csv` row.
#[derive(Debug, Default, Serialize)]
pub struct PaymentRecord {
    pub id: usize,
    pub amount: u64,
    pub fee: Option<i64>,
    pub target_feerate: f32,
    pub real_feerate: Option<f32>,
    pub algorithm: PaymentAlgorithm,
    #[serde(rename = "input_count", serialize_with = "serialize_input_count")]
    pub inputs: Vec<u64>,
    pub negative_effective_valued_inputs: Option<usize>,
    pub output_count: Option<usize>,
    pub change_amount: Option<u64>,
    pub utxo_count_before_payment: usize,
    pub utxo_count_after_payment: usize,
    pub changeless_candidates: usize,
    /// Effective value spent beyond the target by a changeless payment.
    pub overpayment: Option<i64>,
    #[serde(skip)]
    pub cost_to_empty_at_long_term_feerate: f32,
    #[serde(skip)]
    pub balance: u64,
}

/// Running totals over a simulation.
#[derive(Debug, Default)]
pub struct SimulationStats {
    pub scenario_file: String,
    pub deposit_count: usize,
    usage: BTreeMap<PaymentAlgorithm, u32>,
    balance: u64,
    utxo_count: usize,
    cost_to_empty: f32,
    negative_inputs: usize,
    changeless_count: usize,
    total_fees: f32,
    total_overpayment: i64,
    change_values: Vec<u64>,
    input_set_sizes: Vec<usize>,
}

/// A `results.csv` row.
#[derive(Debug, Serialize)]
pub struct StatsRow<'a> {
    scenario_file: &'a str,
    current_balance: u64,
    current_utxo_set_count: usize,
    deposit_count: usize,
    inputs_spent_count: usize,
    withdraw_count: usize,
    negative_effective_valued_inputs_count: usize,
    created_change_outputs_count: usize,
    changeless_transaction_count: usize,
    min_change_value: Option<u64>,
    max_change_value: Option<u64>,
    mean_change_value: f32,
    std_dev_of_change_value: Option<f32>,
    total_fees: f32,
    total_overpayment: i64,
    mean_fees_per_withdraw: f32,
    cost_to_empty_at_long_term_fee_rate: f32,
    total_cost: f32,
    min_input_set_size: Option<usize>,
    max_input_set_size: Option<usize>,
    mean_input_set_size: f32,
    std_dev_of_input_set_size: Option<f32>,
    usage: String,
}

fn mean_and_std_dev(values: &[f32]) -> (f32, Option<f32>) {
    match values {
        [] => (0.0, None),
        [only] => (*only, None),
        _ => (mean(values), Some(standard_deviation(values, None))),
    }
}

impl SimulationStats {
    pub fn record(&mut self, payment: &PaymentRecord) {
        *self.usage.entry(payment.algorithm).or_default() += 1;

        self.balance = payment.balance;
        self.utxo_count = payment.utxo_count_after_payment;
        self.cost_to_empty = payment.cost_to_empty_at_long_term_feerate;

        if payment.algorithm == PaymentAlgorithm::Failed {
            return;
        }

        self.negative_inputs += payment.negative_effective_valued_inputs.unwrap_or(0);
        self.total_fees += payment.fee.unwrap_or(0) as f32;
        self.total_overpayment += payment.overpayment.unwrap_or(0);
        match payment.change_amount {
            Some(change) => self.change_values.push(change),
            None => self.changeless_count += 1,
        }
        if !payment.inputs.is_empty() {
            self.input_set_sizes.push(payment.inputs.len());
        }
    }

    pub fn withdraw_count(&self) -> usize {
        self.changeless_count + self.change_values.len()
    }

    pub fn changeless_count(&self) -> usize {
        self.changeless_count
    }

    /// Algorithm frequencies as `name: count` pairs in a fixed order.
    pub fn usage(&self) -> String {
        self.usage
            .iter()
            .map(|(algorithm, count)| format!("{}: {}", algorithm, count))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn row(&self) -> StatsRow<'_> {
        let change_values: Vec<f32> = self.change_values.iter().map(|x| *x as f32).collect();
        let input_set_sizes: Vec<f32> = self.input_set_sizes.iter().map(|x| *x as f32).collect();
        let (mean_change_value, std_dev_of_change_value) = mean_and_std_dev(&change_values);
        let (mean_input_set_size, std_dev_of_input_set_size) = mean_and_std_dev(&input_set_sizes);

        let withdraw_count = self.withdraw_count();
        let mean_fees_per_withdraw =
            if withdraw_count > 0 { self.total_fees / withdraw_count as f32 } else { 0.0 };

        StatsRow {
            scenario_file: &self.scenario_file,
            current_balance: self.balance,
            current_utxo_set_count: self.utxo_count,
            deposit_count: self.deposit_count,
            inputs_spent_count: self.input_set_sizes.iter().sum(),
            withdraw_count,
            negative_effective_valued_inputs_count: self.negative_inputs,
            created_change_outputs_count: self.change_values.len(),
            changeless_transaction_count: self.changeless_count,
            min_change_value: self.change_values.iter().min().copied(),
            max_change_value: self.change_values.iter().max().copied(),
            mean_change_value,
            std_dev_of_change_value,
            total_fees: self.total_fees,
            total_overpayment: self.total_overpayment,
            mean_fees_per_withdraw,
            cost_to_empty_at_long_term_fee_rate: self.cost_to_empty,
            total_cost: self.total_fees + self.cost_to_empty,
            min_input_set_size: self.input_set_sizes.iter().min().copied(),
            max_input_set_size: self.input_set_sizes.iter().max().copied(),
            mean_input_set_size,
            std_dev_of_input_set_size,
            usage: self.usage(),
        }
    }
}
