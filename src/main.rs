mod models;
mod selectors;
mod simulator;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::Context;
use bitcoin::FeeRate;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use changeless_coin_select::SelectorConfig;

use crate::selectors::changeless::ChangelessWallet;
use crate::simulator::Simulation;

/// What happens to a payment the wallet could not fund.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PaymentPolicy {
    /// Forget it.
    Drop,
    /// Retry it together with the next payment.
    RollForward,
}

/// Replays a deposit/withdrawal scenario against a wallet that pays without
/// change whenever it can.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Scenario CSV: one `amount,fee_rate_per_kvb` row per event, amounts in BTC.
    scenario: PathBuf,
    /// Directory for the result files. Must not already contain them.
    output: PathBuf,
    #[arg(long, value_enum, default_value_t = PaymentPolicy::Drop)]
    payment_policy: PaymentPolicy,
    /// One-row CSV with selector settings; flags below override it.
    #[arg(long, env = "CHANGELESS_SELECTOR_CONFIG")]
    selector_config: Option<PathBuf>,
    #[arg(long, default_value_t = 10)]
    max_inputs: usize,
    /// How long each payment may search for changeless candidates.
    #[arg(long, env = "CHANGELESS_TIMEOUT_MS", default_value_t = 500)]
    timeout_ms: u64,
    /// Overpayment accepted without change, in satoshis. Defaults to the
    /// cost of a change output at the payment's fee rate.
    #[arg(long)]
    more_tolerance: Option<u64>,
    #[arg(long)]
    less_tolerance: Option<u64>,
    #[arg(long, env = "CHANGELESS_MAX_ITERATIONS")]
    max_iterations: Option<usize>,
    #[arg(long)]
    group_usefulness_percent: Option<u64>,
    /// Number of deposit scripts to cycle through; 0 never reuses one.
    #[arg(long, default_value_t = 0)]
    address_reuse: usize,
    /// Fee rate for spending coins in the future, in sat/vB.
    #[arg(long, default_value_t = 10)]
    long_term_feerate: u64,
    #[arg(long, default_value_t = 526)]
    dust_limit: u64,
}

fn read_selector_config<R: io::Read>(reader: R) -> csv::Result<SelectorConfig> {
    let mut reader = csv::Reader::from_reader(reader);
    match reader.deserialize::<SelectorConfig>().next() {
        Some(config) => config,
        None => Ok(SelectorConfig::default()),
    }
}

fn load_selector_config(path: Option<&Path>) -> anyhow::Result<SelectorConfig> {
    let Some(path) = path else {
        return Ok(SelectorConfig::default());
    };
    let file = File::open(path).with_context(|| format!("cannot open selector config {}", path.display()))?;
    read_selector_config(file).with_context(|| format!("invalid selector config {}", path.display()))
}

/// Flags win over the selector config file.
fn apply_overrides(mut config: SelectorConfig, args: &Args) -> SelectorConfig {
    if let Some(more_tolerance) = args.more_tolerance {
        config.more_tolerance = Some(more_tolerance);
    }
    if let Some(less_tolerance) = args.less_tolerance {
        config.less_tolerance = less_tolerance;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(group_usefulness_percent) = args.group_usefulness_percent {
        config.group_usefulness_percent = group_usefulness_percent;
    }
    config
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = apply_overrides(load_selector_config(args.selector_config.as_deref())?, &args);
    tracing::debug!(?config, "selector settings");

    let long_term_feerate = FeeRate::from_sat_per_vb(args.long_term_feerate)
        .context("long-term fee rate is too large")?;

    let mut wallet = ChangelessWallet::new(
        config,
        long_term_feerate,
        args.dust_limit,
        args.max_inputs,
        Duration::from_millis(args.timeout_ms),
    )?;
    wallet.address_reuse = args.address_reuse;

    let mut simulation = Simulation { payment_policy: args.payment_policy, selector: &mut wallet };
    simulation.run(&args.scenario, &args.output)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        eprintln!("{:#}", err);
        process::exit(1);
    }
}
