use std::fs::{self, File, OpenOptions};
use std::path::Path;

use anyhow::Context;
use bitcoin::amount::{Amount, Denomination};
use csv::Writer;

use crate::models::{p2wpkh_script, PaymentAlgorithm, PendingPayment, ScenarioEntry, SimulationStats};
use crate::selectors::TargetSelector;
use crate::PaymentPolicy;

const PAYEE_SCRIPT_TAG: u8 = 0;
const SAMPLE_INTERVAL: usize = 500;

struct SimulationRecorder {
    utxos_writer: Writer<File>,
    inputs_writer: Writer<File>,
    samples_writer: Writer<File>,
    results_writer: Writer<File>,
}

fn create_writer(output_path: &Path, name: &str, has_headers: bool) -> anyhow::Result<Writer<File>> {
    let path = output_path.join(name);
    let file = OpenOptions::new()
        .create_new(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    Ok(csv::WriterBuilder::new().has_headers(has_headers).from_writer(file))
}

impl SimulationRecorder {
    fn new(output_path: &Path) -> anyhow::Result<SimulationRecorder> {
        fs::create_dir_all(output_path)
            .with_context(|| format!("cannot create output directory {}", output_path.display()))?;

        Ok(SimulationRecorder {
            utxos_writer: create_writer(output_path, "utxos.csv", false)?,
            inputs_writer: create_writer(output_path, "inputs.csv", false)?,
            samples_writer: create_writer(output_path, "results.csv", true)?,
            results_writer: create_writer(output_path, "full_results.csv", true)?,
        })
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.utxos_writer.flush()?;
        self.inputs_writer.flush()?;
        self.samples_writer.flush()?;
        self.results_writer.flush()?;

        Ok(())
    }
}

fn format_amounts(amounts: impl IntoIterator<Item = u64>) -> String {
    amounts
        .into_iter()
        .map(|x| Amount::from_sat(x).to_string_in(Denomination::Satoshi))
        .collect::<Vec<String>>()
        .join(",")
}

pub struct Simulation<'a> {
    pub payment_policy: PaymentPolicy,
    pub selector: &'a mut (dyn TargetSelector + 'a),
}

impl Simulation<'_> {
    pub fn run(&mut self, input_path: &Path, output_path: &Path) -> anyhow::Result<()> {
        let mut stats = SimulationStats::default();
        stats.scenario_file = input_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let scenario_file = File::open(input_path)
            .with_context(|| format!("cannot open scenario {}", input_path.display()))?;
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(scenario_file);

        let mut payments: Vec<PendingPayment> = Vec::new();
        let mut withdraw_attempt: usize = 0;
        let mut simulation_recorder = SimulationRecorder::new(output_path)?;

        for result in reader.deserialize() {
            let record: ScenarioEntry = result?;

            if record.amount > 0.0 {
                stats.deposit_count += 1;
                self.selector.deposit(record)?;
                continue;
            }

            withdraw_attempt += 1;

            payments.push(PendingPayment {
                amount: Amount::from_btc(-record.amount)
                    .with_context(|| format!("invalid payment amount {}", record.amount))?
                    .to_sat(),
                script_pubkey: p2wpkh_script(PAYEE_SCRIPT_TAG, withdraw_attempt as u64),
            });

            simulation_recorder
                .utxos_writer
                .serialize((withdraw_attempt, format_amounts(self.selector.values())))?;

            let mut payment_record = self.selector.withdraw(&payments, record.fee_rate_per_kvb);

            match self.payment_policy {
                PaymentPolicy::Drop => payments.clear(),
                PaymentPolicy::RollForward if payment_record.algorithm != PaymentAlgorithm::Failed => payments.clear(),
                PaymentPolicy::RollForward => {
                    tracing::debug!(pending = payments.len(), "rolling failed payments forward")
                }
            }

            payment_record.id = withdraw_attempt;
            stats.record(&payment_record);

            simulation_recorder
                .inputs_writer
                .serialize((withdraw_attempt, format_amounts(payment_record.inputs.iter().copied())))?;

            if withdraw_attempt % SAMPLE_INTERVAL == 0 {
                tracing::info!(withdraw_attempt, usage = %stats.usage(), "simulation progress");
                simulation_recorder.samples_writer.serialize(stats.row())?;
            }

            simulation_recorder.results_writer.serialize(&payment_record)?;
        }

        simulation_recorder.samples_writer.serialize(stats.row())?;
        simulation_recorder.flush()?;

        tracing::info!(
            deposits = stats.deposit_count,
            withdrawals = stats.withdraw_count(),
            changeless = stats.changeless_count(),
            "simulation finished"
        );

        Ok(())
    }
}
