pub mod changeless;

use crate::models::{PaymentRecord, PendingPayment, ScenarioEntry};

pub trait TargetSelector {
    fn deposit(&mut self, deposit: ScenarioEntry) -> anyhow::Result<()>;
    fn withdraw(&mut self, payments: &[PendingPayment], fee_rate_per_kvb: f32) -> PaymentRecord;
    fn values(&self) -> Vec<u64>;
}
