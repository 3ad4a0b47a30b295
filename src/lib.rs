//! Changeless coin selection.
//!
//! Given a wallet's spendable coins, a fee rate and a payment, search for
//! coin subsets whose effective value pays the output without leaving
//! anything for a change output. The search is a bounded branch and bound
//! run concurrently per script group and strategy; results stream back as
//! they complete.
//!
//! ```no_run
//! # use changeless_coin_select::{CancellationToken, ChangelessCoinSelector, WalletCoin};
//! # use bitcoin::{FeeRate, TxOut};
//! # use futures_util::StreamExt;
//! # async fn demo(coins: Vec<WalletCoin>, payment: TxOut) {
//! let selector = ChangelessCoinSelector::default();
//! let cancel = CancellationToken::new();
//! let fee_rate = FeeRate::from_sat_per_vb_unchecked(5);
//! let mut candidates = Box::pin(selector.candidates(&coins, fee_rate, &payment, 10, &cancel));
//! while let Some(subset) = candidates.next().await {
//!     println!("{} inputs", subset.len());
//! }
//! # }
//! ```

pub mod bnb;
pub mod cancel;
pub mod changeless;
pub mod config;
pub mod error;
pub mod observer;
pub mod strategy;
pub mod value;

pub use bnb::{find_with_tolerance_schedule, BranchAndBound, SearchOutcome, SearchReport, SearchTermination};
pub use cancel::CancellationToken;
pub use changeless::{ChangelessCoinSelector, PlannedSearch};
pub use config::SelectorConfig;
pub use error::SelectionError;
pub use observer::{NoopObserver, SearchGroup, SearchInfo, SearchObserver, TracingObserver};
pub use strategy::{Selection, SelectionStrategy, StrategyKind, StrategyParameters};
pub use value::{SpendableCoin, WalletCoin};
