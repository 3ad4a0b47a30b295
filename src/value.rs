//! Effective value and marginal cost of coins at a given fee rate.

use bitcoin::{Amount, FeeRate, OutPoint, Script, TxOut};

pub const P2WPKH_INPUT_VSIZE: u64 = 68;
pub const P2TR_INPUT_VSIZE: u64 = 58;
pub const P2PKH_INPUT_VSIZE: u64 = 148;
pub const P2SH_P2WPKH_INPUT_VSIZE: u64 = 91;
pub const P2WSH_INPUT_VSIZE: u64 = 104;

/// A spendable output owned by the wallet.
pub trait SpendableCoin {
    fn amount(&self) -> Amount;
    fn script_pubkey(&self) -> &Script;
    /// Virtual size this coin adds to a transaction when spent.
    fn input_vsize(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletCoin {
    pub outpoint: OutPoint,
    pub txout: TxOut,
    pub input_vsize: u64,
}

impl WalletCoin {
    /// Builds a coin whose spend size is guessed from its script type.
    pub fn new(outpoint: OutPoint, txout: TxOut) -> Self {
        let input_vsize = estimate_input_vsize(&txout.script_pubkey);
        WalletCoin { outpoint, txout, input_vsize }
    }
}

impl SpendableCoin for WalletCoin {
    fn amount(&self) -> Amount {
        self.txout.value
    }

    fn script_pubkey(&self) -> &Script {
        &self.txout.script_pubkey
    }

    fn input_vsize(&self) -> u64 {
        self.input_vsize
    }
}

impl<C: SpendableCoin + ?Sized> SpendableCoin for &C {
    fn amount(&self) -> Amount {
        (**self).amount()
    }

    fn script_pubkey(&self) -> &Script {
        (**self).script_pubkey()
    }

    fn input_vsize(&self) -> u64 {
        (**self).input_vsize()
    }
}

pub fn estimate_input_vsize(script: &Script) -> u64 {
    if script.is_p2wpkh() {
        P2WPKH_INPUT_VSIZE
    } else if script.is_p2tr() {
        P2TR_INPUT_VSIZE
    } else if script.is_p2sh() {
        P2SH_P2WPKH_INPUT_VSIZE
    } else if script.is_p2wsh() {
        P2WSH_INPUT_VSIZE
    } else {
        P2PKH_INPUT_VSIZE
    }
}

fn varint_size(v: usize) -> u64 {
    if v <= 0xfc {
        return 1;
    }
    if v <= 0xffff {
        return 3;
    }
    if v <= 0xffff_ffff {
        return 5;
    }
    9
}

/// Serialized size of an output paying to `script`.
pub fn estimate_output_vsize(script: &Script) -> u64 {
    8 + varint_size(script.len()) + script.len() as u64
}

/// Fee for `vsize` virtual bytes, rounded up to the next satoshi.
pub fn fee_for_vsize(fee_rate: FeeRate, vsize: u64) -> u64 {
    let weight = vsize.saturating_mul(4);
    fee_rate
        .to_sat_per_kwu()
        .saturating_mul(weight)
        .saturating_add(999)
        / 1000
}

pub fn input_cost<C: SpendableCoin + ?Sized>(coin: &C, fee_rate: FeeRate) -> u64 {
    fee_for_vsize(fee_rate, coin.input_vsize())
}

pub fn output_cost(script: &Script, fee_rate: FeeRate) -> u64 {
    fee_for_vsize(fee_rate, estimate_output_vsize(script))
}

/// Amount minus the cost of spending the coin; negative when the coin is
/// worth less than its spend fee.
pub fn effective_value<C: SpendableCoin + ?Sized>(coin: &C, fee_rate: FeeRate) -> i64 {
    to_signed(coin.amount().to_sat()).saturating_sub(to_signed(input_cost(coin, fee_rate)))
}

/// Effective value a selection must reach to fund `payment` without change.
pub fn target_value(payment: &TxOut, fee_rate: FeeRate) -> i64 {
    to_signed(payment.value.to_sat())
        .saturating_add(to_signed(output_cost(&payment.script_pubkey, fee_rate)))
}

fn to_signed(sats: u64) -> i64 {
    i64::try_from(sats).unwrap_or(i64::MAX)
}
