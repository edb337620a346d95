use crate::domain::money::Balance;
use crate::domain::wallet::{Wallet, WalletId, WalletKind};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct BalanceRecord {
    wallet: WalletId,
    kind: WalletKind,
    balance: Balance,
}

/// Writes wallet balances as CSV with the header `wallet,kind,balance`.
pub struct BalanceWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BalanceWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_balances(&mut self, balances: Vec<(Wallet, Balance)>) -> Result<()> {
        for (wallet, balance) in balances {
            self.writer.serialize(BalanceRecord {
                wallet: wallet.id,
                kind: wallet.kind,
                balance,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
