//! Ledger configuration

use crate::domain::wallet::{SystemWallets, WalletId};
use crate::error::{LedgerError, Result};
use std::time::Duration;

pub const DEFAULT_TREASURY_WALLET_ID: i64 = 3;
pub const DEFAULT_BONUS_WALLET_ID: i64 = 4;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Fixed system wallets the operation templates are bound to
    pub system_wallets: SystemWallets,
    /// Longest wait for a single wallet lock before the unit of work aborts
    pub lock_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            system_wallets: SystemWallets::new(
                WalletId(DEFAULT_TREASURY_WALLET_ID),
                WalletId(DEFAULT_BONUS_WALLET_ID),
            ),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

impl LedgerConfig {
    pub fn new(system_wallets: SystemWallets, lock_timeout: Duration) -> Result<Self> {
        let config = Self {
            system_wallets,
            lock_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.system_wallets.treasury == self.system_wallets.bonus_pool {
            return Err(LedgerError::Config(format!(
                "treasury and bonus pool must be different wallets (both {})",
                self.system_wallets.treasury
            )));
        }
        if self.lock_timeout.is_zero() {
            return Err(LedgerError::Config(
                "lock timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
