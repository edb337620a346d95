use crate::domain::money::Amount;
use crate::domain::transaction::TransactionId;
use crate::domain::wallet::{SystemWallets, WalletId};
use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Spend,
    #[serde(alias = "top-up", alias = "top_up")]
    TopUp,
    Bonus,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Spend => "spend",
            OperationKind::TopUp => "topup",
            OperationKind::Bonus => "bonus",
        };
        f.write_str(s)
    }
}

/// A two-legged transfer: `amount` leaves `debit` and enters `credit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub kind: OperationKind,
    pub debit: WalletId,
    pub credit: WalletId,
    pub amount: Amount,
    /// Whether the debited wallet must cover the amount.
    pub requires_funds: bool,
}

impl Transfer {
    /// The two postings of this transfer; they always sum to zero.
    pub fn legs(&self) -> [(WalletId, i64); 2] {
        [
            (self.debit, -self.amount),
            (self.credit, self.amount.value()),
        ]
    }

    pub fn wallets(&self) -> [WalletId; 2] {
        [self.debit, self.credit]
    }
}

/// The transfer templates of the ledger, bound to the configured system wallets.
#[derive(Debug, Clone, Copy)]
pub struct OperationDefinitions {
    system: SystemWallets,
}

impl OperationDefinitions {
    pub fn new(system: SystemWallets) -> Self {
        Self { system }
    }

    pub fn system_wallets(&self) -> SystemWallets {
        self.system
    }

    /// Builds the transfer for `kind` acting on `user_wallet`.
    ///
    /// | kind  | debit      | credit     | funds check |
    /// |-------|------------|------------|-------------|
    /// | spend | user       | treasury   | yes         |
    /// | topup | treasury   | user       | no          |
    /// | bonus | bonus pool | user       | no          |
    pub fn transfer(
        &self,
        kind: OperationKind,
        user_wallet: WalletId,
        amount: Amount,
    ) -> Result<Transfer, LedgerError> {
        let (debit, credit, requires_funds) = match kind {
            OperationKind::Spend => (user_wallet, self.system.treasury, true),
            OperationKind::TopUp => (self.system.treasury, user_wallet, false),
            OperationKind::Bonus => (self.system.bonus_pool, user_wallet, false),
        };
        if debit == credit {
            return Err(LedgerError::SelfTransfer(user_wallet));
        }
        Ok(Transfer {
            kind,
            debit,
            credit,
            amount,
            requires_funds,
        })
    }
}

/// Successful result of a ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationOutcome {
    Completed { transaction_id: TransactionId },
    AlreadyProcessed { transaction_id: TransactionId },
}

impl OperationOutcome {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            OperationOutcome::Completed { transaction_id }
            | OperationOutcome::AlreadyProcessed { transaction_id } => *transaction_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, OperationOutcome::Completed { .. })
    }
}
