use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a wallet.
///
/// Wallet ids define the global lock order: every unit of work locks its wallets
/// in ascending `WalletId` order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WalletId(pub i64);

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for WalletId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    User,
    Treasury,
    Bonus,
}

impl WalletKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletKind::User => "user",
            WalletKind::Treasury => "treasury",
            WalletKind::Bonus => "bonus",
        }
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account holding value for one user and asset type, or a system-owned account.
///
/// The balance is deliberately absent: it is always derived from ledger entries.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Wallet {
    pub id: WalletId,
    /// Owning user, `None` for system wallets.
    pub user_id: Option<i64>,
    pub asset_type_id: i64,
    pub kind: WalletKind,
}

impl Wallet {
    pub fn user(id: WalletId, user_id: i64, asset_type_id: i64) -> Self {
        Self {
            id,
            user_id: Some(user_id),
            asset_type_id,
            kind: WalletKind::User,
        }
    }

    pub fn system(id: WalletId, kind: WalletKind, asset_type_id: i64) -> Self {
        Self {
            id,
            user_id: None,
            asset_type_id,
            kind,
        }
    }
}

/// Well-known system wallets, supplied by configuration at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemWallets {
    pub treasury: WalletId,
    pub bonus_pool: WalletId,
}

impl SystemWallets {
    pub fn new(treasury: WalletId, bonus_pool: WalletId) -> Self {
        Self {
            treasury,
            bonus_pool,
        }
    }

    pub fn contains(&self, id: WalletId) -> bool {
        self.treasury == id || self.bonus_pool == id
    }
}
