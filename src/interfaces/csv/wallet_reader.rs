use crate::domain::wallet::{Wallet, WalletId, WalletKind};
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct WalletRecord {
    id: WalletId,
    user: Option<i64>,
    asset: i64,
    kind: WalletKind,
}

impl From<WalletRecord> for Wallet {
    fn from(record: WalletRecord) -> Self {
        Wallet {
            id: record.id,
            user_id: record.user,
            asset_type_id: record.asset,
            kind: record.kind,
        }
    }
}

/// Reads wallet definitions from a CSV source with the header `id,user,asset,kind`.
///
/// System wallets leave `user` empty.
pub struct WalletReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> WalletReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn wallets(self) -> impl Iterator<Item = Result<Wallet>> {
        self.reader
            .into_deserialize::<WalletRecord>()
            .map(|result| result.map(Wallet::from).map_err(LedgerError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_user_and_system_wallets() {
        let data = "id, user, asset, kind\n1, 10, 1, user\n3, , 1, treasury\n4, , 1, bonus";
        let wallets: Vec<Wallet> = WalletReader::new(data.as_bytes())
            .wallets()
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(wallets.len(), 3);
        assert_eq!(wallets[0], Wallet::user(WalletId(1), 10, 1));
        assert_eq!(
            wallets[1],
            Wallet::system(WalletId(3), WalletKind::Treasury, 1)
        );
        assert_eq!(wallets[2].kind, WalletKind::Bonus);
        assert_eq!(wallets[2].user_id, None);
    }

    #[test]
    fn test_reader_unknown_kind() {
        let data = "id,user,asset,kind\n1,10,1,savings";
        let mut wallets = WalletReader::new(data.as_bytes()).wallets();
        assert!(matches!(wallets.next(), Some(Err(LedgerError::Csv(_)))));
    }
}
