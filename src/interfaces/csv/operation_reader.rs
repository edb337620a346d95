use crate::domain::operation::OperationKind;
use crate::domain::wallet::WalletId;
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::io::Read;

/// One requested ledger operation, as submitted by a caller.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct OperationRecord {
    pub op: OperationKind,
    pub wallet: WalletId,
    pub amount: i64,
    pub key: String,
}

/// Reads operation requests from a CSV source with the header `op,wallet,amount,key`.
///
/// Amount and key are passed through unvalidated; the engine rejects bad values before
/// touching storage.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    /// Creates a new `OperationReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes operations.
    pub fn operations(self) -> impl Iterator<Item = Result<OperationRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}
