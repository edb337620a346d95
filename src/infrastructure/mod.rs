//! Storage adapters implementing the ledger's persistence port.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
