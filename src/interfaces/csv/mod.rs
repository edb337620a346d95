//! CSV adapters for the batch driver: operation and wallet readers, balance writer.

pub mod balance_writer;
pub mod operation_reader;
pub mod wallet_reader;
