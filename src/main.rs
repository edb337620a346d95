use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use wallet_ledger::application::engine::LedgerEngine;
use wallet_ledger::config::{
    DEFAULT_BONUS_WALLET_ID, DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_TREASURY_WALLET_ID, LedgerConfig,
};
use wallet_ledger::domain::ports::LedgerStoreBox;
use wallet_ledger::domain::wallet::{SystemWallets, WalletId};
use wallet_ledger::error::{LedgerError, StoreError};
use wallet_ledger::infrastructure::in_memory::InMemoryLedgerStore;
#[cfg(feature = "storage-rocksdb")]
use wallet_ledger::infrastructure::rocksdb::RocksDbLedgerStore;
use wallet_ledger::interfaces::csv::balance_writer::BalanceWriter;
use wallet_ledger::interfaces::csv::operation_reader::OperationReader;
use wallet_ledger::interfaces::csv::wallet_reader::WalletReader;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file (op,wallet,amount,key)
    input: PathBuf,

    /// Wallet definitions CSV file (id,user,asset,kind)
    #[arg(long)]
    wallets: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "LEDGER_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Id of the treasury wallet
    #[arg(long, env = "LEDGER_TREASURY_WALLET_ID", default_value_t = DEFAULT_TREASURY_WALLET_ID)]
    treasury_wallet: i64,

    /// Id of the bonus pool wallet
    #[arg(long, env = "LEDGER_BONUS_WALLET_ID", default_value_t = DEFAULT_BONUS_WALLET_ID)]
    bonus_wallet: i64,

    /// Longest wait for a wallet lock, in milliseconds
    #[arg(long, env = "LEDGER_LOCK_TIMEOUT_MS", default_value_t = DEFAULT_LOCK_TIMEOUT_MS)]
    lock_timeout_ms: u64,

    /// Asset type of system wallets registered on startup
    #[arg(long, default_value_t = 1)]
    system_asset: i64,
}

fn open_store(db_path: Option<&Path>, config: &LedgerConfig) -> Result<LedgerStoreBox> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store = RocksDbLedgerStore::open(path, config.lock_timeout).into_diagnostic()?;
            Ok(Box::new(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Box::new(InMemoryLedgerStore::new(config.lock_timeout)))
        }
        None => Ok(Box::new(InMemoryLedgerStore::new(config.lock_timeout))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = LedgerConfig::new(
        SystemWallets::new(WalletId(cli.treasury_wallet), WalletId(cli.bonus_wallet)),
        Duration::from_millis(cli.lock_timeout_ms),
    )
    .into_diagnostic()?;

    let store = open_store(cli.db_path.as_deref(), &config)?;
    let engine = LedgerEngine::new(store, &config);

    if let Some(path) = &cli.wallets {
        let file = File::open(path).into_diagnostic()?;
        for wallet in WalletReader::new(file).wallets() {
            match wallet {
                Ok(wallet) => match engine.register_wallet(wallet).await {
                    // Already present in a persistent store from an earlier run.
                    Ok(()) | Err(LedgerError::Storage(StoreError::WalletExists(_))) => {}
                    Err(e) => eprintln!("Error registering wallet: {}", e),
                },
                Err(e) => eprintln!("Error reading wallet: {}", e),
            }
        }
    }
    engine
        .ensure_system_wallets(cli.system_asset)
        .await
        .into_diagnostic()?;

    // Process operations
    let file = File::open(&cli.input).into_diagnostic()?;
    for record in OperationReader::new(file).operations() {
        match record {
            Ok(op) => match engine.execute(op.op, op.wallet, op.amount, &op.key).await {
                Ok(outcome) => {
                    info!(
                        op = %op.op,
                        wallet = %op.wallet,
                        key = %op.key,
                        ?outcome,
                        "operation processed"
                    );
                }
                Err(e) => {
                    debug!(
                        op = %op.op,
                        wallet = %op.wallet,
                        key = %op.key,
                        retryable = e.is_retryable(),
                        error = %e,
                        "operation rejected"
                    );
                    eprintln!("Error processing operation {}: {}", op.key, e);
                }
            },
            Err(e) => {
                eprintln!("Error reading operation: {}", e);
            }
        }
    }

    // Output final balances
    let balances = engine.balances().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = BalanceWriter::new(stdout.lock());
    writer.write_balances(balances).into_diagnostic()?;

    Ok(())
}
