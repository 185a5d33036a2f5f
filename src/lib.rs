// ynab-reconcile - Core Library
// Exposes the statement importer, the pure reconciliation core and the
// ledger client for use in the CLI, the web server and tests

pub mod client;
pub mod importer;
pub mod models;
pub mod reconciler;

// Re-export commonly used types
pub use client::{YnabClient, DEFAULT_BASE_URL};
pub use importer::{parse_money_cell, parse_statement, ParsedStatement, StatementSource};
pub use models::{
    format_milliunits, Account, AccountType, BankTransaction, Budget, ClearedState, Milliunits,
    SaveTransactionsResult, TransactionDraft, YnabTransaction,
};
pub use reconciler::{reconcile, reconcile_as_of, ReconciliationPlan, DEFAULT_CUTOFF_DAYS};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
