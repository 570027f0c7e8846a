//! Wallet ledger: balances, append-only entries, and the store boundary.

pub mod entry;
pub mod ledger;
pub mod memory;
pub mod pg;
pub mod pin;
pub mod store;

pub use entry::{EntryKind, EntryPatch, EntryStatus, LedgerEntry, NewLedgerEntry};
pub use ledger::WalletLedger;
pub use memory::MemoryWalletStore;
pub use pg::{init_pool, PgWalletStore, PoolConfig};
pub use store::{StoreError, StoreResult, WalletStore};
