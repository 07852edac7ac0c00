pub mod config;
pub mod error;
pub mod ledger;
pub mod store;
pub mod writer;

pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use ledger::{EntryRequest, LedgerEntry, LedgerService};
pub use store::{LedgerStore, MemoryLedgerStore, ReadRange, SqliteLedgerStore};
pub use writer::LedgerWriter;
