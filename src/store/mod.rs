pub mod profile_store;
pub mod usage_ledger;

pub use profile_store::ProfileStore;
pub use usage_ledger::UsageLedger;
