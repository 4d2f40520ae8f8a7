pub mod duckdb;
pub mod traits;

pub use self::duckdb::DuckDbStorage;
pub use traits::{
    BatchFailure, BatchStatus, EmailBatchRecord, EmailRecipientRecord, EmailRecord, EmailStatus,
    NewBatch, Storage, StorageError,
};
