// Campaign ledger: donations, withdrawals and the rules that move them

pub mod database;
pub mod donation;
pub mod donation_state;
pub mod models;
pub mod otp;
pub mod withdrawal;

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use self::models::WithdrawalStatus;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("donation not found: {0}")]
    DonationNotFound(String),
    #[error("donation already exists: {0}")]
    DuplicateDonation(String),
    #[error("withdrawal not found: {0}")]
    WithdrawalNotFound(String),
    #[error("withdrawal {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },
    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: i64, available: i64 },
}

// redb reports each stage with its own error type; funnel them through redb::Error
macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for LedgerError {
                fn from(e: $ty) -> Self {
                    LedgerError::Storage(e.into())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Current time as unix seconds
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
