use near_sdk::{env, FunctionError};

/// Every way an escrow operation can be refused.
///
/// Returned from `#[handle_result]` methods; an `Err` aborts the receipt so
/// no state change from the failed call survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    #[error("Deposit already exists")]
    AlreadyExists,
    #[error("Record not found")]
    NotFound,
    #[error("Invalid asset: wrong token or non-positive amount")]
    InvalidAsset,
    #[error("Caller is not authorized for this operation")]
    Unauthorized,
    #[error("Refund is not available yet")]
    TooEarly,
    #[error("Ledger transfer failed")]
    LedgerTransferFailed,
    #[error("A payout for this claim is already in flight")]
    PayoutPending,
}

impl FunctionError for EscrowError {
    fn panic(&self) -> ! {
        env::panic_str(&self.to_string())
    }
}
