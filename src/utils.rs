use near_sdk::{env, json_types::U128, AccountId};

use crate::error::EscrowError;
use crate::escrow::Claim;

// Helper for consistent logging
pub fn log_escrow_event(event: &str, buyer: &AccountId, seller: &AccountId, amount: U128) {
    env::log_str(&format!(
        "ESCROW_{}: buyer='{}', seller='{}', amount='{}'",
        event, buyer, seller, amount.0
    ));
}

pub fn log_claim_event(event: &str, buyer: &AccountId, seller: &AccountId, claim: &Claim) {
    env::log_str(&format!(
        "ESCROW_{}: buyer='{}', seller='{}', amount='{}', direction='{}', requested_at='{}'",
        event,
        buyer,
        seller,
        claim.amount.0,
        claim.direction.as_str(),
        claim.requested_at
    ));
}

/// Fails unless the immediate caller is `account_id`.
pub fn require_caller(account_id: &AccountId) -> Result<(), EscrowError> {
    if env::predecessor_account_id() != *account_id {
        return Err(EscrowError::Unauthorized);
    }
    Ok(())
}
