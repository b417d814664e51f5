use near_sdk::{env, json_types::U128, near, store::IterableMap, AccountId, Timestamp};

use crate::error::EscrowError;
use crate::escrow::{Claim, Direction};
use crate::StorageKey;

#[near(serializers = [borsh])]
pub struct ClaimRegistry {
    // Buyer -> Seller -> Claim
    pub claims: IterableMap<AccountId, IterableMap<AccountId, Claim>>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self {
            claims: IterableMap::new(StorageKey::Claims),
        }
    }

    pub fn get(&self, buyer: &AccountId, seller: &AccountId) -> Option<&Claim> {
        self.claims.get(buyer).and_then(|m| m.get(seller))
    }

    pub fn peek(&self, buyer: &AccountId, seller: &AccountId) -> Result<Claim, EscrowError> {
        self.get(buyer, seller).cloned().ok_or(EscrowError::NotFound)
    }

    pub fn get_all_buyer_claims(&self, buyer: &AccountId) -> Vec<(AccountId, Claim)> {
        self.claims
            .get(buyer)
            .map(|buyer_claims| {
                buyer_claims
                    .iter()
                    .map(|(seller, claim)| (seller.clone(), claim.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_all_buyers(&self) -> Vec<AccountId> {
        self.claims.keys().cloned().collect()
    }

    /// Creates the claim, or folds `amount` into the existing one and moves its
    /// timestamp to `now`. An existing claim keeps its original direction.
    pub fn upsert(
        &mut self,
        buyer: &AccountId,
        seller: &AccountId,
        amount: U128,
        direction: Direction,
        now: Timestamp,
    ) -> Claim {
        let buyer_claims = self.claims.entry(buyer.clone()).or_insert_with(|| {
            IterableMap::new(StorageKey::BuyerClaims {
                buyer_hash: env::sha256_array(buyer.as_bytes()),
            })
        });

        let claim = match buyer_claims.get(seller) {
            Some(existing) => Claim {
                amount: U128(existing.amount.0 + amount.0),
                requested_at: now,
                ..existing.clone()
            },
            None => Claim {
                amount,
                requested_at: now,
                direction,
                payout_pending: false,
            },
        };
        buyer_claims.insert(seller.clone(), claim.clone());
        claim
    }

    pub fn set_payout_pending(
        &mut self,
        buyer: &AccountId,
        seller: &AccountId,
        pending: bool,
    ) -> Result<(), EscrowError> {
        let claim = self
            .claims
            .get_mut(buyer)
            .and_then(|m| m.get_mut(seller))
            .ok_or(EscrowError::NotFound)?;
        claim.payout_pending = pending;
        Ok(())
    }

    /// Removes and returns the claim in one step.
    pub fn settle(&mut self, buyer: &AccountId, seller: &AccountId) -> Result<Claim, EscrowError> {
        let buyer_claims = self.claims.get_mut(buyer).ok_or(EscrowError::NotFound)?;
        let claim = buyer_claims.remove(seller).ok_or(EscrowError::NotFound)?;

        if buyer_claims.is_empty() {
            self.claims.remove(buyer);
        }
        Ok(claim)
    }
}

impl Default for ClaimRegistry {
    fn default() -> Self {
        Self::new()
    }
}
