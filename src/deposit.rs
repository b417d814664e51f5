use near_sdk::{env, json_types::U128, near, store::IterableMap, AccountId};

use crate::error::EscrowError;
use crate::StorageKey;

#[near(serializers = [borsh])]
pub struct DepositLedger {
    // Buyer -> Seller -> Balance
    pub deposits: IterableMap<AccountId, IterableMap<AccountId, U128>>,
}

impl DepositLedger {
    pub fn new() -> Self {
        Self {
            deposits: IterableMap::new(StorageKey::Deposits),
        }
    }

    pub fn get(&self, buyer: &AccountId, seller: &AccountId) -> Option<U128> {
        self.deposits
            .get(buyer)
            .and_then(|m| m.get(seller))
            .cloned()
    }

    pub fn contains(&self, buyer: &AccountId, seller: &AccountId) -> bool {
        self.get(buyer, seller).is_some()
    }

    pub fn get_all_buyer_deposits(&self, buyer: &AccountId) -> Vec<(AccountId, U128)> {
        self.deposits
            .get(buyer)
            .map(|buyer_deposits| {
                buyer_deposits
                    .iter()
                    .map(|(seller, balance)| (seller.clone(), *balance))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_all_buyers(&self) -> Vec<AccountId> {
        self.deposits.keys().cloned().collect()
    }

    /// Adds `amount` to the (buyer, seller) slot, creating it if absent.
    /// A zero amount opens an empty slot.
    pub fn credit(&mut self, buyer: &AccountId, seller: &AccountId, amount: U128) {
        let buyer_deposits = self.deposits.entry(buyer.clone()).or_insert_with(|| {
            IterableMap::new(StorageKey::BuyerDeposits {
                buyer_hash: env::sha256_array(buyer.as_bytes()),
            })
        });
        let current_balance = buyer_deposits.get(seller).map_or(0, |b| b.0);
        buyer_deposits.insert(seller.clone(), U128(current_balance + amount.0));
    }

    pub fn open(&mut self, buyer: &AccountId, seller: &AccountId) -> Result<(), EscrowError> {
        if self.contains(buyer, seller) {
            return Err(EscrowError::AlreadyExists);
        }
        self.credit(buyer, seller, U128(0));
        Ok(())
    }

    /// Takes the whole balance of the slot and deletes it in one step.
    pub fn consume(&mut self, buyer: &AccountId, seller: &AccountId) -> Result<U128, EscrowError> {
        let buyer_deposits = self
            .deposits
            .get_mut(buyer)
            .ok_or(EscrowError::NotFound)?;
        let amount = buyer_deposits
            .remove(seller)
            .ok_or(EscrowError::NotFound)?;

        if buyer_deposits.is_empty() {
            self.deposits.remove(buyer);
        }
        Ok(amount)
    }
}

impl Default for DepositLedger {
    fn default() -> Self {
        Self::new()
    }
}
