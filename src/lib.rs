use near_sdk::json_types::U128;
use near_sdk::{
    env, ext_contract, log, near, AccountId, BorshStorageKey, CryptoHash, Gas, NearToken,
    PanicOnDefault, PromiseError, PromiseOrValue, Timestamp,
};

mod claims;
mod deposit;
mod error;
mod escrow;
mod timelocks;
mod utils;

pub use claims::ClaimRegistry;
pub use deposit::DepositLedger;
pub use error::EscrowError;
pub use escrow::{Claim, Direction, EscrowConfig, PairState};
pub use timelocks::{RefundDelay, REFUND_DELAY_SEC};

use utils::{log_claim_event, log_escrow_event, require_caller};

const GAS_FOR_FT_TRANSFER: Gas = Gas::from_tgas(10);
const GAS_FOR_REFUND_CALLBACK: Gas = Gas::from_tgas(10);
const REFUND_MEMO: &str = "Escrow release";

// External contract interfaces
#[ext_contract(ext_fungible_token)]
pub trait FungibleToken {
    fn ft_transfer(&mut self, receiver_id: AccountId, amount: U128, memo: Option<String>);
}

#[ext_contract(ext_self)]
pub trait SelfCallbacks {
    fn on_refund_settled(&mut self, buyer: AccountId, seller: AccountId);
}

#[near(serializers = [borsh])]
#[derive(BorshStorageKey)]
pub(crate) enum StorageKey {
    Deposits,
    BuyerDeposits { buyer_hash: CryptoHash },
    Claims,
    BuyerClaims { buyer_hash: CryptoHash },
}

#[near(contract_state)]
#[derive(PanicOnDefault)]
pub struct Contract {
    pub token_id: AccountId,
    pub refund_delay: RefundDelay,
    // Funds not yet under a release request, partitioned by buyer
    pub deposits: DepositLedger,
    // Pending release requests, partitioned by buyer
    pub claims: ClaimRegistry,
}

#[near]
impl Contract {
    #[init]
    pub fn new(config: EscrowConfig) -> Self {
        Self {
            token_id: config.token_id,
            refund_delay: config
                .refund_delay_sec
                .map(RefundDelay::new)
                .unwrap_or_default(),
            deposits: DepositLedger::new(),
            claims: ClaimRegistry::new(),
        }
    }

    /// Opens an empty escrow slot for `seller`. Must be called by `buyer`
    /// before any tokens can be sent for that seller.
    #[handle_result]
    pub fn opendeposit(&mut self, buyer: AccountId, seller: AccountId) -> Result<(), EscrowError> {
        require_caller(&buyer)?;
        self.deposits.open(&buyer, &seller)?;
        log_escrow_event("OPENED", &buyer, &seller, U128(0));
        Ok(())
    }

    /// NEP-141 receiver hook. The buyer sends tokens with `ft_transfer_call`
    /// and puts the seller's account id in `msg`.
    ///
    /// Returns the unused amount: zero when credited, everything when the
    /// notification was ignored.
    #[handle_result]
    pub fn ft_on_transfer(
        &mut self,
        sender_id: AccountId,
        amount: U128,
        msg: String,
    ) -> Result<PromiseOrValue<U128>, EscrowError> {
        let token_id = env::predecessor_account_id();
        let credited = self.credit_from_transfer(
            &token_id,
            &sender_id,
            &env::current_account_id(),
            amount,
            &msg,
        )?;

        Ok(PromiseOrValue::Value(if credited { U128(0) } else { amount }))
    }

    /// Buyer asks for the escrowed funds back.
    #[handle_result]
    pub fn withdraw(&mut self, buyer: AccountId, seller: AccountId) -> Result<Claim, EscrowError> {
        require_caller(&buyer)?;
        self.request_release(&buyer, &seller, Direction::Withdrawal, env::block_timestamp())
    }

    /// Seller asks to be paid the escrowed funds.
    #[handle_result]
    pub fn claim(&mut self, buyer: AccountId, seller: AccountId) -> Result<Claim, EscrowError> {
        require_caller(&seller)?;
        self.request_release(&buyer, &seller, Direction::Payment, env::block_timestamp())
    }

    /// Pays a claim out once its delay has passed. Only the party the claim
    /// pays may call this.
    ///
    /// The claim is deleted in `on_refund_settled` after the token transfer
    /// succeeds; a failed transfer leaves it in place for another attempt.
    #[handle_result]
    pub fn refund(
        &mut self,
        buyer: AccountId,
        seller: AccountId,
    ) -> Result<PromiseOrValue<bool>, EscrowError> {
        let claim = self.claims.peek(&buyer, &seller)?;
        let recipient = claim.direction.recipient(&buyer, &seller).clone();
        require_caller(&recipient)?;

        if claim.payout_pending {
            return Err(EscrowError::PayoutPending);
        }
        self.refund_delay
            .assert_refund_window(claim.requested_at, env::block_timestamp())?;

        // Nothing to send for a claim built only from empty slots.
        if claim.amount.0 == 0 {
            self.claims.settle(&buyer, &seller)?;
            log_claim_event("REFUNDED", &buyer, &seller, &claim);
            return Ok(PromiseOrValue::Value(true));
        }

        self.claims.set_payout_pending(&buyer, &seller, true)?;
        log_claim_event("REFUND_STARTED", &buyer, &seller, &claim);

        let payout = ext_fungible_token::ext(self.token_id.clone())
            .with_attached_deposit(NearToken::from_yoctonear(1))
            .with_static_gas(GAS_FOR_FT_TRANSFER)
            .ft_transfer(recipient, claim.amount, Some(REFUND_MEMO.to_string()))
            .then(
                ext_self::ext(env::current_account_id())
                    .with_static_gas(GAS_FOR_REFUND_CALLBACK)
                    .on_refund_settled(buyer, seller),
            );
        Ok(PromiseOrValue::Promise(payout))
    }

    // --- PRIVATE CALLBACKS ---
    #[private]
    pub fn on_refund_settled(
        &mut self,
        #[callback_result] result: Result<(), PromiseError>,
        buyer: AccountId,
        seller: AccountId,
    ) -> bool {
        if result.is_err() {
            // Keep the claim and let the recipient call `refund` again.
            if self
                .claims
                .set_payout_pending(&buyer, &seller, false)
                .is_ok()
            {
                log!(
                    "ESCROW_REFUND_FAILED: buyer='{}', seller='{}', error='{}'",
                    buyer,
                    seller,
                    EscrowError::LedgerTransferFailed
                );
            }
            return false;
        }

        match self.claims.settle(&buyer, &seller) {
            Ok(claim) => {
                log_claim_event("REFUNDED", &buyer, &seller, &claim);
                true
            }
            Err(err) => {
                log!(
                    "ESCROW_SETTLE_SKIPPED: buyer='{}', seller='{}', error='{}'",
                    buyer,
                    seller,
                    err
                );
                false
            }
        }
    }

    // --- VIEWS ---
    pub fn get_config(&self) -> EscrowConfig {
        EscrowConfig {
            token_id: self.token_id.clone(),
            refund_delay_sec: Some(self.refund_delay.delay_sec),
        }
    }

    pub fn get_deposit(&self, buyer: AccountId, seller: AccountId) -> Option<U128> {
        self.deposits.get(&buyer, &seller)
    }

    pub fn get_claim(&self, buyer: AccountId, seller: AccountId) -> Option<Claim> {
        self.claims.get(&buyer, &seller).cloned()
    }

    pub fn get_pair_state(&self, buyer: AccountId, seller: AccountId) -> PairState {
        PairState::from_slots(
            self.deposits.get(&buyer, &seller),
            self.claims.get(&buyer, &seller).cloned(),
        )
    }

    pub fn get_buyer_deposits(&self, buyer: AccountId) -> Vec<(AccountId, U128)> {
        self.deposits.get_all_buyer_deposits(&buyer)
    }

    pub fn get_buyer_claims(&self, buyer: AccountId) -> Vec<(AccountId, Claim)> {
        self.claims.get_all_buyer_claims(&buyer)
    }

    /// Buyers holding a deposit, a pending claim, or both.
    pub fn get_buyers(&self) -> Vec<AccountId> {
        let mut buyers = self.deposits.get_all_buyers();
        buyers.extend(self.claims.get_all_buyers());
        buyers.sort();
        buyers.dedup();
        buyers
    }
}

impl Contract {
    /// Credits an inbound transfer of `quantity` of `asset` to the slot
    /// (`from`, `memo`).
    ///
    /// Transfers sent by the escrow itself, or addressed to someone else, are
    /// ignored and return `Ok(false)`.
    pub fn credit_from_transfer(
        &mut self,
        asset: &AccountId,
        from: &AccountId,
        to: &AccountId,
        quantity: U128,
        memo: &str,
    ) -> Result<bool, EscrowError> {
        let escrow_id = env::current_account_id();
        if *from == escrow_id || *to != escrow_id {
            log!(
                "ESCROW_TRANSFER_IGNORED: from='{}', to='{}', amount='{}'",
                from,
                to,
                quantity.0
            );
            return Ok(false);
        }

        if *asset != self.token_id || quantity.0 == 0 {
            return Err(EscrowError::InvalidAsset);
        }

        let seller: AccountId = memo.parse().map_err(|_| EscrowError::NotFound)?;
        if !self.deposits.contains(from, &seller) {
            return Err(EscrowError::NotFound);
        }

        self.deposits.credit(from, &seller, quantity);
        log_escrow_event("CREDITED", from, &seller, quantity);
        Ok(true)
    }

    /// Moves the whole deposit of a pair into its claim, stamping it with `now`.
    pub fn request_release(
        &mut self,
        buyer: &AccountId,
        seller: &AccountId,
        direction: Direction,
        now: Timestamp,
    ) -> Result<Claim, EscrowError> {
        if self
            .claims
            .get(buyer, seller)
            .is_some_and(|claim| claim.payout_pending)
        {
            return Err(EscrowError::PayoutPending);
        }

        let amount = self.deposits.consume(buyer, seller)?;
        let claim = self.claims.upsert(buyer, seller, amount, direction, now);
        log_claim_event("CLAIM_REQUESTED", buyer, seller, &claim);
        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use near_sdk::test_utils::{accounts, get_created_receipts, get_logs, VMContextBuilder};
    use near_sdk::testing_env;

    const START: Timestamp = 1_700_000_000_000_000_000;
    const DELAY_NANOS: Timestamp = 30_000_000_000;

    fn escrow_id() -> AccountId {
        "escrow.near".parse().unwrap()
    }

    fn token_id() -> AccountId {
        "token.near".parse().unwrap()
    }

    fn buyer() -> AccountId {
        accounts(1)
    }

    fn seller() -> AccountId {
        accounts(2)
    }

    fn set_context(predecessor: AccountId, now: Timestamp) {
        testing_env!(VMContextBuilder::new()
            .current_account_id(escrow_id())
            .predecessor_account_id(predecessor)
            .block_timestamp(now)
            .build());
    }

    fn setup() -> Contract {
        set_context(accounts(0), START);
        Contract::new(EscrowConfig {
            token_id: token_id(),
            refund_delay_sec: None,
        })
    }

    fn funded(amount: u128) -> Contract {
        let mut contract = setup();
        set_context(buyer(), START);
        contract.opendeposit(buyer(), seller()).unwrap();
        set_context(token_id(), START);
        contract
            .ft_on_transfer(buyer(), U128(amount), seller().to_string())
            .unwrap();
        contract
    }

    #[test]
    fn init_defaults_delay() {
        let contract = setup();
        let config = contract.get_config();
        assert_eq!(config.token_id, token_id());
        assert_eq!(config.refund_delay_sec, Some(REFUND_DELAY_SEC));
    }

    #[test]
    fn opendeposit_requires_buyer() {
        let mut contract = setup();
        set_context(seller(), START);
        assert_eq!(
            contract.opendeposit(buyer(), seller()),
            Err(EscrowError::Unauthorized)
        );
        assert_eq!(contract.get_deposit(buyer(), seller()), None);
    }

    #[test]
    fn opendeposit_twice_fails() {
        let mut contract = setup();
        set_context(buyer(), START);
        contract.opendeposit(buyer(), seller()).unwrap();
        assert_eq!(
            contract.opendeposit(buyer(), seller()),
            Err(EscrowError::AlreadyExists)
        );
    }

    #[test]
    fn credit_requires_open_slot() {
        let mut contract = setup();
        set_context(token_id(), START);
        assert!(matches!(
            contract.ft_on_transfer(buyer(), U128(10), seller().to_string()),
            Err(EscrowError::NotFound)
        ));
    }

    #[test]
    fn credit_rejects_bad_memo() {
        let mut contract = funded(1);
        set_context(token_id(), START);
        assert!(matches!(
            contract.ft_on_transfer(buyer(), U128(10), "Not An Account!".to_string()),
            Err(EscrowError::NotFound)
        ));
        assert_eq!(contract.get_deposit(buyer(), seller()), Some(U128(1)));
    }

    #[test]
    fn credit_does_not_trim_memo() {
        let mut contract = funded(1);
        set_context(token_id(), START);
        assert!(matches!(
            contract.ft_on_transfer(buyer(), U128(10), format!(" {}", seller())),
            Err(EscrowError::NotFound)
        ));
        assert_eq!(contract.get_deposit(buyer(), seller()), Some(U128(1)));
    }

    #[test]
    fn credit_rejects_wrong_token_and_zero_amount() {
        let mut contract = funded(5);

        set_context("fake-token.near".parse().unwrap(), START);
        assert!(matches!(
            contract.ft_on_transfer(buyer(), U128(10), seller().to_string()),
            Err(EscrowError::InvalidAsset)
        ));

        set_context(token_id(), START);
        assert!(matches!(
            contract.ft_on_transfer(buyer(), U128(0), seller().to_string()),
            Err(EscrowError::InvalidAsset)
        ));

        assert_eq!(contract.get_deposit(buyer(), seller()), Some(U128(5)));
    }

    #[test]
    fn self_sent_transfer_is_ignored() {
        let mut contract = funded(5);
        set_context(token_id(), START);

        let unused = contract
            .ft_on_transfer(escrow_id(), U128(10), seller().to_string())
            .unwrap();
        assert!(matches!(unused, PromiseOrValue::Value(U128(10))));
        assert_eq!(contract.get_deposit(buyer(), seller()), Some(U128(5)));
    }

    #[test]
    fn transfer_to_other_account_is_ignored() {
        let mut contract = funded(5);
        set_context(token_id(), START);

        let credited = contract
            .credit_from_transfer(&token_id(), &buyer(), &accounts(4), U128(3), "bob")
            .unwrap();
        assert!(!credited);
        assert_eq!(contract.get_deposit(buyer(), seller()), Some(U128(5)));
    }

    #[test]
    fn withdraw_requires_buyer_and_claim_requires_seller() {
        let mut contract = funded(5);

        set_context(seller(), START);
        assert_eq!(
            contract.withdraw(buyer(), seller()),
            Err(EscrowError::Unauthorized)
        );

        set_context(buyer(), START);
        assert_eq!(
            contract.claim(buyer(), seller()),
            Err(EscrowError::Unauthorized)
        );

        assert_eq!(contract.get_deposit(buyer(), seller()), Some(U128(5)));
        assert_eq!(contract.get_claim(buyer(), seller()), None);
    }

    #[test]
    fn release_without_deposit_fails() {
        let mut contract = setup();
        set_context(seller(), START);
        assert_eq!(contract.claim(buyer(), seller()), Err(EscrowError::NotFound));
    }

    #[test]
    fn claim_creates_payment() {
        let mut contract = funded(8);
        set_context(seller(), START + 5);

        let claim = contract.claim(buyer(), seller()).unwrap();

        assert_eq!(claim.direction, Direction::Payment);
        assert_eq!(claim.amount, U128(8));
        assert_eq!(claim.requested_at, START + 5);
        assert_eq!(contract.get_deposit(buyer(), seller()), None);
    }

    #[test]
    fn refund_only_by_recipient() {
        let mut contract = funded(8);
        set_context(seller(), START);
        contract.claim(buyer(), seller()).unwrap();

        set_context(buyer(), START + DELAY_NANOS);
        assert!(matches!(
            contract.refund(buyer(), seller()),
            Err(EscrowError::Unauthorized)
        ));

        set_context(seller(), START + DELAY_NANOS);
        assert!(contract.refund(buyer(), seller()).is_ok());
    }

    #[test]
    fn refund_missing_claim_fails() {
        let mut contract = setup();
        set_context(buyer(), START);
        assert!(matches!(
            contract.refund(buyer(), seller()),
            Err(EscrowError::NotFound)
        ));
    }

    #[test]
    fn refund_blocks_while_payout_in_flight() {
        let mut contract = funded(8);
        set_context(buyer(), START);
        contract.withdraw(buyer(), seller()).unwrap();

        set_context(buyer(), START + DELAY_NANOS);
        contract.refund(buyer(), seller()).unwrap();
        assert!(contract.get_claim(buyer(), seller()).unwrap().payout_pending);

        assert!(matches!(
            contract.refund(buyer(), seller()),
            Err(EscrowError::PayoutPending)
        ));
    }

    #[test]
    fn release_request_blocked_while_payout_in_flight() {
        let mut contract = funded(8);
        set_context(buyer(), START);
        contract.withdraw(buyer(), seller()).unwrap();
        contract.opendeposit(buyer(), seller()).unwrap();

        set_context(buyer(), START + DELAY_NANOS);
        contract.refund(buyer(), seller()).unwrap();

        set_context(seller(), START + DELAY_NANOS);
        assert_eq!(
            contract.claim(buyer(), seller()),
            Err(EscrowError::PayoutPending)
        );
        assert_eq!(contract.get_deposit(buyer(), seller()), Some(U128(0)));
    }

    #[test]
    fn settled_callback_deletes_claim() {
        let mut contract = funded(8);
        set_context(buyer(), START);
        contract.withdraw(buyer(), seller()).unwrap();
        set_context(buyer(), START + DELAY_NANOS);
        contract.refund(buyer(), seller()).unwrap();

        set_context(escrow_id(), START + DELAY_NANOS);
        assert!(contract.on_refund_settled(Ok(()), buyer(), seller()));

        assert_eq!(contract.get_claim(buyer(), seller()), None);
        assert_eq!(contract.get_pair_state(buyer(), seller()), PairState::Empty);
        assert_eq!(
            get_logs(),
            vec![format!(
                "ESCROW_REFUNDED: buyer='{}', seller='{}', amount='8', direction='withdrawal', requested_at='{}'",
                buyer(),
                seller(),
                START
            )]
        );
    }

    #[test]
    fn failed_payout_keeps_claim_for_retry() {
        let mut contract = funded(8);
        set_context(buyer(), START);
        contract.withdraw(buyer(), seller()).unwrap();
        set_context(buyer(), START + DELAY_NANOS);
        contract.refund(buyer(), seller()).unwrap();

        set_context(escrow_id(), START + DELAY_NANOS);
        assert!(!contract.on_refund_settled(Err(PromiseError::Failed), buyer(), seller()));

        let claim = contract.get_claim(buyer(), seller()).unwrap();
        assert_eq!(claim.amount, U128(8));
        assert!(!claim.payout_pending);

        set_context(buyer(), START + DELAY_NANOS + 1);
        assert!(contract.refund(buyer(), seller()).is_ok());
    }

    #[test]
    fn zero_claim_settles_without_transfer() {
        let mut contract = setup();
        set_context(buyer(), START);
        contract.opendeposit(buyer(), seller()).unwrap();
        contract.withdraw(buyer(), seller()).unwrap();

        set_context(buyer(), START + DELAY_NANOS);
        let paid = contract.refund(buyer(), seller()).unwrap();

        assert!(matches!(paid, PromiseOrValue::Value(true)));
        assert!(get_created_receipts().is_empty());
        assert_eq!(contract.get_claim(buyer(), seller()), None);
    }
}
