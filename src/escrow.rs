use near_sdk::{json_types::U128, near, AccountId, Timestamp};

// Which party a pending claim pays out to.
#[near(serializers = [json, borsh])]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Withdrawal, // pays the buyer back
    Payment,    // pays the seller
}

impl Direction {
    pub fn recipient<'a>(&self, buyer: &'a AccountId, seller: &'a AccountId) -> &'a AccountId {
        match self {
            Direction::Withdrawal => buyer,
            Direction::Payment => seller,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Withdrawal => "withdrawal",
            Direction::Payment => "payment",
        }
    }
}

/// A time-gated release request for one (buyer, seller) pair.
#[near(serializers = [json, borsh])]
#[derive(Clone, Debug, PartialEq)]
pub struct Claim {
    pub amount: U128,
    pub requested_at: Timestamp,
    // Fixed by whoever created the claim; later requests only add to `amount`.
    pub direction: Direction,
    pub payout_pending: bool, // set while the ft_transfer is in flight
}

/// Combined view over a pair's deposit slot and claim slot.
#[near(serializers = [json])]
#[derive(Clone, Debug, PartialEq)]
pub enum PairState {
    Empty,
    Deposited {
        amount: U128,
    },
    Pending {
        amount: U128,
        requested_at: Timestamp,
        direction: Direction,
    },
    // A slot may be re-opened while an earlier claim still waits for its delay.
    DepositedAndPending {
        deposit: U128,
        claim: Claim,
    },
}

impl PairState {
    pub fn from_slots(deposit: Option<U128>, claim: Option<Claim>) -> Self {
        match (deposit, claim) {
            (None, None) => PairState::Empty,
            (Some(amount), None) => PairState::Deposited { amount },
            (None, Some(claim)) => PairState::Pending {
                amount: claim.amount,
                requested_at: claim.requested_at,
                direction: claim.direction,
            },
            (Some(deposit), Some(claim)) => PairState::DepositedAndPending { deposit, claim },
        }
    }
}

/// Init-time settings of an escrow instance.
#[near(serializers = [json, borsh])]
#[derive(Clone, Debug)]
pub struct EscrowConfig {
    // The only NEP-141 token this escrow accepts.
    pub token_id: AccountId,
    pub refund_delay_sec: Option<u64>,
}
