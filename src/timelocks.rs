use near_sdk::{near, Timestamp};

use crate::error::EscrowError;

const NANOS_IN_SEC: u64 = 1_000_000_000;

/// Cooling-off period between the latest release request and payout.
pub const REFUND_DELAY_SEC: u64 = 30;

#[near(serializers = [json, borsh])]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefundDelay {
    pub delay_sec: u64,
}

impl RefundDelay {
    pub fn new(delay_sec: u64) -> Self {
        Self { delay_sec }
    }

    /// First instant at which a claim requested at `requested_at` may be paid.
    pub fn available_at(&self, requested_at: Timestamp) -> Timestamp {
        requested_at.saturating_add(self.delay_sec.saturating_mul(NANOS_IN_SEC))
    }

    pub fn assert_refund_window(
        &self,
        requested_at: Timestamp,
        now: Timestamp,
    ) -> Result<(), EscrowError> {
        if now < self.available_at(requested_at) {
            return Err(EscrowError::TooEarly);
        }
        Ok(())
    }
}

impl Default for RefundDelay {
    fn default() -> Self {
        Self::new(REFUND_DELAY_SEC)
    }
}
