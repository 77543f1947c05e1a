use serde::Serialize;

use crate::model::Ms;

const MINUTE_MS: Ms = 60_000;

/// Amount owed for a finished booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentQuote {
    pub minutes: u64,
    pub rate_per_minute: u64,
    pub amount: u64,
}

/// Bill whole minutes, rounding up, with a one minute minimum.
pub fn quote(start: Ms, end: Ms, rate_per_minute: u64) -> PaymentQuote {
    let elapsed = end.saturating_sub(start).max(0) as u64;
    let minutes = elapsed.div_ceil(MINUTE_MS as u64).max(1);
    PaymentQuote {
        minutes,
        rate_per_minute,
        amount: minutes.saturating_mul(rate_per_minute),
    }
}
