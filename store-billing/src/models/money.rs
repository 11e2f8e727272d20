//! Currency arithmetic.
//!
//! Every amount that is persisted or sent to the gateway is rounded to two
//! decimals, half away from zero. Components are rounded independently before
//! they are summed.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Round to currency precision (2 decimals, midpoint away from zero).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Net amount, VAT on top of it, and the gross total actually charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeBreakdown {
    pub amount: Decimal,
    pub vat_amount: Decimal,
    pub total_amount: Decimal,
}

impl ChargeBreakdown {
    /// Add `vat_percentage` (e.g. `18` for 18%) on top of a net amount.
    pub fn with_vat(amount: Decimal, vat_percentage: Decimal) -> Self {
        let vat_amount = round_money(amount * vat_percentage / Decimal::ONE_HUNDRED);
        let total_amount = round_money(amount + vat_amount);
        Self {
            amount,
            vat_amount,
            total_amount,
        }
    }

    /// Commission on `total_sales` at `rate` (a fraction, `0.01` = 1%), plus VAT.
    pub fn commission(total_sales: Decimal, rate: Decimal, vat_percentage: Decimal) -> Self {
        Self::with_vat(round_money(total_sales * rate), vat_percentage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_money(d("1.005")), d("1.01"));
        assert_eq!(round_money(d("1.004")), d("1.00"));
        assert_eq!(round_money(d("-1.005")), d("-1.01"));
    }

    #[test]
    fn commission_on_ten_thousand_at_one_percent() {
        let breakdown = ChargeBreakdown::commission(d("10000.00"), d("0.01"), d("18"));
        assert_eq!(breakdown.amount, d("100.00"));
        assert_eq!(breakdown.vat_amount, d("18.00"));
        assert_eq!(breakdown.total_amount, d("118.00"));
    }

    #[test]
    fn plan_price_with_vat() {
        let breakdown = ChargeBreakdown::with_vat(d("299"), d("18"));
        assert_eq!(breakdown.vat_amount, d("53.82"));
        assert_eq!(breakdown.total_amount, d("352.82"));
    }

    #[test]
    fn components_are_rounded_before_summing() {
        // 333.333 * 0.015 = 4.999995 -> 5.00; VAT 0.90; total 5.90
        let breakdown = ChargeBreakdown::commission(d("333.333"), d("0.015"), d("18"));
        assert_eq!(breakdown.amount, d("5.00"));
        assert_eq!(breakdown.vat_amount, d("0.90"));
        assert_eq!(breakdown.total_amount, d("5.90"));
    }
}
