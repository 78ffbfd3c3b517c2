//! Quantity/cost arithmetic shared by the aggregate and its projections.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use stockflow_core::{DomainError, DomainResult};

use crate::movement::MovementType;

/// Decimal places kept on average costs.
pub const COST_SCALE: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Normal,
    LowStock,
    OutOfStock,
}

impl StockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StockStatus::Normal => "normal",
            StockStatus::LowStock => "low_stock",
            StockStatus::OutOfStock => "out_of_stock",
        }
    }
}

/// On-hand position of one stock item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub average_cost: Decimal,
    pub low_stock_threshold: i64,
}

impl StockLevel {
    pub fn opened(low_stock_threshold: i64) -> Self {
        Self {
            quantity: 0,
            reserved_quantity: 0,
            average_cost: Decimal::ZERO,
            low_stock_threshold,
        }
    }

    pub fn available(&self) -> i64 {
        self.quantity - self.reserved_quantity
    }

    pub fn status(&self) -> StockStatus {
        let available = self.available();
        if available <= 0 {
            StockStatus::OutOfStock
        } else if available <= self.low_stock_threshold {
            StockStatus::LowStock
        } else {
            StockStatus::Normal
        }
    }

    pub fn inventory_value(&self) -> Decimal {
        Decimal::from(self.quantity)
            .checked_mul(self.average_cost)
            .unwrap_or(Decimal::MAX)
    }

    /// Position after a movement, or the reason it cannot happen.
    pub fn after_movement(
        &self,
        movement_type: MovementType,
        quantity: i64,
        unit_cost: Decimal,
    ) -> DomainResult<StockLevel> {
        let mut next = *self;
        match movement_type {
            MovementType::StockIn => {
                next.quantity = self
                    .quantity
                    .checked_add(quantity)
                    .ok_or_else(|| DomainError::validation("quantity out of range"))?;
                next.average_cost =
                    weighted_average_cost(self.quantity, self.average_cost, quantity, unit_cost)
                        .ok_or_else(|| DomainError::validation("cost out of range"))?;
            }
            MovementType::StockOut => {
                let remaining = self.quantity - quantity;
                if remaining < 0 {
                    return Err(DomainError::insufficient_stock(quantity, self.quantity));
                }
                next.quantity = remaining;
            }
            MovementType::Adjustment => {
                next.quantity = quantity;
            }
        }
        Ok(next)
    }

    /// Fold an already-accepted movement.
    ///
    /// Accepted movements always pass [`StockLevel::after_movement`]; the fallback
    /// only guards against hand-edited streams.
    pub fn apply_movement(&mut self, movement_type: MovementType, quantity: i64, unit_cost: Decimal) {
        match self.after_movement(movement_type, quantity, unit_cost) {
            Ok(next) => *self = next,
            Err(_) => {
                if movement_type == MovementType::StockOut {
                    self.quantity -= quantity;
                }
            }
        }
    }
}

/// `(on_hand * average + incoming * unit_cost) / (on_hand + incoming)`,
/// rounded to [`COST_SCALE`] places. `None` on arithmetic overflow.
pub fn weighted_average_cost(
    on_hand: i64,
    average: Decimal,
    incoming: i64,
    unit_cost: Decimal,
) -> Option<Decimal> {
    let total_qty = on_hand.checked_add(incoming)?;
    if total_qty <= 0 {
        return Some(unit_cost.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero));
    }
    let on_hand_value = Decimal::from(on_hand.max(0)).checked_mul(average)?;
    let incoming_value = Decimal::from(incoming).checked_mul(unit_cost)?;
    let total_value = on_hand_value.checked_add(incoming_value)?;
    let avg = total_value.checked_div(Decimal::from(total_qty))?;
    Some(avg.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn level(quantity: i64, average_cost: Decimal) -> StockLevel {
        StockLevel {
            quantity,
            reserved_quantity: 0,
            average_cost,
            low_stock_threshold: 10,
        }
    }

    #[test]
    fn stock_in_blends_cost_by_quantity() {
        let next = level(10, dec!(5.0))
            .after_movement(MovementType::StockIn, 10, dec!(7.0))
            .unwrap();
        assert_eq!(next.quantity, 20);
        assert_eq!(next.average_cost, dec!(6.0));
    }

    #[test]
    fn first_receipt_takes_incoming_cost() {
        let next = level(0, Decimal::ZERO)
            .after_movement(MovementType::StockIn, 3, dec!(10.00))
            .unwrap();
        assert_eq!(next.average_cost, dec!(10.00));
    }

    #[test]
    fn stock_out_and_adjustment_keep_average_cost() {
        let start = level(20, dec!(6));
        let out = start.after_movement(MovementType::StockOut, 5, dec!(99)).unwrap();
        assert_eq!(out.quantity, 15);
        assert_eq!(out.average_cost, dec!(6));

        let adj = start.after_movement(MovementType::Adjustment, 2, dec!(99)).unwrap();
        assert_eq!(adj.quantity, 2);
        assert_eq!(adj.average_cost, dec!(6));
    }

    #[test]
    fn stock_out_beyond_on_hand_fails() {
        match level(4, dec!(1)).after_movement(MovementType::StockOut, 5, Decimal::ZERO) {
            Err(DomainError::InsufficientStock {
                requested,
                available,
            }) => {
                assert_eq!(requested, 5);
                assert_eq!(available, 4);
            }
            other => panic!("expected insufficient stock, got {other:?}"),
        }
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(level(0, dec!(1)).status(), StockStatus::OutOfStock);
        assert_eq!(level(10, dec!(1)).status(), StockStatus::LowStock);
        assert_eq!(level(11, dec!(1)).status(), StockStatus::Normal);

        let reserved = StockLevel {
            reserved_quantity: 11,
            ..level(11, dec!(1))
        };
        assert_eq!(reserved.available(), 0);
        assert_eq!(reserved.status(), StockStatus::OutOfStock);
    }

    #[test]
    fn average_cost_is_rounded_to_cost_scale() {
        let avg = weighted_average_cost(1, dec!(1), 2, dec!(2)).unwrap();
        assert_eq!(avg, dec!(1.6667));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn blended_cost_stays_between_inputs(
            on_hand in 0i64..10_000,
            incoming in 1i64..10_000,
            old_cents in 0i64..100_000,
            new_cents in 0i64..100_000,
        ) {
            let old = Decimal::new(old_cents, 2);
            let new = Decimal::new(new_cents, 2);
            let avg = weighted_average_cost(on_hand, old, incoming, new).unwrap();

            let lo = if on_hand == 0 { new } else { old.min(new) };
            let hi = if on_hand == 0 { new } else { old.max(new) };
            prop_assert!(avg >= lo && avg <= hi);
        }
    }
}
