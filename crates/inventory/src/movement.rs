use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockflow_catalog::{LocationId, ProductId};
use stockflow_core::{ActorId, DomainError, DomainResult};

/// `reference_type` used for receipts posted from purchase orders.
pub const PURCHASE_ORDER_REFERENCE: &str = "purchase_order";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    StockIn,
    StockOut,
    /// Sets the on-hand quantity to an absolute value.
    Adjustment,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::StockIn => "stock_in",
            MovementType::StockOut => "stock_out",
            MovementType::Adjustment => "adjustment",
        }
    }

    /// Smallest quantity the movement accepts.
    fn min_quantity(self) -> i64 {
        match self {
            MovementType::StockIn | MovementType::StockOut => 1,
            MovementType::Adjustment => 0,
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "stock_in" => Ok(MovementType::StockIn),
            "stock_out" => Ok(MovementType::StockOut),
            "adjustment" => Ok(MovementType::Adjustment),
            other => Err(DomainError::validation(format!(
                "invalid movement type '{other}' (expected stock_in, stock_out or adjustment)"
            ))),
        }
    }
}

/// What produced a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementOrigin {
    Manual,
    Opening,
    Correction,
    /// Posted by the auto-receipt of a purchase order line.
    Receipt,
}

/// Business document a movement points back to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MovementReference {
    pub reference_type: String,
    pub reference_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_no: Option<u32>,
}

impl MovementReference {
    pub fn new(reference_type: impl Into<String>, reference_id: Uuid) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id,
            line_no: None,
        }
    }

    pub fn purchase_order_line(order_id: Uuid, line_no: u32) -> Self {
        Self {
            reference_type: PURCHASE_ORDER_REFERENCE.to_string(),
            reference_id: order_id,
            line_no: Some(line_no),
        }
    }

    pub fn is_purchase_order(&self, order_id: Uuid) -> bool {
        self.reference_type == PURCHASE_ORDER_REFERENCE && self.reference_id == order_id
    }
}

/// An immutable ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub movement_id: Uuid,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: Decimal,
    pub origin: MovementOrigin,
    pub reference: Option<MovementReference>,
    pub notes: Option<String>,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

pub(crate) fn validate_movement(
    movement_type: MovementType,
    quantity: i64,
    unit_cost: Decimal,
) -> DomainResult<()> {
    if quantity < movement_type.min_quantity() {
        return Err(DomainError::validation(match movement_type {
            MovementType::Adjustment => "quantity cannot be negative for adjustment",
            _ => "quantity must be positive",
        }));
    }
    if unit_cost < Decimal::ZERO {
        return Err(DomainError::validation("unit_cost cannot be negative"));
    }
    Ok(())
}

pub(crate) fn validate_reference(reference: &MovementReference) -> DomainResult<()> {
    if reference.reference_type.trim().is_empty() {
        return Err(DomainError::validation("reference_type cannot be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn movement_type_parses_wire_names() {
        assert_eq!("stock_in".parse::<MovementType>().unwrap(), MovementType::StockIn);
        assert_eq!("stock_out".parse::<MovementType>().unwrap(), MovementType::StockOut);
        assert_eq!("adjustment".parse::<MovementType>().unwrap(), MovementType::Adjustment);

        match "transfer".parse::<MovementType>() {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("transfer")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn quantity_rules_depend_on_movement_type() {
        assert!(validate_movement(MovementType::StockIn, 0, dec!(1)).is_err());
        assert!(validate_movement(MovementType::StockOut, -1, dec!(0)).is_err());
        assert!(validate_movement(MovementType::Adjustment, 0, dec!(0)).is_ok());
        assert!(validate_movement(MovementType::Adjustment, -1, dec!(0)).is_err());
        assert!(validate_movement(MovementType::StockIn, 1, dec!(-0.01)).is_err());
    }
}
