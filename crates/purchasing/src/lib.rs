//! Purchasing domain module (purchase orders, event-sourced).
//!
//! Business rules for purchase orders and their per-organization numbering,
//! implemented as deterministic domain logic (no IO, no HTTP, no storage).

pub mod number;
pub mod order;

pub use number::{
    ClaimPoNumber, PO_NUMBER_AGGREGATE_TYPE, PoNumberClaim, PoNumberClaimCommand,
    PoNumberClaimEvent, PoNumberClaimId, PoNumberClaimed,
};
pub use order::{
    ChangeStatus, CreatePurchaseOrder, NewOrderLine, PURCHASE_ORDER_AGGREGATE_TYPE,
    PurchaseOrder, PurchaseOrderCommand, PurchaseOrderCreated, PurchaseOrderEvent,
    PurchaseOrderId, PurchaseOrderLine, PurchaseOrderStatus, StatusChanged,
};
