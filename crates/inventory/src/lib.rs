//! Inventory stock ledger (event-sourced).
//!
//! One `StockItem` stream per organization/product/location. Every movement is
//! an immutable event in that stream and the on-hand quantity and weighted
//! average cost are the fold of those events. Pure domain logic: no IO, no
//! HTTP, no storage.

pub mod item;
pub mod level;
pub mod movement;

pub use item::{
    AverageCostCorrected, ApplyLowStockThreshold, CorrectStockItem, LowStockThresholdChanged,
    MovementRecorded, OpenStockItem, PostReceipt, RecordMovement, STOCK_ITEM_AGGREGATE_TYPE,
    StockItem, StockItemCommand, StockItemEvent, StockItemId, StockItemOpened, StockItemSnapshot,
};
pub use level::{COST_SCALE, StockLevel, StockStatus, weighted_average_cost};
pub use movement::{
    MovementOrigin, MovementReference, MovementType, PURCHASE_ORDER_REFERENCE, StockMovement,
};
