//! Application services: the operations the HTTP layer exposes.
//!
//! Each write follows the dispatcher pipeline (load, decide, append with the
//! loaded version, publish) and is retried on concurrency conflicts up to
//! [`ServiceConfig::max_concurrency_retries`] times. Reads of current state go
//! to the aggregates; listings go to the projections.

pub mod ledger;
pub mod purchasing;
pub mod receipt;
pub mod settings;
pub mod view;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use stockflow_catalog::{CatalogError, Directories};
use stockflow_events::{EventBus, EventEnvelope, InMemoryEventBus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore};
use crate::projections::Projections;

pub use ledger::{MovementRequest, OpenStockItemRequest, RecordedMovement, StockCorrection, StockLedger};
pub use purchasing::{NewPurchaseOrder, PurchaseOrderDetails, PurchaseOrders, StatusUpdate};
pub use receipt::{AutoReceiptProcessor, ReceiptOutcome};
pub use settings::{SettingsService, SettingsView};
pub use view::{ItemFilter, MovementFilter, PurchaseOrderFilter, PurchaseOrderRow, StockItemRow, StockItemView};

/// Retries after a lost optimistic-concurrency race.
pub const DEFAULT_MAX_CONCURRENCY_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub max_concurrency_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrency_retries: DEFAULT_MAX_CONCURRENCY_RETRIES,
        }
    }
}

pub type SharedDispatcher<S, B> = Arc<CommandDispatcher<S, B>>;

/// Dispatcher wired to the in-process store and bus (dev/test).
pub type InMemoryDispatcher = CommandDispatcher<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
>;

impl From<CatalogError> for DispatchError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::Invalid(msg) => DispatchError::Validation(format!("invalid {msg}")),
            CatalogError::Duplicate(msg) => DispatchError::Conflict(format!("duplicate {msg}")),
            CatalogError::Unavailable => DispatchError::Store(EventStoreError::Backend("catalog unavailable".to_string())),
        }
    }
}


/// Every service wired over one dispatcher, catalog and projection set.
pub struct Stockflow<S, B> {
    pub settings: SettingsService<S, B>,
    pub ledger: StockLedger<S, B>,
    pub purchase_orders: PurchaseOrders<S, B>,
    pub view: StockItemView,
}

impl<S, B> Stockflow<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: SharedDispatcher<S, B>,
        directories: Arc<dyn Directories>,
        projections: Arc<Projections>,
        config: ServiceConfig,
    ) -> Self {
        let settings = SettingsService::new(dispatcher.clone(), config);
        let receipts = AutoReceiptProcessor::new(dispatcher.clone(), settings.clone(), config);
        Self {
            ledger: StockLedger::new(dispatcher.clone(), directories.clone(), settings.clone(), config),
            purchase_orders: PurchaseOrders::new(dispatcher, directories.clone(), receipts, config),
            view: StockItemView::new(projections, directories),
            settings,
        }
    }
}
