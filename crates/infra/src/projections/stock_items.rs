use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use stockflow_catalog::{LocationId, ProductId};
use stockflow_core::OrganizationId;
use stockflow_events::EventEnvelope;
use stockflow_inventory::{StockItemEvent, StockItemId, StockLevel, StockStatus};

use crate::projections::cursor::{ProjectionError, StreamCursors, ensure_scope};
use crate::read_model::OrganizationStore;

/// Current position of one stock item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockItemReadModel {
    pub id: StockItemId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub available_quantity: i64,
    pub average_cost: Decimal,
    pub low_stock_threshold: i64,
    pub status: StockStatus,
    pub inventory_value: Decimal,
    pub last_movement_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl StockItemReadModel {
    fn level(&self) -> StockLevel {
        StockLevel {
            quantity: self.quantity,
            reserved_quantity: self.reserved_quantity,
            average_cost: self.average_cost,
            low_stock_threshold: self.low_stock_threshold,
        }
    }

    fn set_level(&mut self, level: StockLevel) {
        self.quantity = level.quantity;
        self.reserved_quantity = level.reserved_quantity;
        self.available_quantity = level.available();
        self.average_cost = level.average_cost;
        self.low_stock_threshold = level.low_stock_threshold;
        self.status = level.status();
        self.inventory_value = level.inventory_value();
    }
}

/// Stock item projection, fed from `inventory.stock_item` streams.
#[derive(Debug)]
pub struct StockItemsProjection<S>
where
    S: OrganizationStore<StockItemId, StockItemReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> StockItemsProjection<S>
where
    S: OrganizationStore<StockItemId, StockItemReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, organization_id: OrganizationId, id: &StockItemId) -> Option<StockItemReadModel> {
        self.store.get(organization_id, id)
    }

    pub fn list(&self, organization_id: OrganizationId) -> Vec<StockItemReadModel> {
        self.store.list(organization_id)
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        self.cursors.advance(envelope, || {
            let event: StockItemEvent = serde_json::from_value(envelope.payload().clone())
                .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;
            self.apply(envelope, event)
        })
    }

    fn apply(&self, envelope: &EventEnvelope<JsonValue>, event: StockItemEvent) -> Result<(), ProjectionError> {
        let organization_id = envelope.organization_id();

        match event {
            StockItemEvent::StockItemOpened(e) => {
                ensure_scope(envelope, e.organization_id, e.item_id.0)?;
                let mut rm = StockItemReadModel {
                    id: e.item_id,
                    product_id: e.product_id,
                    location_id: e.location_id,
                    quantity: 0,
                    reserved_quantity: 0,
                    available_quantity: 0,
                    average_cost: Decimal::ZERO,
                    low_stock_threshold: e.low_stock_threshold,
                    status: StockStatus::OutOfStock,
                    inventory_value: Decimal::ZERO,
                    last_movement_at: None,
                    updated_at: e.occurred_at,
                };
                rm.set_level(StockLevel::opened(e.low_stock_threshold));
                self.store.upsert(organization_id, e.item_id, rm);
            }
            StockItemEvent::MovementRecorded(e) => {
                ensure_scope(envelope, e.organization_id, e.item_id.0)?;
                self.update(organization_id, e.item_id, |rm| {
                    let m = &e.movement;
                    let mut level = rm.level();
                    level.apply_movement(m.movement_type, m.quantity, m.unit_cost);
                    rm.set_level(level);
                    rm.last_movement_at = Some(m.occurred_at);
                    rm.updated_at = m.occurred_at;
                });
            }
            StockItemEvent::AverageCostCorrected(e) => {
                ensure_scope(envelope, e.organization_id, e.item_id.0)?;
                self.update(organization_id, e.item_id, |rm| {
                    let mut level = rm.level();
                    level.average_cost = e.average_cost;
                    rm.set_level(level);
                    rm.updated_at = e.occurred_at;
                });
            }
            StockItemEvent::LowStockThresholdChanged(e) => {
                ensure_scope(envelope, e.organization_id, e.item_id.0)?;
                self.update(organization_id, e.item_id, |rm| {
                    let mut level = rm.level();
                    level.low_stock_threshold = e.low_stock_threshold;
                    rm.set_level(level);
                    rm.updated_at = e.occurred_at;
                });
            }
        }

        Ok(())
    }

    /// Items are always opened first in their stream; an update for an unknown
    /// item means the opening event was never seen and is dropped.
    fn update(
        &self,
        organization_id: OrganizationId,
        id: StockItemId,
        f: impl FnOnce(&mut StockItemReadModel),
    ) {
        if let Some(mut rm) = self.store.get(organization_id, &id) {
            f(&mut rm);
            self.store.upsert(organization_id, id, rm);
        }
    }

    pub(crate) fn reset(&self, organization_id: OrganizationId) {
        self.store.clear_organization(organization_id);
    }

    pub(crate) fn reset_cursors(&self) {
        self.cursors.clear();
    }
}
