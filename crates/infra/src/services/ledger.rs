use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use stockflow_catalog::{Directories, LocationId, ProductId};
use stockflow_core::{ActorId, AggregateId, OrganizationId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{
    CorrectStockItem, MovementReference, MovementType, OpenStockItem, RecordMovement,
    STOCK_ITEM_AGGREGATE_TYPE, StockItem, StockItemCommand, StockItemEvent, StockItemId,
    StockItemSnapshot, StockMovement,
};

use crate::command_dispatcher::{CommandDispatcher, Committed, DispatchError, retry_on_conflict};
use crate::event_store::EventStore;
use crate::services::{ServiceConfig, SettingsService};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub movement_type: MovementType,
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost: Decimal,
    #[serde(default)]
    pub reference: Option<MovementReference>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpenStockItemRequest {
    pub product_id: ProductId,
    pub location_id: LocationId,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub average_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StockCorrection {
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub average_cost: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedMovement {
    pub movement: StockMovement,
    pub stock_item: StockItemSnapshot,
}

fn make_item(_: OrganizationId, id: AggregateId) -> StockItem {
    StockItem::empty(StockItemId(id))
}

/// The stock movement ledger.
///
/// Every quantity change is a `MovementRecorded` event in the item's stream;
/// on-hand quantity and average cost are derived from it in the same append.
pub struct StockLedger<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    directories: Arc<dyn Directories>,
    settings: SettingsService<S, B>,
    config: ServiceConfig,
}

impl<S, B> StockLedger<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        directories: Arc<dyn Directories>,
        settings: SettingsService<S, B>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            dispatcher,
            directories,
            settings,
            config,
        }
    }

    pub fn record_movement(
        &self,
        organization_id: OrganizationId,
        request: MovementRequest,
        actor: Option<ActorId>,
    ) -> Result<RecordedMovement, DispatchError> {
        self.ensure_known(organization_id, request.product_id, request.location_id)?;

        let item_id = StockItemId::for_key(organization_id, request.product_id, request.location_id);
        let movement_id = Uuid::now_v7();

        let committed = retry_on_conflict(self.config.max_concurrency_retries, || {
            let mut unit = self.dispatcher.unit_of_work(organization_id);
            let low_stock_threshold = self.settings.observe_threshold(&mut unit)?;
            let state = unit.stage(
                item_id.0,
                STOCK_ITEM_AGGREGATE_TYPE,
                StockItemCommand::RecordMovement(RecordMovement {
                    organization_id,
                    item_id,
                    product_id: request.product_id,
                    location_id: request.location_id,
                    movement_id,
                    movement_type: request.movement_type,
                    quantity: request.quantity,
                    unit_cost: request.unit_cost,
                    reference: request.reference.clone(),
                    notes: request.notes.clone(),
                    actor,
                    low_stock_threshold,
                    occurred_at: Utc::now(),
                }),
                make_item,
            )?;
            let events = unit.commit()?;
            Ok(Committed { state, events })
        })?;

        let movement = recorded_movement(&committed, movement_id)?;
        let stock_item = snapshot(&committed.state)?;

        info!(
            organization_id = %organization_id,
            aggregate_id = %item_id,
            movement_type = movement.movement_type.as_str(),
            quantity = movement.quantity,
            on_hand = stock_item.quantity,
            "stock movement recorded"
        );

        Ok(RecordedMovement {
            movement,
            stock_item,
        })
    }

    /// Open an item explicitly, optionally with an opening balance.
    pub fn open_stock_item(
        &self,
        organization_id: OrganizationId,
        request: OpenStockItemRequest,
        actor: Option<ActorId>,
    ) -> Result<StockItemSnapshot, DispatchError> {
        self.ensure_known(organization_id, request.product_id, request.location_id)?;

        let item_id = StockItemId::for_key(organization_id, request.product_id, request.location_id);
        let movement_id = Uuid::now_v7();

        let committed = retry_on_conflict(self.config.max_concurrency_retries, || {
            let mut unit = self.dispatcher.unit_of_work(organization_id);
            let low_stock_threshold = self.settings.observe_threshold(&mut unit)?;
            let state = unit.stage(
                item_id.0,
                STOCK_ITEM_AGGREGATE_TYPE,
                StockItemCommand::OpenStockItem(OpenStockItem {
                    organization_id,
                    item_id,
                    product_id: request.product_id,
                    location_id: request.location_id,
                    low_stock_threshold,
                    opening_quantity: request.quantity,
                    opening_cost: request.average_cost,
                    movement_id,
                    actor,
                    occurred_at: Utc::now(),
                }),
                make_item,
            )?;
            let events = unit.commit()?;
            Ok(Committed { state, events })
        })?;

        info!(organization_id = %organization_id, aggregate_id = %item_id, "stock item opened");
        snapshot(&committed.state)
    }

    /// Manual correction of quantity and/or average cost.
    pub fn correct_stock_item(
        &self,
        organization_id: OrganizationId,
        item_id: StockItemId,
        correction: StockCorrection,
        actor: Option<ActorId>,
    ) -> Result<StockItemSnapshot, DispatchError> {
        let movement_id = Uuid::now_v7();

        let committed = retry_on_conflict(self.config.max_concurrency_retries, || {
            self.dispatcher.dispatch(
                organization_id,
                item_id.0,
                STOCK_ITEM_AGGREGATE_TYPE,
                StockItemCommand::CorrectStockItem(CorrectStockItem {
                    organization_id,
                    item_id,
                    movement_id,
                    quantity: correction.quantity,
                    average_cost: correction.average_cost,
                    actor,
                    occurred_at: Utc::now(),
                }),
                make_item,
            )
        })?;

        info!(organization_id = %organization_id, aggregate_id = %item_id, "stock item corrected");
        snapshot(&committed.state)
    }

    /// Current state, folded from the item's stream.
    pub fn stock_item(
        &self,
        organization_id: OrganizationId,
        item_id: StockItemId,
    ) -> Result<StockItemSnapshot, DispatchError> {
        let item = self.dispatcher.load(organization_id, item_id.0, make_item)?;
        item.snapshot()
            .ok_or_else(|| DispatchError::NotFound("stock item".to_string()))
    }

    fn ensure_known(
        &self,
        organization_id: OrganizationId,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<(), DispatchError> {
        if self.directories.product(organization_id, product_id).is_none() {
            return Err(DispatchError::NotFound(format!("product {product_id}")));
        }
        if self.directories.location(organization_id, location_id).is_none() {
            return Err(DispatchError::NotFound(format!("location {location_id}")));
        }
        Ok(())
    }
}

fn snapshot(item: &StockItem) -> Result<StockItemSnapshot, DispatchError> {
    item.snapshot()
        .ok_or_else(|| DispatchError::Integrity(format!("stock item {} not opened after write", item.id_typed())))
}

fn recorded_movement(
    committed: &Committed<StockItem>,
    movement_id: Uuid,
) -> Result<StockMovement, DispatchError> {
    committed
        .events
        .iter()
        .filter_map(|e| serde_json::from_value::<StockItemEvent>(e.payload.clone()).ok())
        .find_map(|e| match e {
            StockItemEvent::MovementRecorded(m) if m.movement.movement_id == movement_id => {
                Some(m.movement)
            }
            _ => None,
        })
        .ok_or_else(|| DispatchError::Integrity("movement missing from committed events".to_string()))
}
