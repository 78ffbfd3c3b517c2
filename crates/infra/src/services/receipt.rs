use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use stockflow_catalog::LocationId;
use stockflow_core::{ActorId, AggregateId, OrganizationId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{
    MovementReference, PostReceipt, STOCK_ITEM_AGGREGATE_TYPE, StockItem, StockItemCommand,
    StockItemId,
};
use stockflow_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, UnitOfWork, retry_on_conflict};
use crate::event_store::EventStore;
use crate::services::{ServiceConfig, SettingsService};

/// What one receipt run did, by order line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptOutcome {
    pub order_id: PurchaseOrderId,
    pub location_id: LocationId,
    pub posted_lines: Vec<u32>,
    pub already_posted_lines: Vec<u32>,
}

/// Posts a received purchase order into stock.
///
/// Each line becomes one `stock_in` movement referencing
/// `(purchase_order, order id, line_no)`. Lines already carrying that
/// reference are skipped, so running the processor again is harmless. All
/// lines commit in one batch; when an order is moved into `received` they
/// share that batch with the status change.
#[derive(Debug)]
pub struct AutoReceiptProcessor<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    settings: SettingsService<S, B>,
    config: ServiceConfig,
}

impl<S, B> AutoReceiptProcessor<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        settings: SettingsService<S, B>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            dispatcher,
            settings,
            config,
        }
    }

    pub fn process(
        &self,
        organization_id: OrganizationId,
        order_id: PurchaseOrderId,
        actor: Option<ActorId>,
    ) -> Result<ReceiptOutcome, DispatchError> {
        let outcome = retry_on_conflict(self.config.max_concurrency_retries, || {
            self.post_once(organization_id, order_id, actor)
        })?;

        info!(
            organization_id = %organization_id,
            order_id = %order_id,
            posted = outcome.posted_lines.len(),
            already_posted = outcome.already_posted_lines.len(),
            "purchase order receipt processed"
        );
        Ok(outcome)
    }

    fn post_once(
        &self,
        organization_id: OrganizationId,
        order_id: PurchaseOrderId,
        actor: Option<ActorId>,
    ) -> Result<ReceiptOutcome, DispatchError> {
        let order = self.dispatcher.load(organization_id, order_id.0, |_, id| {
            PurchaseOrder::empty(PurchaseOrderId(id))
        })?;
        if !order.exists() {
            return Err(DispatchError::NotFound("purchase order".to_string()));
        }

        let mut unit = self.dispatcher.unit_of_work(organization_id);
        let outcome = self.stage_lines(&mut unit, &order, actor)?;
        unit.commit()?;
        Ok(outcome)
    }

    /// Stage a `stock_in` for every line of `order` not yet posted.
    ///
    /// `order` must already be received, either committed or staged in the
    /// same `unit`; nothing is written until the caller commits.
    pub(crate) fn stage_lines(
        &self,
        unit: &mut UnitOfWork<'_, S, B>,
        order: &PurchaseOrder,
        actor: Option<ActorId>,
    ) -> Result<ReceiptOutcome, DispatchError> {
        let organization_id = unit.organization_id();
        let order_id = order.id_typed();
        if order.status() != PurchaseOrderStatus::Received {
            return Err(DispatchError::InvariantViolation(format!(
                "purchase order {} is {}, not received",
                order.po_number(),
                order.status()
            )));
        }
        let Some(location_id) = order.location_id() else {
            return Err(DispatchError::InvariantViolation(
                "received purchase order has no receiving location".to_string(),
            ));
        };

        let low_stock_threshold = self.settings.observe_threshold(unit)?;
        let notes = format!("Auto-receipt from PO {}", order.po_number());

        let mut posted_lines = Vec::new();
        let mut already_posted_lines = Vec::new();

        for line in order.lines() {
            let item_id = StockItemId::for_key(organization_id, line.product_id, location_id);
            let before = unit.pending_events();

            unit.stage(
                item_id.0,
                STOCK_ITEM_AGGREGATE_TYPE,
                StockItemCommand::PostReceipt(PostReceipt {
                    organization_id,
                    item_id,
                    product_id: line.product_id,
                    location_id,
                    movement_id: Uuid::now_v7(),
                    quantity: line.quantity_ordered,
                    unit_cost: line.unit_cost,
                    reference: MovementReference::purchase_order_line(*order_id.0.as_uuid(), line.line_no),
                    notes: Some(notes.clone()),
                    actor,
                    low_stock_threshold,
                    occurred_at: Utc::now(),
                }),
                |_: OrganizationId, id: AggregateId| StockItem::empty(StockItemId(id)),
            )?;

            if unit.pending_events() > before {
                posted_lines.push(line.line_no);
            } else {
                already_posted_lines.push(line.line_no);
            }
        }

        Ok(ReceiptOutcome {
            order_id,
            location_id,
            posted_lines,
            already_posted_lines,
        })
    }
}
