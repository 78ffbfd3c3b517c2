use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::info;

use stockflow_catalog::{Directories, LocationId, SupplierId};
use stockflow_core::{ActorId, AggregateId, OrganizationId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_purchasing::{
    ChangeStatus, ClaimPoNumber, CreatePurchaseOrder, NewOrderLine, PO_NUMBER_AGGREGATE_TYPE,
    PURCHASE_ORDER_AGGREGATE_TYPE, PoNumberClaim, PoNumberClaimCommand, PoNumberClaimId,
    PurchaseOrder, PurchaseOrderCommand, PurchaseOrderId, PurchaseOrderLine, PurchaseOrderStatus,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, retry_on_conflict};
use crate::event_store::EventStore;
use crate::services::{AutoReceiptProcessor, ReceiptOutcome, ServiceConfig};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_id: SupplierId,
    pub po_number: String,
    pub items: Vec<NewOrderLine>,
    #[serde(default)]
    pub location_id: Option<LocationId>,
    #[serde(default)]
    pub expected_delivery_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurchaseOrderDetails {
    pub id: PurchaseOrderId,
    pub po_number: String,
    pub supplier_id: Option<SupplierId>,
    pub status: PurchaseOrderStatus,
    pub order_date: Option<DateTime<Utc>>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub location_id: Option<LocationId>,
    pub total_amount: Decimal,
    pub notes: Option<String>,
    pub items: Vec<PurchaseOrderLine>,
    pub received_at: Option<DateTime<Utc>>,
}

impl From<&PurchaseOrder> for PurchaseOrderDetails {
    fn from(o: &PurchaseOrder) -> Self {
        Self {
            id: o.id_typed(),
            po_number: o.po_number().to_string(),
            supplier_id: o.supplier_id(),
            status: o.status(),
            order_date: o.order_date(),
            expected_delivery_date: o.expected_delivery_date(),
            location_id: o.location_id(),
            total_amount: o.total_amount(),
            notes: o.notes().map(str::to_string),
            items: o.lines().to_vec(),
            received_at: o.received_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub order_id: PurchaseOrderId,
    pub old_status: PurchaseOrderStatus,
    pub new_status: PurchaseOrderStatus,
    /// Present whenever the order ended up received.
    pub receipt: Option<ReceiptOutcome>,
}

fn make_order(_: OrganizationId, id: AggregateId) -> PurchaseOrder {
    PurchaseOrder::empty(PurchaseOrderId(id))
}

/// Purchase order lifecycle: creation with a unique number, status changes,
/// and posting into stock on receipt.
pub struct PurchaseOrders<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    directories: Arc<dyn Directories>,
    receipts: AutoReceiptProcessor<S, B>,
    config: ServiceConfig,
}

impl<S, B> PurchaseOrders<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        directories: Arc<dyn Directories>,
        receipts: AutoReceiptProcessor<S, B>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            dispatcher,
            directories,
            receipts,
            config,
        }
    }

    pub fn receipts(&self) -> &AutoReceiptProcessor<S, B> {
        &self.receipts
    }

    /// Create an order in `draft`.
    ///
    /// The order and its po_number claim are one atomic append, so a duplicate
    /// number leaves nothing behind.
    pub fn create(
        &self,
        organization_id: OrganizationId,
        request: NewPurchaseOrder,
        actor: Option<ActorId>,
    ) -> Result<PurchaseOrderDetails, DispatchError> {
        self.ensure_references(organization_id, &request)?;

        let order_id = PurchaseOrderId(AggregateId::new());
        let claim_id = PoNumberClaimId::for_number(organization_id, &request.po_number);

        let order = retry_on_conflict(self.config.max_concurrency_retries, || {
            let occurred_at = Utc::now();
            let mut unit = self.dispatcher.unit_of_work(organization_id);

            let order = unit.stage(
                order_id.0,
                PURCHASE_ORDER_AGGREGATE_TYPE,
                PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                    organization_id,
                    order_id,
                    supplier_id: request.supplier_id,
                    po_number: request.po_number.clone(),
                    lines: request.items.clone(),
                    location_id: request.location_id,
                    expected_delivery_date: request.expected_delivery_date,
                    notes: request.notes.clone(),
                    actor,
                    occurred_at,
                }),
                make_order,
            )?;

            unit.stage(
                claim_id.0,
                PO_NUMBER_AGGREGATE_TYPE,
                PoNumberClaimCommand::ClaimPoNumber(ClaimPoNumber {
                    organization_id,
                    po_number: request.po_number.clone(),
                    order_id,
                    occurred_at,
                }),
                |_, id| PoNumberClaim::empty(PoNumberClaimId(id)),
            )?;

            unit.commit()?;
            Ok(order)
        })?;

        info!(
            organization_id = %organization_id,
            aggregate_id = %order_id,
            po_number = order.po_number(),
            total_amount = %order.total_amount(),
            "purchase order created"
        );
        Ok(PurchaseOrderDetails::from(&order))
    }

    pub fn get(
        &self,
        organization_id: OrganizationId,
        order_id: PurchaseOrderId,
    ) -> Result<PurchaseOrderDetails, DispatchError> {
        let order = self.dispatcher.load(organization_id, order_id.0, make_order)?;
        if !order.exists() {
            return Err(DispatchError::NotFound("purchase order".to_string()));
        }
        Ok(PurchaseOrderDetails::from(&order))
    }

    /// Move an order to `status`.
    ///
    /// Moving into `received` pins the receiving location on the order and
    /// posts every line into stock in the same atomic append, so a posting
    /// failure leaves the order where it was. Asking for `received` again
    /// changes nothing on the order but re-runs the posting, which only
    /// fills in lines that are missing.
    pub fn update_status(
        &self,
        organization_id: OrganizationId,
        order_id: PurchaseOrderId,
        status: PurchaseOrderStatus,
        actor: Option<ActorId>,
    ) -> Result<StatusUpdate, DispatchError> {
        let (old_status, new_status, receipt) = retry_on_conflict(self.config.max_concurrency_retries, || {
            let mut unit = self.dispatcher.unit_of_work(organization_id);
            let order = unit.observe(order_id.0, make_order)?;
            if !order.exists() {
                return Err(DispatchError::NotFound("purchase order".to_string()));
            }
            let old_status = order.status();
            let receiving = status == PurchaseOrderStatus::Received && !old_status.is_locked();

            let receiving_location_id = if receiving {
                Some(self.resolve_receiving_location(organization_id, &order)?)
            } else {
                None
            };

            let updated = unit.stage(
                order_id.0,
                PURCHASE_ORDER_AGGREGATE_TYPE,
                PurchaseOrderCommand::ChangeStatus(ChangeStatus {
                    organization_id,
                    order_id,
                    status,
                    receiving_location_id,
                    actor,
                    occurred_at: Utc::now(),
                }),
                make_order,
            )?;

            let receipt = if receiving {
                Some(self.receipts.stage_lines(&mut unit, &updated, actor)?)
            } else {
                None
            };

            unit.commit()?;
            Ok((old_status, updated.status(), receipt))
        })?;

        info!(
            organization_id = %organization_id,
            aggregate_id = %order_id,
            from = old_status.as_str(),
            to = new_status.as_str(),
            "purchase order status updated"
        );

        let receipt = match receipt {
            Some(outcome) => {
                info!(
                    organization_id = %organization_id,
                    order_id = %order_id,
                    posted = outcome.posted_lines.len(),
                    "purchase order receipt posted with status change"
                );
                Some(outcome)
            }
            // Already received: repair any line a crash left unposted.
            None if new_status == PurchaseOrderStatus::Received => {
                Some(self.receipts.process(organization_id, order_id, actor)?)
            }
            None => None,
        };

        Ok(StatusUpdate {
            order_id,
            old_status,
            new_status,
            receipt,
        })
    }

    /// The order's own location, else the first active one, else a newly
    /// created default.
    fn resolve_receiving_location(
        &self,
        organization_id: OrganizationId,
        order: &PurchaseOrder,
    ) -> Result<LocationId, DispatchError> {
        if let Some(id) = order.location_id() {
            return Ok(id);
        }
        if let Some(location) = self.directories.first_active(organization_id) {
            return Ok(location.id);
        }
        let created = self.directories.create_default(organization_id)?;
        info!(
            organization_id = %organization_id,
            location_id = %created.id,
            "default receiving location created"
        );
        Ok(created.id)
    }

    fn ensure_references(
        &self,
        organization_id: OrganizationId,
        request: &NewPurchaseOrder,
    ) -> Result<(), DispatchError> {
        if self.directories.supplier(organization_id, request.supplier_id).is_none() {
            return Err(DispatchError::NotFound(format!("supplier {}", request.supplier_id)));
        }
        for item in &request.items {
            if self.directories.product(organization_id, item.product_id).is_none() {
                return Err(DispatchError::NotFound(format!("product {}", item.product_id)));
            }
        }
        if let Some(location_id) = request.location_id {
            if self.directories.location(organization_id, location_id).is_none() {
                return Err(DispatchError::NotFound(format!("location {location_id}")));
            }
        }
        Ok(())
    }
}
